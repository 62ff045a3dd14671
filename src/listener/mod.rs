//! Transport listeners
//!
//! A listener owns one network endpoint and pushes every payload it receives
//! into the channel handed to it on `start`. Listeners never decode; that is
//! left to the dispatch manager on its own task.

pub mod datagram;
pub mod stream;

#[cfg(feature = "bluetooth")]
pub mod bluetooth;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use datagram::DatagramListener;
pub use stream::{StreamListener, StreamTransport, TcpTransport};

#[cfg(feature = "bluetooth")]
pub use bluetooth::RfcommTransport;

/// One undecoded payload together with the listener it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub listener: String,
    pub bytes: Vec<u8>,
}

/// Sending half of the manager's payload queue
pub type PayloadSink = mpsc::Sender<RawPayload>;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{listener}: failed to bind endpoint: {source}")]
    Bind {
        listener: String,
        #[source]
        source: std::io::Error,
    },
}

impl ListenerError {
    pub fn listener(&self) -> &str {
        match self {
            ListenerError::Bind { listener, .. } => listener,
        }
    }
}

/// A transport endpoint that can be started and stopped repeatedly
///
/// `start` on a running listener and `stop` on a stopped one are no-ops.
/// `stop` returns only after the receive loop has finished with the socket.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Name used in logs and in emitted payloads
    fn name(&self) -> &str;

    fn is_started(&self) -> bool;

    /// Bind the endpoint and spawn the receive loop
    async fn start(&mut self, sink: PayloadSink) -> Result<(), ListenerError>;

    /// Stop the receive loop and close the endpoint
    async fn stop(&mut self);
}
