//! Connection-oriented listener
//!
//! The phone opens a connection, writes one payload and closes it. The
//! accept loop polls with a bounded timeout so a stop request is seen within
//! one poll interval; timeouts are the normal way the loop wakes up, not
//! errors. The transport itself (TCP, RFCOMM) is pluggable.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Listener, ListenerError, PayloadSink, RawPayload};

/// Size of a single read from a connection
pub const BUFFER_SIZE: usize = 1024;
const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// An accepted inbound connection
pub type Connection = Box<dyn AsyncRead + Send + Unpin>;

/// A bound endpoint accepting connections
#[async_trait]
pub trait StreamEndpoint: Send {
    async fn accept(&mut self) -> io::Result<Connection>;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Something that can open a [`StreamEndpoint`]
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    async fn open(&self) -> io::Result<Box<dyn StreamEndpoint>>;

    /// Whether a short read marks the end of the payload
    ///
    /// Some transports keep the connection open after the last write, so a
    /// read shorter than [`BUFFER_SIZE`] is taken as the end of data.
    fn ends_on_short_read(&self) -> bool {
        false
    }
}

/// Plain TCP transport
pub struct TcpTransport {
    bind_addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

struct TcpEndpoint {
    listener: TcpListener,
}

#[async_trait]
impl StreamEndpoint for TcpEndpoint {
    async fn accept(&mut self) -> io::Result<Connection> {
        let (stream, peer) = self.listener.accept().await?;
        debug!(%peer, "Accepted TCP connection");
        Ok(Box::new(stream))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl StreamTransport for TcpTransport {
    async fn open(&self) -> io::Result<Box<dyn StreamEndpoint>> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        Ok(Box::new(TcpEndpoint { listener }))
    }
}

struct Running {
    local_addr: Option<SocketAddr>,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Listener accepting one payload per connection
pub struct StreamListener<T: StreamTransport> {
    name: String,
    transport: Arc<T>,
    poll_timeout: Duration,
    read_timeout: Duration,
    running: Option<Running>,
}

impl<T: StreamTransport> StreamListener<T> {
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport: Arc::new(transport),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            running: None,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().and_then(|r| r.local_addr)
    }
}

#[async_trait]
impl<T: StreamTransport> Listener for StreamListener<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_started(&self) -> bool {
        self.running.is_some()
    }

    async fn start(&mut self, sink: PayloadSink) -> Result<(), ListenerError> {
        if self.running.is_some() {
            info!(listener = %self.name, "Listener already started");
            return Ok(());
        }

        let endpoint = self
            .transport
            .open()
            .await
            .map_err(|source| ListenerError::Bind {
                listener: self.name.clone(),
                source,
            })?;
        let local_addr = endpoint.local_addr();

        let stop = Arc::new(AtomicBool::new(false));
        let accept_loop = AcceptLoop {
            name: self.name.clone(),
            endpoint,
            sink,
            stop: stop.clone(),
            poll_timeout: self.poll_timeout,
            read_timeout: self.read_timeout,
            ends_on_short_read: self.transport.ends_on_short_read(),
        };
        let task = tokio::spawn(accept_loop.run());

        info!(listener = %self.name, address = ?local_addr, "Stream listener started");
        self.running = Some(Running {
            local_addr,
            stop,
            task,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.stop.store(true, Ordering::Release);
        if let Err(e) = running.task.await {
            warn!(listener = %self.name, error = %e, "Accept task ended abnormally");
        }
        info!(listener = %self.name, "Stream listener stopped");
    }
}

struct AcceptLoop {
    name: String,
    endpoint: Box<dyn StreamEndpoint>,
    sink: PayloadSink,
    stop: Arc<AtomicBool>,
    poll_timeout: Duration,
    read_timeout: Duration,
    ends_on_short_read: bool,
}

impl AcceptLoop {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    async fn run(mut self) {
        while !self.stopped() {
            let conn = match tokio::time::timeout(self.poll_timeout, self.endpoint.accept()).await
            {
                // Poll interval elapsed, recheck the stop flag
                Err(_) => continue,
                Ok(Err(e)) => {
                    warn!(listener = %self.name, error = %e, "Failed to accept connection");
                    tokio::time::sleep(self.poll_timeout).await;
                    continue;
                }
                Ok(Ok(conn)) => conn,
            };

            let read = read_payload(conn, self.read_timeout, self.ends_on_short_read);
            let Some(result) = until_stopped(&self.stop, self.poll_timeout, read).await else {
                debug!(listener = %self.name, "Stopped while reading payload");
                break;
            };
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(listener = %self.name, error = %e, "Failed to read payload");
                    continue;
                }
            };
            if bytes.is_empty() {
                debug!(listener = %self.name, "Connection closed without data");
                continue;
            }

            if !emit(&self.name, &self.sink, &self.stop, self.poll_timeout, bytes).await {
                break;
            }
        }
        // The endpoint is dropped here, closing the socket
    }
}

/// Drive `fut` to completion, checking the stop flag every `poll_timeout`.
/// Returns `None` if the listener was stopped first.
async fn until_stopped<F: std::future::Future>(
    stop: &AtomicBool,
    poll_timeout: Duration,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            _ = tokio::time::sleep(poll_timeout) => {
                if stop.load(Ordering::Acquire) {
                    return None;
                }
            }
        }
    }
}

/// Queue a payload, giving up if the listener is stopped meanwhile.
/// Returns false when the accept loop should exit.
async fn emit(
    name: &str,
    sink: &PayloadSink,
    stop: &AtomicBool,
    poll_timeout: Duration,
    bytes: Vec<u8>,
) -> bool {
    let mut payload = RawPayload {
        listener: name.to_string(),
        bytes,
    };
    loop {
        match sink.send_timeout(payload, poll_timeout).await {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(p)) => {
                if stop.load(Ordering::Acquire) {
                    return false;
                }
                payload = p;
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!(listener = %name, "Payload queue closed");
                return false;
            }
        }
    }
}

/// Read one payload in [`BUFFER_SIZE`] chunks until end of data
async fn read_payload(
    mut conn: Connection,
    read_timeout: Duration,
    ends_on_short_read: bool,
) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; BUFFER_SIZE];

    loop {
        let n = tokio::time::timeout(read_timeout, conn.read(&mut chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
        data.extend_from_slice(&chunk[..n]);

        if n == 0 || (ends_on_short_read && n < BUFFER_SIZE) {
            break;
        }
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("payload exceeds {} bytes", MAX_PAYLOAD_SIZE),
            ));
        }
    }

    Ok(data)
}
