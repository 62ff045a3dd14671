//! UDP listener
//!
//! Every datagram is one payload. Trailing whitespace is stripped before the
//! payload is queued for the manager.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Listener, ListenerError, PayloadSink, RawPayload};

const MAX_DATAGRAM_SIZE: usize = 65_535;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Listener bound to a fixed UDP address
pub struct DatagramListener {
    name: String,
    bind_addr: SocketAddr,
    running: Option<Running>,
}

impl DatagramListener {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            name: "wifi".to_string(),
            bind_addr,
            running: None,
        }
    }

    /// Address actually bound, when running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

#[async_trait]
impl Listener for DatagramListener {
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

        let socket = UdpSocket::bind(self.bind_addr)
            .await
            .map_err(|source| ListenerError::Bind {
                listener: self.name.clone(),
                source,
            })?;
        let local_addr = socket.local_addr().unwrap_or(self.bind_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(receive_loop(self.name.clone(), socket, sink, shutdown_rx));

        info!(listener = %self.name, address = %local_addr, "Datagram listener started");
        self.running = Some(Running {
            local_addr,
            shutdown,
            task,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            warn!(listener = %self.name, error = %e, "Datagram receive task ended abnormally");
        }
        info!(listener = %self.name, "Datagram listener stopped");
    }
}

async fn receive_loop(
    name: String,
    socket: UdpSocket,
    sink: PayloadSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            res = socket.recv_from(&mut buf) => res,
        };

        let (len, peer) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!(listener = %name, error = %e, "Failed to receive datagram");
                if shutdown_within(&mut shutdown, RECV_ERROR_BACKOFF).await {
                    break;
                }
                continue;
            }
        };

        let bytes = trim_trailing_whitespace(&buf[..len]).to_vec();
        debug!(listener = %name, %peer, len = bytes.len(), "Datagram received");

        let payload = RawPayload {
            listener: name.clone(),
            bytes,
        };
        tokio::select! {
            _ = shutdown.changed() => break,
            res = sink.send(payload) => {
                if res.is_err() {
                    debug!(listener = %name, "Payload queue closed");
                    break;
                }
            }
        }
    }
}

/// Sleep for `delay`, returning true early if shutdown is signalled
async fn shutdown_within(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace(b"a/b \r\n"), b"a/b");
        assert_eq!(trim_trailing_whitespace(b"  a"), b"  a");
        assert_eq!(trim_trailing_whitespace(b" \n"), b"");
    }

    #[tokio::test]
    async fn test_error_backoff_waits_unless_shut_down() {
        let (tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        assert!(!shutdown_within(&mut rx, Duration::from_millis(50)).await);
        assert!(started.elapsed() >= Duration::from_millis(50));

        tx.send(true).unwrap();
        let started = Instant::now();
        assert!(shutdown_within(&mut rx, Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_receives_datagram() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut listener = DatagramListener::new(loopback());
        listener.start(tx).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sender = UdpSocket::bind(loopback()).await.unwrap();
        sender.send_to(b"dev/1/SMS/hi\n", addr).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.bytes, b"dev/1/SMS/hi");
        assert_eq!(payload.listener, "wifi");

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_loop() {
        let (tx, _rx) = mpsc::channel(8);
        let mut listener = DatagramListener::new(loopback());
        listener.start(tx.clone()).await.unwrap();
        let first = listener.local_addr();
        listener.start(tx).await.unwrap();

        assert!(listener.is_started());
        assert_eq!(listener.local_addr(), first);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut listener = DatagramListener::new(loopback());
        listener.stop().await;
        listener.stop().await;
        assert!(!listener.is_started());
    }

    #[tokio::test]
    async fn test_no_payloads_after_stop() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut listener = DatagramListener::new(loopback());
        listener.start(tx).await.unwrap();
        let addr = listener.local_addr().unwrap();
        listener.stop().await;

        let sender = UdpSocket::bind(loopback()).await.unwrap();
        let _ = sender.send_to(b"dev/1/SMS/late", addr).await;

        let res = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(res, Ok(None)), "receive loop must have dropped its sink");
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (tx, _rx) = mpsc::channel(8);
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut listener = DatagramListener::new(taken.local_addr().unwrap());

        let err = listener.start(tx).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(!listener.is_started());
    }
}
