//! Client for pushing payloads to a running notifier, mainly for testing

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Send one payload as a single datagram
pub async fn send_datagram(target: SocketAddr, payload: &str) -> Result<()> {
    let bind_addr: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .context("Failed to bind local UDP socket")?;
    socket.set_broadcast(true).ok();
    socket
        .send_to(payload.as_bytes(), target)
        .await
        .with_context(|| format!("Failed to send datagram to {}", target))?;
    Ok(())
}

/// Send one payload over a stream connection (one payload per connection)
pub async fn send_stream(target: SocketAddr, payload: &str) -> Result<()> {
    let mut stream = tokio::time::timeout(SEND_TIMEOUT, TcpStream::connect(target))
        .await
        .context("Timed out connecting")?
        .with_context(|| format!("Failed to connect to {}", target))?;

    stream
        .write_all(payload.as_bytes())
        .await
        .context("Failed to write payload")?;
    stream.shutdown().await.context("Failed to close stream")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        send_datagram(target, "dev/1/PING/hi").await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"dev/1/PING/hi");
    }

    #[tokio::test]
    async fn test_send_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).await.unwrap();
            received
        });

        send_stream(target, "v2/dev/1/SMS//body").await.unwrap();
        assert_eq!(handle.await.unwrap(), "v2/dev/1/SMS//body");
    }
}
