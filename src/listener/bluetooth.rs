//! RFCOMM transport through BlueZ
//!
//! Registers a serial-port profile under the notifier's service UUID so the
//! phone can discover it, then hands accepted RFCOMM streams to the generic
//! stream listener.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::Session;
use futures::StreamExt;
use std::io;
use tracing::{debug, info};
use uuid::Uuid;

use super::stream::{Connection, StreamEndpoint, StreamTransport};

/// Advertised RFCOMM service
pub struct RfcommTransport {
    service_name: String,
    service_uuid: Uuid,
    channel: u16,
}

impl RfcommTransport {
    pub fn new(service_name: impl Into<String>, service_uuid: Uuid, channel: u16) -> Self {
        Self {
            service_name: service_name.into(),
            service_uuid,
            channel,
        }
    }
}

struct RfcommEndpoint {
    // Keeps the D-Bus connection, and with it the profile, alive
    _session: Session,
    profile: ProfileHandle,
}

fn to_io(e: bluer::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

#[async_trait]
impl StreamEndpoint for RfcommEndpoint {
    async fn accept(&mut self) -> io::Result<Connection> {
        let request = self.profile.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "profile was unregistered")
        })?;
        debug!(device = %request.device(), "Incoming RFCOMM connection");
        let stream = request.accept().map_err(to_io)?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl StreamTransport for RfcommTransport {
    async fn open(&self) -> io::Result<Box<dyn StreamEndpoint>> {
        let session = Session::new().await.map_err(to_io)?;
        let adapter = session.default_adapter().await.map_err(to_io)?;
        adapter.set_powered(true).await.map_err(to_io)?;

        let profile = Profile {
            uuid: self.service_uuid,
            name: Some(self.service_name.clone()),
            channel: Some(self.channel),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let handle = session.register_profile(profile).await.map_err(to_io)?;

        info!(
            adapter = %adapter.name(),
            service = %self.service_name,
            uuid = %self.service_uuid,
            channel = self.channel,
            "RFCOMM service advertised"
        );
        Ok(Box::new(RfcommEndpoint {
            _session: session,
            profile: handle,
        }))
    }

    fn ends_on_short_read(&self) -> bool {
        true
    }
}
