//! Notification wire protocol
//!
//! Payloads pushed by the phone are decoded here; the client half is used by
//! the `send` subcommand to push test payloads to a running notifier.

pub mod client;
pub mod protocol;

pub use client::{send_datagram, send_stream};
pub use protocol::{decode, decode_str, DecodeError, EventType, Notification};

/// Well-known port used by the phone for both UDP and TCP delivery
pub const DEFAULT_PORT: u16 = 10600;
