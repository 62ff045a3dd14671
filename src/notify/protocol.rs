//! Wire format for notifications pushed by the phone
//!
//! A payload is a single `/`-separated line in one of two layouts:
//!
//! ```text
//! v1: <device_id>/<notification_id>/<event_type>/<contents...>
//! v2: v2/<device_id>/<notification_id>/<event_type>/<data>/<contents...>
//! ```
//!
//! The contents may contain `/` themselves, so every trailing field is
//! joined back together.

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const FIELD_SEPARATOR: char = '/';
const V2_MARKER: &str = "v2";

const V1_MIN_FIELDS: usize = 4;
const V2_MIN_FIELDS: usize = 5;

/// Errors produced while decoding a payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload has {found} fields, {version} requires at least {expected}")]
    TooFewFields {
        version: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Kind of event reported by the phone
///
/// Unknown type strings are kept verbatim so they can still reach the
/// display action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Ring,
    Battery,
    Sms,
    Mms,
    Ping,
    User,
    Unknown(String),
}

impl EventType {
    /// Case-sensitive match against the known wire names
    pub fn from_wire(s: &str) -> Self {
        match s {
            "RING" => EventType::Ring,
            "BATTERY" => EventType::Battery,
            "SMS" => EventType::Sms,
            "MMS" => EventType::Mms,
            "PING" => EventType::Ping,
            "USER" => EventType::User,
            other => EventType::Unknown(other.to_string()),
        }
    }

    /// Name as it appears on the wire
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Ring => "RING",
            EventType::Battery => "BATTERY",
            EventType::Sms => "SMS",
            EventType::Mms => "MMS",
            EventType::Ping => "PING",
            EventType::User => "USER",
            EventType::Unknown(raw) => raw,
        }
    }

    /// Prefix used for per-type preference keys (`sms.display`, ...)
    pub fn preference_prefix(&self) -> String {
        self.as_str().to_lowercase()
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventType::Unknown(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A decoded notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Identifier of the sending device
    pub device_id: String,
    /// Sender-assigned id, only unique within the device's recent history
    pub notification_id: String,
    pub event_type: EventType,
    /// Type-specific extra payload (empty for v1)
    pub data: String,
    /// Human-readable body
    pub contents: String,
    /// The undecoded payload
    pub raw: String,
}

/// Decode one payload received from a transport
pub fn decode(payload: &[u8]) -> Result<Notification, DecodeError> {
    let raw = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
    decode_str(raw)
}

/// Decode an already validated UTF-8 payload
pub fn decode_str(raw: &str) -> Result<Notification, DecodeError> {
    let parts: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();

    if parts[0] == V2_MARKER {
        if parts.len() < V2_MIN_FIELDS {
            return Err(DecodeError::TooFewFields {
                version: "v2",
                expected: V2_MIN_FIELDS,
                found: parts.len(),
            });
        }
        Ok(Notification {
            device_id: parts[1].to_string(),
            notification_id: parts[2].to_string(),
            event_type: EventType::from_wire(parts[3]),
            data: parts[4].to_string(),
            contents: join_from(&parts, 5),
            raw: raw.to_string(),
        })
    } else {
        if parts.len() < V1_MIN_FIELDS {
            return Err(DecodeError::TooFewFields {
                version: "v1",
                expected: V1_MIN_FIELDS,
                found: parts.len(),
            });
        }
        Ok(Notification {
            device_id: parts[0].to_string(),
            notification_id: parts[1].to_string(),
            event_type: EventType::from_wire(parts[2]),
            data: String::new(),
            contents: join_from(&parts, 3),
            raw: raw.to_string(),
        })
    }
}

fn join_from(parts: &[&str], start: usize) -> String {
    parts.get(start..).map(|rest| rest.join("/")).unwrap_or_default()
}

/// Build a v2 payload
pub fn encode_v2(
    device_id: &str,
    notification_id: &str,
    event_type: &EventType,
    data: &str,
    contents: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}/{}",
        V2_MARKER, device_id, notification_id, event_type, data, contents
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_v1() {
        let n = decode(b"dev1/42/SMS/hello/world").unwrap();
        assert_eq!(n.device_id, "dev1");
        assert_eq!(n.notification_id, "42");
        assert_eq!(n.event_type, EventType::Sms);
        assert_eq!(n.data, "");
        assert_eq!(n.contents, "hello/world");
        assert_eq!(n.raw, "dev1/42/SMS/hello/world");
    }

    #[test]
    fn test_decode_v2() {
        let n = decode(b"v2/dev1/42/USER/Title/c1/c2").unwrap();
        assert_eq!(n.device_id, "dev1");
        assert_eq!(n.notification_id, "42");
        assert_eq!(n.event_type, EventType::User);
        assert_eq!(n.data, "Title");
        assert_eq!(n.contents, "c1/c2");
    }

    #[test]
    fn test_decode_v2_without_contents() {
        let n = decode(b"v2/dev1/7/BATTERY/80").unwrap();
        assert_eq!(n.data, "80");
        assert_eq!(n.contents, "");
    }

    #[test]
    fn test_decode_v1_empty_contents() {
        let n = decode(b"dev1/7/RING/").unwrap();
        assert_eq!(n.event_type, EventType::Ring);
        assert_eq!(n.contents, "");
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode(b"dev1/42/SMS"),
            Err(DecodeError::TooFewFields {
                version: "v1",
                expected: 4,
                found: 3
            })
        );
        assert!(matches!(
            decode(b"v2/dev1/42/SMS"),
            Err(DecodeError::TooFewFields { version: "v2", .. })
        ));
        assert!(decode(b"").is_err());
    }

    #[test]
    fn test_decode_invalid_utf8() {
        assert_eq!(decode(&[0xff, 0xfe, b'/']), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_unknown_event_type_is_preserved() {
        let n = decode(b"dev1/1/VOICEMAIL/new message").unwrap();
        assert_eq!(n.event_type, EventType::Unknown("VOICEMAIL".to_string()));
        assert_eq!(n.event_type.preference_prefix(), "voicemail");
    }

    #[test]
    fn test_event_type_is_case_sensitive() {
        assert_eq!(
            EventType::from_wire("sms"),
            EventType::Unknown("sms".to_string())
        );
    }

    #[test]
    fn test_decode_is_deterministic() {
        let payload = b"v2/dev/9/PING//ping";
        assert_eq!(decode(payload), decode(payload));
    }

    #[test]
    fn test_encode_v2_decodes_back() {
        let payload = encode_v2("d", "n", &EventType::Mms, "", "a/b");
        assert_eq!(payload, "v2/d/n/MMS//a/b");
        let n = decode_str(&payload).unwrap();
        assert_eq!(n.contents, "a/b");
        assert_eq!(n.event_type, EventType::Mms);
    }

    #[test]
    fn test_serialize_notification() {
        let n = decode(b"dev1/42/SMS/hi").unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"event_type\":\"SMS\""));
        assert!(json.contains("\"device_id\":\"dev1\""));
    }
}
