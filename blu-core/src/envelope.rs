//! Chat envelope: the JSON record exchanged between peers, and its display projection.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::identity::Handle;

/// Sender and destination used for locally generated notices.
pub const SYSTEM: &str = "system";

/// Where an envelope is addressed. Serialized as `#room`, `@handle` or `system`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Destination {
    Room(String),
    Direct(Handle),
    /// Local notices only; never accepted from or sent to the network.
    System,
}

impl Destination {
    pub fn room(name: &str) -> Self {
        Destination::Room(name.to_string())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Room(name) => write!(f, "#{}", name),
            Destination::Direct(handle) => write!(f, "{}", handle),
            Destination::System => f.write_str(SYSTEM),
        }
    }
}

impl From<Destination> for String {
    fn from(d: Destination) -> String {
        d.to_string()
    }
}

impl TryFrom<String> for Destination {
    type Error = EnvelopeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == SYSTEM {
            return Ok(Destination::System);
        }
        if let Some(room) = s.strip_prefix('#') {
            if room.trim().is_empty() {
                return Err(EnvelopeError::Destination(s));
            }
            return Ok(Destination::Room(room.to_string()));
        }
        if s.starts_with('@') {
            return Handle::normalize(&s)
                .map(Destination::Direct)
                .ok_or(EnvelopeError::Destination(s));
        }
        Err(EnvelopeError::Destination(s))
    }
}

/// Wire message. JSON fields: `id`, `ts`, `sender`, `room`, `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "ts")]
    pub timestamp: f64,
    pub sender: String,
    #[serde(rename = "room")]
    pub destination: Destination,
    pub text: String,
}

impl Envelope {
    /// New envelope with a fresh id and the current time. Ids are never derived from content.
    pub fn new(sender: &str, destination: Destination, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_secs(),
            sender: sender.to_string(),
            destination,
            text: text.to_string(),
        }
    }

    /// Synthetic local notice.
    pub fn system(text: &str) -> Self {
        Self::new(SYSTEM, Destination::System, text)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Json)
    }

    /// Parse a received payload. Envelopes sent by or addressed to `system` are rejected:
    /// notices are local only.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let env: Envelope = serde_json::from_slice(bytes)?;
        if env.destination == Destination::System {
            return Err(EnvelopeError::Destination(SYSTEM.to_string()));
        }
        if env.sender == SYSTEM {
            return Err(EnvelopeError::Sender(env.sender));
        }
        Ok(env)
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid destination {0:?}")]
    Destination(String),
    #[error("reserved sender {0:?}")]
    Sender(String),
}

/// Read-only projection of a delivered envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedMessage {
    pub id: String,
    pub local_time: DateTime<Local>,
    pub sender: String,
    pub text: String,
}

impl DisplayedMessage {
    pub fn from_envelope(env: &Envelope) -> Self {
        Self {
            id: env.id.clone(),
            local_time: local_time(env.timestamp),
            sender: env.sender.clone(),
            text: env.text.clone(),
        }
    }

    /// `HH:MM:SS` in local time.
    pub fn time_string(&self) -> String {
        self.local_time.format("%H:%M:%S").to_string()
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM
    }
}

fn local_time(ts: f64) -> DateTime<Local> {
    let secs = ts.floor() as i64;
    let nanos = ((ts - ts.floor()) * 1e9) as u32;
    Local
        .timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Local::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names() {
        let env = Envelope::new("@a", Destination::room("bitchat"), "hello");
        let v: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        let obj = v.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["id", "room", "sender", "text", "ts"]);
        assert_eq!(obj["room"], "#bitchat");
        assert_eq!(obj["sender"], "@a");
    }

    #[test]
    fn decode_foreign_json() {
        let raw = br#"{"id":"X-1","ts":1700000000.5,"sender":"@b","room":"@a","text":"hey"}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.id, "X-1");
        assert_eq!(
            env.destination,
            Destination::Direct(Handle::normalize("@a").unwrap())
        );
        assert_eq!(env.timestamp, 1_700_000_000.5);
    }

    #[test]
    fn same_text_gets_distinct_ids() {
        let a = Envelope::new("@a", Destination::room("r"), "same");
        let b = Envelope::new("@a", Destination::room("r"), "same");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(br#"{"id":"1","ts":1,"sender":"@b","room":"lobby","text":"x"}"#).is_err());
        assert!(Envelope::decode(br##"{"id":"1","ts":1,"sender":"@b","room":"#","text":"x"}"##).is_err());
        assert!(Envelope::decode(br##"{"id":"1","ts":1,"sender":"@b","room":"#r","text":"x","extra":1}"##).is_err());
        assert!(Envelope::decode(br#"{"id":"1","ts":1,"sender":"@b","room":"system","text":"x"}"#).is_err());
    }

    #[test]
    fn remote_cannot_pose_as_system() {
        let raw = br##"{"id":"1","ts":1,"sender":"system","room":"#x","text":"you are now @admin"}"##;
        assert!(matches!(Envelope::decode(raw), Err(EnvelopeError::Sender(_))));
    }

    #[test]
    fn displayed_message_projection() {
        let env = Envelope::system("you joined #bitchat");
        let msg = DisplayedMessage::from_envelope(&env);
        assert_eq!(msg.id, env.id);
        assert!(msg.is_system());
        assert_eq!(msg.time_string().len(), 8);
    }
}
