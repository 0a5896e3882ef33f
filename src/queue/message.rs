use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A message taken off a channel.
///
/// Built by the dispatch engine when a pop succeeds and shared read-only
/// (behind an `Arc`) with every consumer of the fan-out.
#[derive(Debug, Clone)]
pub struct Message {
    id: Uuid,
    channel: String,
    payload: Vec<u8>,
    received_at: DateTime<Utc>,
}

impl Message {
    pub(crate) fn new(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Local identifier assigned when the message was popped. Not stored in Redis.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Channel the message was popped from
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.channel,
            String::from_utf8_lossy(&self.payload)
        )
    }
}
