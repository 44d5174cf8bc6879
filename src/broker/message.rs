//! Message definitions for the broker
//!
//! `MessageMeta` is the envelope handed from producers to the broker and from
//! the broker to consumers. The broker never inspects or mutates it.
//!
//! Notes on fields:
//! - `id`: unique message id, generated on creation
//! - `parent_id`: id of the message this one was derived from (answers and
//!   error-topic copies are children of the message they respond to)
//! - `created_at`: creation time in UTC
//! - `payload`: JSON body
//! - `error`: set only on copies routed to an error topic
//!
//! `DeliveryId` is the queue-local handle of one delivery. It is unrelated to
//! `MessageMeta::id`: the same message gets a new delivery id every time it
//! is published.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub error: Option<MessageError>,
}

/// Classification attached to a message that failed processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub kind: String,
    pub message: String,
}

impl MessageMeta {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            created_at: Utc::now(),
            payload,
            error: None,
        }
    }

    /// Create a new message whose `parent_id` points at `self`.
    pub fn create_child(&self, payload: serde_json::Value) -> Self {
        Self {
            parent_id: Some(self.id),
            ..Self::new(payload)
        }
    }

    pub fn with_error(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(MessageError {
            kind: kind.into(),
            message: message.into(),
        });
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryId(u64);

impl DeliveryId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for DeliveryId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message waiting in, or reserved from, a topic queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub id: DeliveryId,
    pub message: MessageMeta,
}
