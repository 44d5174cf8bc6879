//! The `error` module defines the error type returned by broker operations.
//!
//! Stale acknowledgements are deliberately absent: acking or rejecting a
//! delivery that is no longer in flight is a silent no-op, not a failure.

use std::time::Duration;

use thiserror::Error;

use crate::broker::message::DeliveryId;

/// Error returned by a message handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// `start_consuming` was called on a broker that is already consuming.
    #[error("broker is already consuming")]
    AlreadyConsuming,

    #[error("queue '{topic}' is empty")]
    QueueEmpty { topic: String },

    /// No answer arrived on the correlated topic within `max_delay`.
    #[error("no answer on '{topic}' for '{answer_id}' within {max_delay:?}")]
    AnswerTimeout {
        topic: String,
        answer_id: String,
        max_delay: Duration,
    },

    #[error("prefetch for consumer of '{topic}' must be greater than zero")]
    InvalidPrefetch { topic: String },

    #[error("broker is unavailable after {attempts} connection attempts")]
    Connection { attempts: u32 },

    /// A handler failed; the delivery stays in flight and is redelivered on
    /// the next dispatch.
    #[error("handler failed on '{topic}' for delivery {delivery_id}")]
    Handler {
        topic: String,
        delivery_id: DeliveryId,
        #[source]
        source: HandlerError,
    },
}
