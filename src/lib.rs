//! # membroker
//!
//! `membroker` is an in-process, topic-addressed message broker. It stands in
//! for a networked broker (Kafka, RabbitMQ, ...) inside worker-pipeline hosts
//! and tests: same operations, no network, no background threads.
//!
//! Delivery is at-least-once. Each topic queue hands out one delivery at a
//! time; handlers ack it (gone for good) or reject it (back to the head of
//! the queue) through the `MessageManager` they receive.
//!
//! ## Core Modules
//!
//! - `broker`: topic queues, message envelope and the `MemoryBroker` engine.
//! - `config`: layered settings (defaults, file, `.env`, environment).
//! - `utils`: error type and logging bootstrap.
//!
//! ```
//! use membroker::{MemoryBroker, MessageMeta};
//! use serde_json::json;
//!
//! let broker = MemoryBroker::default();
//! broker.initialize(["orders"], Vec::<String>::new());
//! broker
//!     .add_consumer("orders", 1, |message: &MessageMeta, manager| {
//!         println!("got {}", message.payload);
//!         manager.ack();
//!         Ok(())
//!     })
//!     .unwrap();
//! broker.publish("orders", [MessageMeta::new(json!({"sku": 1}))]).unwrap();
//! broker.start_consuming().unwrap();
//! assert_eq!(broker.get_topic_approximate_messages_count("orders"), 0);
//! ```

pub mod broker;
pub mod config;
pub mod utils;

pub use broker::{MemoryBroker, MessageManager, MessageMeta};
pub use utils::error::{BrokerError, Result};
