pub mod engine;
pub mod manager;
pub mod message;
pub mod topic;

pub use engine::{BrokerState, MemoryBroker};
pub use manager::MessageManager;
pub use message::{DeliveryId, MessageError, MessageMeta, QueuedMessage};
pub use topic::{Handler, ListenerId, TopicQueue};
