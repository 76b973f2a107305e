pub mod config;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod topic;

pub mod kafka;
pub mod producer;

pub use crate::config::{OverflowStrategy, ProducerConfig};
pub use error::{Error, Result};
pub use producer::{EnqueueResult, Producer, ProducerState, QueueItem, TopicProducer};
pub use registry::ProducerRegistry;
pub use topic::TopicDescriptor;
