//! Error types and result handling for topic-producer.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Outcomes that are expected under an overflow policy (a dropped record, a
//! closed queue) are not errors; they are reported through
//! [`EnqueueResult`](crate::producer::EnqueueResult).
//!
//! # Example
//!
//! ```rust
//! use topic_producer::{Error, Result};
//!
//! fn check_buffer_size(size: i64) -> Result<usize> {
//!     if size <= 0 {
//!         return Err(Error::InvalidConfiguration(format!(
//!             "buffer-size must be positive, got {}",
//!             size
//!         )));
//!     }
//!     Ok(size as usize)
//! }
//!
//! match check_buffer_size(0) {
//!     Ok(size) => println!("Buffer size: {}", size),
//!     Err(Error::InvalidConfiguration(msg)) => eprintln!("Bad config: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// The main error type for topic-producer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Failure to load or read the configuration source.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configuration value is present but unusable, e.g. an unknown
    /// overflow strategy or a malformed duration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Service discovery did not answer within the allowed time.
    #[error("Timed out after {timeout:?} resolving service '{service}'")]
    ResolutionTimeout {
        /// Logical service name being resolved
        service: String,
        /// Bound that was exceeded
        timeout: Duration,
    },

    /// Service discovery failed or returned no usable address.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Kafka client, transport or protocol error.
    #[error("Broker error: {0}")]
    Broker(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding records or keys.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No producer is registered for the requested topic.
    #[error("Topic with name {topic} and record type {record_type} is not registered")]
    NotRegistered {
        /// Topic identifier
        topic: String,
        /// Record type that was requested
        record_type: &'static str,
    },

    /// The topic is already registered with a different record type.
    #[error("Topic {topic} is registered with record type {registered}, not {requested}")]
    TopicConflict {
        /// Topic identifier
        topic: String,
        /// Record type of the existing producer
        registered: &'static str,
        /// Record type of the rejected registration
        requested: &'static str,
    },

    /// The producer has been shut down.
    #[error("Producer for topic {0} is stopped")]
    ProducerStopped(String),
}

/// A convenient Result type alias for topic-producer operations.
///
/// This is equivalent to `std::result::Result<T, topic_producer::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
