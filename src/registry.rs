//! Registry of topic producers owned by the service context.
//!
//! The registry is an ordinary value: build it once at service start-up and
//! hand out references (or an `Arc`) to whoever needs to publish.
//!
//! # Example
//!
//! ```rust,no_run
//! use topic_producer::kafka::{JsonSerializer, KeyStrategy};
//! use topic_producer::{ProducerRegistry, TopicDescriptor};
//!
//! # async fn example() -> topic_producer::Result<()> {
//! let config = topic_producer::config::load("config.toml")?;
//! let registry = ProducerRegistry::from_config(config)?;
//!
//! let orders = TopicDescriptor::<serde_json::Value>::of("orders");
//! registry
//!     .register_keyed(
//!         &orders,
//!         JsonSerializer::default(),
//!         KeyStrategy::FieldPath("id".to_string()),
//!     )
//!     .await?;
//!
//! let producer = registry.get(&orders).await?;
//! producer.enqueue(&serde_json::json!({"id": 1})).await?;
//!
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::ProducerConfig;
use crate::discovery::{ServiceLocator, StaticServiceLocator};
use crate::kafka::{KafkaWriterFactory, MessageSerializer, PartitionKeyStrategy, WriterFactory};
use crate::producer::{Producer, TopicProducer};
use crate::topic::TopicDescriptor;
use crate::{Error, Result};
use futures::future::join_all;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

struct Registration {
    record_type: &'static str,
    producer: Arc<Producer>,
    handle: Box<dyn Any + Send + Sync>,
}

pub struct ProducerRegistry {
    config: config::Config,
    locator: Arc<dyn ServiceLocator>,
    writers: Arc<dyn WriterFactory>,
    producers: Mutex<HashMap<String, Registration>>,
}

impl ProducerRegistry {
    pub fn new(
        config: config::Config,
        locator: Arc<dyn ServiceLocator>,
        writers: Arc<dyn WriterFactory>,
    ) -> Self {
        Self {
            config,
            locator,
            writers,
            producers: Mutex::new(HashMap::new()),
        }
    }

    /// Kafka-backed registry resolving service names from the `services`
    /// table of `config`.
    pub fn from_config(config: config::Config) -> Result<Self> {
        let locator = StaticServiceLocator::from_config(&config)?;
        Ok(Self::new(config, Arc::new(locator), Arc::new(KafkaWriterFactory)))
    }

    /// Registers an unkeyed producer for `descriptor`.
    pub async fn register<T, S>(
        &self,
        descriptor: &TopicDescriptor<T>,
        serializer: S,
    ) -> Result<TopicProducer<T>>
    where
        T: Send + Sync + 'static,
        S: MessageSerializer<T> + 'static,
    {
        self.register_with(descriptor, |producer| TopicProducer::new(producer, serializer))
            .await
    }

    /// Registers a producer for `descriptor` whose records are keyed by
    /// `key_strategy`.
    pub async fn register_keyed<T, S, K>(
        &self,
        descriptor: &TopicDescriptor<T>,
        serializer: S,
        key_strategy: K,
    ) -> Result<TopicProducer<T>>
    where
        T: Send + Sync + 'static,
        S: MessageSerializer<T> + 'static,
        K: PartitionKeyStrategy<T> + 'static,
    {
        self.register_with(descriptor, |producer| {
            TopicProducer::new(producer, serializer).with_key_strategy(key_strategy)
        })
        .await
    }

    /// Registration is idempotent per topic: a second call with the same
    /// record type returns the existing producer unchanged, another record
    /// type is rejected. Concurrent calls are serialized.
    #[instrument(skip(self, build), fields(topic = %descriptor.name()))]
    async fn register_with<T, F>(
        &self,
        descriptor: &TopicDescriptor<T>,
        build: F,
    ) -> Result<TopicProducer<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<Producer>) -> TopicProducer<T>,
    {
        let mut producers = self.producers.lock().await;

        if let Some(existing) = producers.get(descriptor.name()) {
            return downcast(descriptor, existing);
        }

        let settings =
            ProducerConfig::resolve(descriptor.name(), &self.config, self.locator.as_ref()).await?;
        let writer = self.writers.create(&settings)?;
        let producer = Arc::new(Producer::start(settings, writer));
        let handle = build(Arc::clone(&producer));

        producers.insert(
            descriptor.name().to_string(),
            Registration {
                record_type: descriptor.record_type(),
                producer,
                handle: Box::new(handle.clone()),
            },
        );
        info!(record_type = descriptor.record_type(), "Registered topic producer");

        Ok(handle)
    }

    /// Looks up the producer registered for `descriptor`.
    pub async fn get<T: 'static>(&self, descriptor: &TopicDescriptor<T>) -> Result<TopicProducer<T>> {
        let producers = self.producers.lock().await;
        match producers.get(descriptor.name()) {
            Some(existing) => downcast(descriptor, existing),
            None => Err(Error::NotRegistered {
                topic: descriptor.name().to_string(),
                record_type: descriptor.record_type(),
            }),
        }
    }

    pub async fn topics(&self) -> Vec<String> {
        self.producers.lock().await.keys().cloned().collect()
    }

    /// Drains and stops every registered producer concurrently.
    pub async fn shutdown(&self) {
        let producers: Vec<Arc<Producer>> = self
            .producers
            .lock()
            .await
            .values()
            .map(|registration| Arc::clone(&registration.producer))
            .collect();

        let results = join_all(producers.iter().map(|producer| producer.shutdown())).await;
        for (producer, result) in producers.iter().zip(results) {
            if let Err(e) = result {
                error!(topic = %producer.config().topic_name, "Producer shutdown failed: {}", e);
            }
        }
    }
}

fn downcast<T: 'static>(
    descriptor: &TopicDescriptor<T>,
    registration: &Registration,
) -> Result<TopicProducer<T>> {
    registration
        .handle
        .downcast_ref::<TopicProducer<T>>()
        .cloned()
        .ok_or_else(|| Error::TopicConflict {
            topic: descriptor.name().to_string(),
            registered: registration.record_type,
            requested: descriptor.record_type(),
        })
}
