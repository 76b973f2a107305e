use crate::config::ProducerConfig;
use crate::producer::QueueItem;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Broker confirmation of one written record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub acknowledged_at: DateTime<Utc>,
}

/// Write path to the broker for a single topic.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Writes one record and waits for the broker acknowledgment.
    async fn write(&self, item: &QueueItem) -> Result<Ack>;

    /// Waits for records handed to the client but not yet acknowledged.
    async fn flush(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Builds the [`RecordWriter`] of each registered producer.
pub trait WriterFactory: Send + Sync {
    fn create(&self, config: &ProducerConfig) -> Result<Arc<dyn RecordWriter>>;
}

pub struct KafkaWriter {
    producer: FutureProducer,
    topic: String,
}

impl KafkaWriter {
    pub fn new(config: &ProducerConfig) -> Result<Self> {
        let mut client = ClientConfig::new();
        for (key, value) in &config.client_properties {
            client.set(key, value);
        }
        let producer: FutureProducer = client
            .set("bootstrap.servers", &config.bootstrap_servers)
            .create()
            .map_err(Error::Broker)?;

        debug!(
            topic = %config.topic_name,
            bootstrap_servers = %config.bootstrap_servers,
            "Kafka writer created"
        );

        Ok(Self {
            producer,
            topic: config.topic_name.clone(),
        })
    }
}

#[async_trait]
impl RecordWriter for KafkaWriter {
    async fn write(&self, item: &QueueItem) -> Result<Ack> {
        let mut record = FutureRecord::<str, [u8]>::to(&self.topic).payload(&item.payload[..]);
        if let Some(key) = item.key.as_deref() {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::Never)
            .await
            .map_err(|(e, _)| Error::Broker(e))?;

        Ok(Ack {
            topic: self.topic.clone(),
            partition,
            offset,
            acknowledged_at: Utc::now(),
        })
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(result) => result.map_err(Error::Broker),
            Err(e) => {
                warn!("Flush task failed: {}", e);
                Ok(())
            }
        }
    }
}

/// Creates a [`KafkaWriter`] per producer.
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaWriterFactory;

impl WriterFactory for KafkaWriterFactory {
    fn create(&self, config: &ProducerConfig) -> Result<Arc<dyn RecordWriter>> {
        Ok(Arc::new(KafkaWriter::new(config)?))
    }
}
