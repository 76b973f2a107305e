#![allow(dead_code)]

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use topic_producer::kafka::{Ack, RecordWriter, WriterFactory};
use topic_producer::{Error, ProducerConfig, QueueItem, Result};

/// In-memory broker for a single topic.
pub struct MockWriter {
    topic: String,
    available: AtomicBool,
    delivered: Mutex<Vec<QueueItem>>,
    attempts: Mutex<Vec<Instant>>,
    failures_remaining: AtomicU32,
    rejected_payload: Mutex<Option<Vec<u8>>>,
    next_offset: AtomicI64,
    write_delay_ms: AtomicU64,
    flush_timeouts: Mutex<Vec<Duration>>,
}

impl MockWriter {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            available: AtomicBool::new(true),
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
            rejected_payload: Mutex::new(None),
            next_offset: AtomicI64::new(0),
            write_delay_ms: AtomicU64::new(0),
            flush_timeouts: Mutex::new(Vec::new()),
        }
    }

    /// While unavailable every write fails with a transport error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fails the next `count` writes.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Always rejects records carrying `payload`.
    pub fn reject_payload(&self, payload: &str) {
        *self.rejected_payload.lock().unwrap() = Some(payload.as_bytes().to_vec());
    }

    /// Every write waits `delay` before it succeeds or fails, like a
    /// producer waiting out its message timeout.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Timeouts passed to each flush call.
    pub fn flush_timeouts(&self) -> Vec<Duration> {
        self.flush_timeouts.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<QueueItem> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_payloads(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .map(|item| String::from_utf8(item.payload.to_vec()).unwrap())
            .collect()
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Polls until `count` records were delivered or `timeout` elapsed.
    pub async fn wait_for_delivered(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.delivered.lock().unwrap().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.delivered.lock().unwrap().len() >= count
    }

    fn transport_failure() -> Error {
        Error::Broker(KafkaError::MessageProduction(
            RDKafkaErrorCode::BrokerTransportFailure,
        ))
    }
}

#[async_trait]
impl RecordWriter for MockWriter {
    async fn write(&self, item: &QueueItem) -> Result<Ack> {
        self.attempts.lock().unwrap().push(Instant::now());

        let delay_ms = self.write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(Self::transport_failure());
        }
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Self::transport_failure());
        }
        if self.rejected_payload.lock().unwrap().as_deref() == Some(&item.payload[..]) {
            return Err(Error::Broker(KafkaError::MessageProduction(
                RDKafkaErrorCode::InvalidMessage,
            )));
        }

        self.delivered.lock().unwrap().push(item.clone());
        Ok(Ack {
            topic: self.topic.clone(),
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
            acknowledged_at: chrono::Utc::now(),
        })
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        self.flush_timeouts.lock().unwrap().push(timeout);
        Ok(())
    }
}

/// Hands out one [`MockWriter`] per topic and remembers the settings used.
#[derive(Default)]
pub struct MockWriterFactory {
    writers: Mutex<HashMap<String, Arc<MockWriter>>>,
    configs: Mutex<HashMap<String, ProducerConfig>>,
    created: AtomicUsize,
}

impl MockWriterFactory {
    pub fn writer(&self, topic_id: &str) -> Arc<MockWriter> {
        Arc::clone(&self.writers.lock().unwrap()[topic_id])
    }

    pub fn config(&self, topic_id: &str) -> ProducerConfig {
        self.configs.lock().unwrap()[topic_id].clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl WriterFactory for MockWriterFactory {
    fn create(&self, config: &ProducerConfig) -> Result<Arc<dyn RecordWriter>> {
        let writer = Arc::new(MockWriter::new(&config.topic_name));
        self.writers
            .lock()
            .unwrap()
            .insert(config.topic_id.clone(), Arc::clone(&writer));
        self.configs
            .lock()
            .unwrap()
            .insert(config.topic_id.clone(), config.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(writer)
    }
}

/// Producer settings with short backoffs for tests.
pub fn test_producer_config(
    topic: &str,
    buffer_size: usize,
    strategy: topic_producer::OverflowStrategy,
) -> ProducerConfig {
    let mut config = ProducerConfig::with_defaults(topic, "localhost:9092");
    config.buffer_size = buffer_size;
    config.overflow_strategy = strategy;
    config.min_backoff = Duration::from_millis(20);
    config.max_backoff = Duration::from_millis(100);
    config.random_factor = 0.2;
    config.close_timeout = Duration::from_secs(5);
    config
}

pub fn config_from_toml(toml: &str) -> config::Config {
    config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()
        .unwrap()
}
