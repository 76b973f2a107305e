//! Buffered topic producers.
//!
//! A [`Producer`] owns one [`BoundedQueue`] and one background sink task for
//! its whole life. Records offered with [`Producer::enqueue`] are written by
//! the sink in queue order; the sink restarts with [`RestartBackoff`] after a
//! failed write and resumes from the record that failed. [`Producer::send`]
//! bypasses the queue and returns the broker acknowledgment to the caller.
//!
//! Lifecycle: `Created -> Running -> Draining -> Stopped`, with no way back.

pub mod backoff;
pub mod queue;
mod sink;

pub use backoff::RestartBackoff;
pub use queue::{BoundedQueue, EnqueueResult};

use crate::config::ProducerConfig;
use crate::kafka::{Ack, MessageSerializer, PartitionKeyStrategy, RecordWriter};
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// A record waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub key: Option<String>,
    pub payload: Bytes,
}

impl QueueItem {
    pub fn new(key: Option<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Counters updated by the sink task.
#[derive(Debug, Default)]
pub struct ProducerStats {
    delivered: AtomicU64,
    restarts: AtomicU64,
}

impl ProducerStats {
    /// Records written by the sink.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Sink restarts after a failed write.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }
}

pub struct Producer {
    config: ProducerConfig,
    queue: Arc<BoundedQueue<QueueItem>>,
    writer: Arc<dyn RecordWriter>,
    stats: Arc<ProducerStats>,
    state: Mutex<ProducerState>,
    sink: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Creates the queue and starts the sink task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ProducerConfig, writer: Arc<dyn RecordWriter>) -> Self {
        let queue = Arc::new(BoundedQueue::new(config.buffer_size, config.overflow_strategy));
        let stats = Arc::new(ProducerStats::default());

        let mut producer = Self {
            queue,
            writer,
            stats,
            state: Mutex::new(ProducerState::Created),
            sink: tokio::sync::Mutex::new(None),
            config,
        };

        let handle = sink::spawn(
            producer.config.topic_name.clone(),
            Arc::clone(&producer.queue),
            Arc::clone(&producer.writer),
            RestartBackoff::from_config(&producer.config),
            Arc::clone(&producer.stats),
        );
        *producer.sink.get_mut() = Some(handle);
        producer.set_state(ProducerState::Running);

        info!(
            topic = %producer.config.topic_name,
            buffer_size = producer.config.buffer_size,
            overflow_strategy = %producer.config.overflow_strategy,
            "Producer started"
        );
        producer
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn state(&self) -> ProducerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued records, oldest first.
    pub fn queued(&self) -> Vec<QueueItem> {
        self.queue.snapshot()
    }

    /// Offers a record to the queue; see [`BoundedQueue::enqueue`].
    pub async fn enqueue(&self, item: QueueItem) -> EnqueueResult {
        self.queue.enqueue(item).await
    }

    /// Writes one record directly to the broker, bypassing the queue.
    ///
    /// No retry is attempted.
    ///
    /// # Errors
    ///
    /// - [`Error::Broker`] when the broker rejects or cannot receive the record
    /// - [`Error::ProducerStopped`] after [`Producer::shutdown`] completed
    pub async fn send(&self, item: QueueItem) -> Result<Ack> {
        if self.state() == ProducerState::Stopped {
            return Err(Error::ProducerStopped(self.config.topic_id.clone()));
        }
        self.writer.write(&item).await
    }

    /// Stops accepting records and waits up to `close-timeout` for the queue
    /// to drain and the writer to flush.
    ///
    /// The drain and the flush share the one `close-timeout` budget. Records
    /// still queued when it elapses are abandoned. Calling this again after
    /// the producer stopped is a no-op.
    #[instrument(skip(self), fields(topic = %self.config.topic_name))]
    pub async fn shutdown(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let Some(mut handle) = sink.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + self.config.close_timeout;
        self.set_state(ProducerState::Draining);
        self.queue.close();
        info!(pending = self.queue.len(), "Draining producer queue");

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Sink task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    abandoned = self.queue.len(),
                    "Close timeout elapsed before the queue drained"
                );
                handle.abort();
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let flushed = self.writer.flush(remaining).await;
        self.set_state(ProducerState::Stopped);
        info!(delivered = self.stats.delivered(), "Producer stopped");
        flushed
    }

    fn set_state(&self, state: ProducerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// A producer dropped without [`Producer::shutdown`] abandons its queue and
/// stops the sink at once.
impl Drop for Producer {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.sink.get_mut().take() {
            handle.abort();
            warn!(
                topic = %self.config.topic_name,
                abandoned = self.queue.len(),
                "Producer dropped without shutdown"
            );
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("topic", &self.config.topic_name)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Typed handle on a [`Producer`]: serializes values and derives their
/// partition key before handing them to the queue or the direct path.
pub struct TopicProducer<T> {
    producer: Arc<Producer>,
    serializer: Arc<dyn MessageSerializer<T>>,
    key_strategy: Option<Arc<dyn PartitionKeyStrategy<T>>>,
}

impl<T> Clone for TopicProducer<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            serializer: Arc::clone(&self.serializer),
            key_strategy: self.key_strategy.clone(),
        }
    }
}

impl<T> TopicProducer<T> {
    pub fn new<S>(producer: Arc<Producer>, serializer: S) -> Self
    where
        S: MessageSerializer<T> + 'static,
    {
        Self {
            producer,
            serializer: Arc::new(serializer),
            key_strategy: None,
        }
    }

    /// Keys every record with `strategy`; records are unkeyed otherwise.
    pub fn with_key_strategy<K>(mut self, strategy: K) -> Self
    where
        K: PartitionKeyStrategy<T> + 'static,
    {
        let strategy: Arc<dyn PartitionKeyStrategy<T>> = Arc::new(strategy);
        self.key_strategy = Some(strategy);
        self
    }

    pub fn producer(&self) -> &Arc<Producer> {
        &self.producer
    }

    /// Serializes `value` and offers it to the queue.
    ///
    /// Only serialization failures are errors; policy outcomes such as
    /// [`EnqueueResult::Dropped`] are returned as values.
    pub async fn enqueue(&self, value: &T) -> Result<EnqueueResult> {
        let item = self.record(value)?;
        Ok(self.producer.enqueue(item).await)
    }

    /// Serializes `value` and writes it directly; see [`Producer::send`].
    pub async fn send(&self, value: &T) -> Result<Ack> {
        let item = self.record(value)?;
        self.producer.send(item).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.producer.shutdown().await
    }

    fn record(&self, value: &T) -> Result<QueueItem> {
        let key = self
            .key_strategy
            .as_ref()
            .and_then(|strategy| strategy.partition_key(value));
        let payload = self.serializer.serialize(value)?;
        Ok(QueueItem::new(key, payload))
    }
}
