use super::backoff::RestartBackoff;
use super::queue::BoundedQueue;
use super::{ProducerStats, QueueItem};
use crate::kafka::RecordWriter;
use crate::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Background task draining `queue` into `writer`.
///
/// A failed write ends the current incarnation; a new one starts after the
/// backoff delay and retries from the same head item. Restarts are unbounded.
/// The attempt counter only goes back to zero once an incarnation delivered
/// at least one record. The task finishes once the queue is closed and empty.
pub(crate) fn spawn(
    topic: String,
    queue: Arc<BoundedQueue<QueueItem>>,
    writer: Arc<dyn RecordWriter>,
    backoff: RestartBackoff,
    stats: Arc<ProducerStats>,
) -> JoinHandle<()> {
    let span = tracing::info_span!("sink", topic = %topic);
    tokio::spawn(
        async move {
            let mut attempt = 0u32;
            loop {
                let (delivered, result) = drain(&queue, writer.as_ref(), &stats).await;
                match result {
                    Ok(()) => {
                        info!("Queue closed and drained, sink stopping");
                        return;
                    }
                    Err(e) => {
                        if delivered > 0 {
                            attempt = 0;
                        }
                        let delay = backoff.delay(attempt);
                        attempt = attempt.saturating_add(1);
                        stats.restarts.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            error = %e,
                            attempt,
                            delivered,
                            delay_ms = delay.as_millis() as u64,
                            "Sink failed, restarting after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        .instrument(span),
    )
}

/// Runs one incarnation. Returns how many records it delivered together with
/// the error that ended it, if any.
async fn drain(
    queue: &BoundedQueue<QueueItem>,
    writer: &dyn RecordWriter,
    stats: &ProducerStats,
) -> (u64, Result<()>) {
    let mut delivered = 0u64;
    while let Some((seq, item)) = queue.next().await {
        let ack = match writer.write(&item).await {
            Ok(ack) => ack,
            Err(e) => return (delivered, Err(e)),
        };
        queue.commit(seq);
        delivered += 1;
        stats.delivered.fetch_add(1, Ordering::Relaxed);
        debug!(partition = ack.partition, offset = ack.offset, "Record delivered");
    }
    (delivered, Ok(()))
}
