//! Fixed-capacity publish queue with a configurable overflow strategy.
//!
//! Any number of tasks may enqueue concurrently; exactly one consumer (the
//! sink) drains the queue with [`BoundedQueue::next`] and
//! [`BoundedQueue::commit`]. An item stays at the head until it is committed,
//! so a failed write never loses it.

use crate::config::OverflowStrategy;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error};

/// Outcome of offering an item to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The item is queued for delivery.
    Enqueued,
    /// The overflow strategy discarded the new item.
    Dropped,
    /// The queue no longer accepts items.
    QueueClosed,
    /// The queue overflowed under the `fail` strategy and is terminally failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Failed,
}

struct Entry<T> {
    seq: u64,
    item: T,
}

struct State<T> {
    entries: VecDeque<Entry<T>>,
    next_seq: u64,
    status: Status,
}

pub struct BoundedQueue<T> {
    capacity: usize,
    strategy: OverflowStrategy,
    state: Mutex<State<T>>,
    item_available: Notify,
    space_available: Notify,
}

impl<T: Clone> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize, strategy: OverflowStrategy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            strategy,
            state: Mutex::new(State {
                entries: VecDeque::with_capacity(capacity),
                next_seq: 0,
                status: Status::Open,
            }),
            item_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offers `item` to the queue.
    ///
    /// Returns immediately for every strategy except
    /// [`OverflowStrategy::Backpressure`], which waits for free space. The wait
    /// is cancel-safe: dropping the future leaves the queue untouched.
    pub async fn enqueue(&self, item: T) -> EnqueueResult {
        let mut item = Some(item);
        loop {
            let space = self.space_available.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            if let Some(result) = self.try_enqueue(&mut item) {
                return result;
            }

            space.await;
        }
    }

    /// Returns `None` only when the item must wait for space.
    fn try_enqueue(&self, slot: &mut Option<T>) -> Option<EnqueueResult> {
        let mut state = self.lock();
        match state.status {
            Status::Closed => return Some(EnqueueResult::QueueClosed),
            Status::Failed => return Some(EnqueueResult::Failed),
            Status::Open => {}
        }

        if state.entries.len() >= self.capacity {
            match self.strategy {
                OverflowStrategy::DropHead => {
                    state.entries.pop_front();
                    debug!("Queue full, dropped oldest item");
                }
                OverflowStrategy::DropBuffer => {
                    let dropped = state.entries.len();
                    state.entries.clear();
                    debug!("Queue full, dropped {} buffered items", dropped);
                }
                OverflowStrategy::DropTail | OverflowStrategy::DropNew => {
                    debug!("Queue full, dropped new item");
                    return Some(EnqueueResult::Dropped);
                }
                OverflowStrategy::Backpressure => return None,
                OverflowStrategy::Fail => {
                    error!(capacity = self.capacity, "Queue overflowed, failing");
                    state.status = Status::Failed;
                    drop(state);
                    self.wake_all();
                    return Some(EnqueueResult::Failed);
                }
            }
        }

        let item = slot.take()?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push_back(Entry { seq, item });
        drop(state);

        self.item_available.notify_one();
        Some(EnqueueResult::Enqueued)
    }

    /// Waits for the head item without removing it.
    ///
    /// Returns `None` once the queue is closed (or failed) and empty.
    pub async fn next(&self) -> Option<(u64, T)> {
        loop {
            let available = self.item_available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            {
                let state = self.lock();
                if let Some(entry) = state.entries.front() {
                    return Some((entry.seq, entry.item.clone()));
                }
                if state.status != Status::Open {
                    return None;
                }
            }

            available.await;
        }
    }

    /// Removes the head item if it is still the one returned by `next`.
    ///
    /// The head may already be gone when an overflow strategy evicted it
    /// while it was being written.
    pub fn commit(&self, seq: u64) {
        let mut state = self.lock();
        if state.entries.front().map(|entry| entry.seq) == Some(seq) {
            state.entries.pop_front();
            drop(state);
            self.space_available.notify_one();
        }
    }

    /// Stops accepting items. Queued items remain available to `next`.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.status == Status::Open {
            state.status = Status::Closed;
        }
        drop(state);
        self.wake_all();
    }

    /// True once closed or terminally failed.
    pub fn is_closed(&self) -> bool {
        self.lock().status != Status::Open
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the queued items, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock()
            .entries
            .iter()
            .map(|entry| entry.item.clone())
            .collect()
    }

    fn wake_all(&self) {
        self.item_available.notify_waiters();
        self.space_available.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn filled(strategy: OverflowStrategy, items: &[&'static str]) -> BoundedQueue<&'static str> {
        let queue = BoundedQueue::new(2, strategy);
        for item in items {
            assert_eq!(queue.enqueue(*item).await, EnqueueResult::Enqueued);
        }
        queue
    }

    #[tokio::test]
    async fn test_drop_head_evicts_oldest() {
        let queue = filled(OverflowStrategy::DropHead, &["a", "b"]).await;

        assert_eq!(queue.enqueue("c").await, EnqueueResult::Enqueued);
        assert_eq!(queue.snapshot(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_drop_new_and_drop_tail_reject_newest() {
        for strategy in [OverflowStrategy::DropNew, OverflowStrategy::DropTail] {
            let queue = filled(strategy, &["a", "b"]).await;

            assert_eq!(queue.enqueue("c").await, EnqueueResult::Dropped);
            assert_eq!(queue.snapshot(), vec!["a", "b"]);
        }
    }

    #[tokio::test]
    async fn test_drop_buffer_clears_queue() {
        let queue = filled(OverflowStrategy::DropBuffer, &["a", "b"]).await;

        assert_eq!(queue.enqueue("c").await, EnqueueResult::Enqueued);
        assert_eq!(queue.snapshot(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_fail_is_terminal() {
        let queue = filled(OverflowStrategy::Fail, &["a", "b"]).await;
        assert!(!queue.is_closed());

        assert_eq!(queue.enqueue("c").await, EnqueueResult::Failed);
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue("d").await, EnqueueResult::Failed);
        assert_eq!(queue.snapshot(), vec!["a", "b"]);

        // Items accepted before the failure can still be drained.
        let (seq, item) = queue.next().await.unwrap();
        assert_eq!(item, "a");
        queue.commit(seq);
        let (seq, _) = queue.next().await.unwrap();
        queue.commit(seq);
        assert!(queue.is_empty());
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_non_blocking_strategies_never_wait() {
        for strategy in [
            OverflowStrategy::DropHead,
            OverflowStrategy::DropTail,
            OverflowStrategy::DropBuffer,
            OverflowStrategy::DropNew,
        ] {
            let queue = BoundedQueue::new(3, strategy);
            for i in 0..4 {
                let result = timeout(Duration::from_millis(100), queue.enqueue(i)).await;
                assert!(result.is_ok(), "{} blocked on item {}", strategy, i);
            }
            assert!(queue.len() <= queue.capacity());
        }
    }

    #[tokio::test]
    async fn test_backpressure_waits_for_space() {
        let queue = Arc::new(filled(OverflowStrategy::Backpressure, &["a", "b"]).await);

        let blocked = timeout(Duration::from_millis(50), queue.enqueue("c")).await;
        assert!(blocked.is_err(), "enqueue should wait while the queue is full");
        assert_eq!(queue.snapshot(), vec!["a", "b"]);

        let writer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue("c").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (seq, _) = queue.next().await.unwrap();
        queue.commit(seq);

        assert_eq!(writer.await.unwrap(), EnqueueResult::Enqueued);
        assert_eq!(queue.snapshot(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_close_releases_waiting_producers() {
        let queue = Arc::new(filled(OverflowStrategy::Backpressure, &["a", "b"]).await);

        let writer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue("c").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(queue.is_closed());

        assert_eq!(writer.await.unwrap(), EnqueueResult::QueueClosed);
        assert_eq!(queue.enqueue("d").await, EnqueueResult::QueueClosed);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_head_survives_uncommitted_read() {
        let queue = filled(OverflowStrategy::DropHead, &["a", "b"]).await;

        let (_, first) = queue.next().await.unwrap();
        let (seq, again) = queue.next().await.unwrap();
        assert_eq!(first, again);

        queue.commit(seq);
        assert_eq!(queue.snapshot(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_commit_after_eviction_keeps_newer_items() {
        let queue = filled(OverflowStrategy::DropHead, &["a", "b"]).await;

        let (seq, item) = queue.next().await.unwrap();
        assert_eq!(item, "a");
        queue.enqueue("c").await;

        queue.commit(seq);
        assert_eq!(queue.snapshot(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_next_wakes_on_enqueue() {
        let queue = Arc::new(BoundedQueue::new(4, OverflowStrategy::DropHead));

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("a").await;

        let (_, item) = timeout(Duration::from_secs(1), reader).await.unwrap().unwrap().unwrap();
        assert_eq!(item, "a");
    }
}
