//! Bounded FIFO queue joining pipeline stages.
//!
//! `put` suspends while the queue is full (backpressure) instead of dropping
//! or growing. `close` is idempotent and keeps buffered items retrievable:
//! `take` drains them first and only then reports `None`.
//!
//! Invariant: `len() <= capacity()` at all times.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::cancel::CancellationToken;
use crate::RelayError;

/// Why a `put` did not enqueue its item.
#[derive(Debug, PartialEq, Eq)]
pub enum PutError<T> {
    /// The queue was closed; the item is handed back.
    Closed(T),
    /// The token was cancelled while waiting for capacity; the item is dropped.
    Cancelled,
}

impl<T> From<PutError<T>> for RelayError {
    fn from(err: PutError<T>) -> Self {
        match err {
            PutError::Closed(_) => RelayError::QueueClosed,
            PutError::Cancelled => RelayError::Cancelled,
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded multi-producer, multi-consumer FIFO.
pub struct MessageQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_full: Notify,
    not_empty: Notify,
    stalls: AtomicU64,
    high_water: AtomicU64,
}

impl<T> MessageQueue<T> {
    /// Create an empty queue holding at most `capacity` items.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            stalls: AtomicU64::new(0),
            high_water: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of `put` calls that found the queue full and had to wait.
    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    /// Largest number of items buffered at once.
    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::Relaxed) as usize
    }

    /// Enqueue `item`, waiting while the queue is full.
    ///
    /// Fails with [`PutError::Closed`] if the queue is (or becomes) closed
    /// before capacity frees up.
    pub async fn put(&self, item: T) -> Result<(), PutError<T>> {
        let mut stalled = false;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Err(PutError::Closed(item));
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(item);
                    self.high_water
                        .fetch_max(state.items.len() as u64, Ordering::Relaxed);
                    drop(state);
                    self.not_empty.notify_waiters();
                    return Ok(());
                }
            }

            if !stalled {
                stalled = true;
                self.stalls.fetch_add(1, Ordering::Relaxed);
            }
            notified.await;
        }
    }

    /// Like [`put`](Self::put), but gives up when `token` is cancelled.
    pub async fn put_until_cancelled(
        &self,
        item: T,
        token: &CancellationToken,
    ) -> Result<(), PutError<T>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(PutError::Cancelled),
            result = self.put(item) => result,
        }
    }

    /// Dequeue the oldest item, waiting while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn take(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_waiters();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Like [`take`](Self::take), but returns `None` early when `token` is
    /// cancelled, leaving buffered items in place.
    pub async fn take_until_cancelled(&self, token: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            item = self.take() => item,
        }
    }

    /// Close the queue. Idempotent.
    ///
    /// Returns `true` for the call that performed the close. Buffered items
    /// stay retrievable; blocked producers fail and blocked consumers wake.
    pub fn close(&self) -> bool {
        let newly_closed = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if newly_closed {
            self.not_full.notify_waiters();
            self.not_empty.notify_waiters();
        }
        newly_closed
    }

    /// Remove and return everything still buffered.
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.lock().items.drain(..).collect();
        if !items.is_empty() {
            self.not_full.notify_waiters();
        }
        items
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MessageQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_error_into_relay_error() {
        let queue = MessageQueue::new(1);
        queue.close();
        let err: RelayError = queue.put("late").await.unwrap_err().into();
        assert!(matches!(err, RelayError::QueueClosed));
        assert_eq!(err.status_code(), 13);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MessageQueue::new(4);
        for i in 0..4 {
            queue.put(i).await.unwrap();
        }
        assert_eq!(queue.len(), 4);
        for i in 0..4 {
            assert_eq!(queue.take().await, Some(i));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_raised() {
        let queue: MessageQueue<u8> = MessageQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[tokio::test]
    async fn test_huge_capacity_allocates_lazily() {
        let queue = MessageQueue::new(usize::MAX);
        assert_eq!(queue.capacity(), usize::MAX);
        queue.put(1u8).await.unwrap();
        queue.put(2u8).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take().await, Some(1));
    }

    #[tokio::test]
    async fn test_close_keeps_buffered_items() {
        let queue = MessageQueue::new(4);
        queue.put("a").await.unwrap();
        queue.put("b").await.unwrap();

        assert!(queue.close());
        assert!(!queue.close());

        assert_eq!(queue.take().await, Some("a"));
        assert_eq!(queue.take().await, Some("b"));
        assert_eq!(queue.take().await, None);
        assert_eq!(queue.take().await, None);
    }

    #[tokio::test]
    async fn test_put_after_close_returns_item() {
        let queue = MessageQueue::new(1);
        queue.close();
        assert_eq!(queue.put(7).await, Err(PutError::Closed(7)));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let queue = Arc::new(MessageQueue::new(2));
        queue.put(1).await.unwrap();
        queue.put(2).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(3).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stalls(), 1);

        assert_eq!(queue.take().await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.high_water_mark(), 2);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let queue: Arc<MessageQueue<u32>> = Arc::new(MessageQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let taken = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake on close")
            .unwrap();
        assert_eq!(taken, None);
    }

    #[tokio::test]
    async fn test_close_fails_blocked_producer() {
        let queue = Arc::new(MessageQueue::new(1));
        queue.put(1).await.unwrap();
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(2).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should wake on close")
            .unwrap();
        assert_eq!(result, Err(PutError::Closed(2)));
        assert_eq!(queue.take().await, Some(1));
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_put() {
        let queue = MessageQueue::new(1);
        let token = CancellationToken::new();
        queue.put(1).await.unwrap();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel();
            })
        };

        let result = queue.put_until_cancelled(2, &token).await;
        assert_eq!(result, Err(PutError::Cancelled));
        canceller.await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_take() {
        let queue: MessageQueue<u8> = MessageQueue::new(1);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(queue.take_until_cancelled(&token).await, None);
        assert!(!queue.is_closed());
    }

    #[tokio::test]
    async fn test_drain_empties_queue() {
        let queue = MessageQueue::new(3);
        queue.put('x').await.unwrap();
        queue.put('y').await.unwrap();
        assert_eq!(queue.drain(), vec!['x', 'y']);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_single_producer_order_under_contention() {
        let queue = Arc::new(MessageQueue::new(3));
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..100u32 {
                    queue.put(i).await.unwrap();
                }
                queue.close();
            })
        };

        let mut seen = Vec::new();
        while let Some(i) = queue.take().await {
            seen.push(i);
        }
        producer.await.unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert!(queue.high_water_mark() <= 3);
    }
}
