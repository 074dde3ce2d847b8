//! Fixed-capacity FIFO shared by many producers and one consumer.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

/// Bounded multi-producer queue.
///
/// `put` never blocks: at capacity the item is handed straight back. `get`
/// blocks only up to the given timeout so a polling consumer can re-check its
/// running flag.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a zero-capacity crossbeam channel is a
    /// rendezvous channel and would reject every non-blocking insert.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");
        let (tx, rx) = bounded(capacity);
        Self { capacity, tx, rx }
    }

    /// Insert without blocking.
    ///
    /// # Errors
    ///
    /// Returns the item back when the queue is full.
    pub fn put(&self, item: T) -> Result<(), T> {
        // The queue owns both ends, so the disconnected case cannot happen
        // while `self` is alive.
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        })
    }

    /// Wait up to `timeout` for the next item.
    #[must_use]
    pub fn get(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Pop the next item if one is ready.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Current occupancy. Best-effort under concurrent use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Whether the queue is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    /// Maximum number of items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::new(10);
        for i in 0..5 {
            q.put(i).unwrap();
        }
        let drained: Vec<_> = std::iter::from_fn(|| q.try_get()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_full_returns_item() {
        let q = BoundedQueue::new(2);
        q.put("a").unwrap();
        q.put("b").unwrap();

        assert!(q.is_full());
        assert_eq!(q.put("c"), Err("c"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_get_times_out_on_empty() {
        let q = BoundedQueue::<u32>::new(1);
        let start = Instant::now();
        assert!(q.get(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_get_wakes_on_put() {
        let q = Arc::new(BoundedQueue::new(1));
        let producer = Arc::clone(&q);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.put(7).unwrap();
        });
        assert_eq!(q.get(Duration::from_secs(5)), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn test_concurrent_producers_respect_capacity() {
        let q = Arc::new(BoundedQueue::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || (0..20).filter(|i| q.put(t * 100 + i).is_ok()).count())
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(accepted, 50);
        assert_eq!(q.len(), 50);
    }

    #[test]
    #[should_panic(expected = "queue capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = BoundedQueue::<u8>::new(0);
    }
}
