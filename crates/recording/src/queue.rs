use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// What to evict when a full queue receives another frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Evict the head; keeps latency bounded at the cost of older content.
    Oldest,
    /// Reject the incoming frame; keeps what was already queued.
    Newest,
}

/// Fixed-capacity FIFO between a capture producer and the writer loop.
/// Absorbs brief writer stalls without unbounded growth; eviction is counted
/// but never retried.
pub struct BoundedFrameQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    policy: DropPolicy,
    dropped: AtomicU64,
}

impl<T> BoundedFrameQueue<T> {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the frame that was evicted, if any.
    pub fn push(&self, item: T) -> Option<T> {
        let mut queue = self.inner.lock();

        if queue.len() < self.capacity {
            queue.push_back(item);
            return None;
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        match self.policy {
            DropPolicy::Oldest => {
                let evicted = queue.pop_front();
                queue.push_back(item);
                evicted
            }
            DropPolicy::Newest => Some(item),
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_keeps_newest_frames() {
        let queue = BoundedFrameQueue::new(2, DropPolicy::Oldest);

        assert!(queue.push(1).is_none());
        assert!(queue.push(2).is_none());
        assert_eq!(queue.push(3), Some(1));

        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn drop_newest_rejects_incoming() {
        let queue = BoundedFrameQueue::new(2, DropPolicy::Newest);

        queue.push(1);
        queue.push(2);
        assert_eq!(queue.push(3), Some(3));

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let queue = BoundedFrameQueue::new(0, DropPolicy::Oldest);

        assert!(queue.push(1).is_none());
        assert_eq!(queue.len(), 1);
    }
}
