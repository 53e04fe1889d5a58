//! Bounded frame channel with drop-oldest overflow.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO. `push` never blocks: when full it evicts the
/// oldest item. `pop` blocks until an item arrives or the channel closes.
pub struct BoundedChannel<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Returns `true` if an older item was discarded to make room.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        let evicted = if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            true
        } else {
            false
        };
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        evicted
    }

    /// Next item in FIFO order. `None` once closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Reject further pushes and wake every blocked `pop`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_under_capacity() {
        let ch = BoundedChannel::new(2);
        assert!(!ch.push(1));
        assert!(!ch.push(2));
        assert_eq!(ch.pop(), Some(1));
        assert_eq!(ch.pop(), Some(2));
        assert!(ch.is_empty());
    }

    #[test]
    fn test_overflow_keeps_last_capacity_items() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let capacity = rng.gen_range(1..5);
            let pushes = rng.gen_range(capacity..capacity + 20);
            let ch = BoundedChannel::new(capacity);
            for i in 0..pushes {
                ch.push(i);
            }
            assert_eq!(ch.len(), capacity);
            let popped: Vec<usize> = (0..capacity).filter_map(|_| ch.pop()).collect();
            let expected: Vec<usize> = (pushes - capacity..pushes).collect();
            assert_eq!(popped, expected);
        }
    }

    #[test]
    fn test_push_reports_eviction() {
        let ch = BoundedChannel::new(1);
        assert!(!ch.push("a"));
        assert!(ch.push("b"));
        assert_eq!(ch.pop(), Some("b"));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let ch = Arc::new(BoundedChannel::new(2));
        let consumer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.pop())
        };
        thread::sleep(Duration::from_millis(30));
        ch.push(42);
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_close_wakes_blocked_pop() {
        let ch: Arc<BoundedChannel<u32>> = Arc::new(BoundedChannel::new(2));
        let consumer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.pop())
        };
        thread::sleep(Duration::from_millis(30));
        ch.close();
        assert_eq!(consumer.join().unwrap(), None);
        assert!(!ch.push(1));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let ch = BoundedChannel::new(0);
        assert_eq!(ch.capacity(), 1);
        ch.push(1);
        ch.push(2);
        assert_eq!(ch.pop(), Some(2));
    }
}
