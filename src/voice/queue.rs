//! Bounded lossy queue feeding blocking workers

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Bounded FIFO that evicts its oldest entry when full
///
/// Producers never block; the consumer blocks with a timeout so it can check a
/// stop signal between waits.
pub struct DropOldestQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> DropOldestQueue<T> {
    /// Create a queue holding at most `capacity` items
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Push an item, evicting the oldest one if full
    ///
    /// Returns true if an item was evicted.
    pub fn push(&self, item: T) -> bool {
        let Ok(mut items) = self.items.lock() else {
            return false;
        };

        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            true
        } else {
            false
        };
        items.push_back(item);
        drop(items);

        self.ready.notify_one();
        evicted
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let items = self.items.lock().ok()?;
        let (mut items, _) = self
            .ready
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .ok()?;
        items.pop_front()
    }

    /// Drop every queued item
    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
    }

    /// Number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
