//! Single-slot mailbox carrying the newest value to one consumer.

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    /// `Some` doubles as the "new data" flag.
    value: Option<T>,
    closed: bool,
}

/// Lossy latest-value hand-off. Each `publish` replaces whatever has not
/// been taken yet; `take` blocks until there is something new.
pub struct LatestSlot<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn publish(&self, value: T) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.value = Some(value);
        drop(inner);
        self.ready.notify_all();
    }

    /// Wait for a value newer than the last one taken. `None` on shutdown.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(value) = inner.value.take() {
                return Some(value);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Wake every waiter; subsequent `take` calls return `None`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.ready.notify_all();
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
