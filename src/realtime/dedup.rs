//! Bounded set of already-dispatched message ids.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Message ids that have been dispatched, oldest evicted first once the
/// capacity is reached. Shared by the watcher and poller paths.
#[derive(Debug)]
pub struct SeenMessages {
    capacity: usize,
    inner: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Seen::default()),
        }
    }

    /// Record `id`. Returns true if it was not seen before.
    pub fn insert(&self, id: &str) -> bool {
        let mut seen = self.inner.lock();
        if seen.ids.contains(id) {
            return false;
        }

        while seen.order.len() >= self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        seen.ids.insert(id.to_string());
        seen.order.push_back(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
