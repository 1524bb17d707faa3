//! Content cache.
//!
//! Holds the bytes this side has announced, keyed by content id, so the
//! sync responder can serve them. Unbounded unless a capacity is set, in
//! which case the oldest-inserted entry is evicted first.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

#[derive(Default)]
struct Entries {
    items: HashMap<i64, Bytes>,
    order: VecDeque<i64>,
}

/// Thread-safe map of content id to payload.
#[derive(Default)]
pub struct ContentCache {
    entries: Mutex<Entries>,
    capacity: Option<usize>,
}

impl ContentCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache holding at most `capacity` entries.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            entries: Mutex::default(),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    /// Store `payload` under `id`. Re-inserting an id replaces its payload
    /// and makes it the newest entry.
    ///
    /// Returns the id evicted to make room, if any.
    pub fn insert(&self, id: i64, payload: impl Into<Bytes>) -> Option<i64> {
        let mut entries = self.entries.lock();
        if entries.items.insert(id, payload.into()).is_some() {
            entries.order.retain(|existing| *existing != id);
        }
        entries.order.push_back(id);

        let capacity = self.capacity?;
        if entries.items.len() > capacity {
            let oldest = entries.order.pop_front()?;
            entries.items.remove(&oldest);
            tracing::debug!("Content cache full, evicted {}", oldest);
            return Some(oldest);
        }
        None
    }

    pub fn get(&self, id: i64) -> Option<Bytes> {
        self.entries.lock().items.get(&id).cloned()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.lock().items.contains_key(&id)
    }

    pub fn remove(&self, id: i64) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        let removed = entries.items.remove(&id);
        if removed.is_some() {
            entries.order.retain(|existing| *existing != id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.items.clear();
        entries.order.clear();
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
