use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use strata_types::ContainerId;

/// LRU cache of full container buffers, keyed by container identifier.
///
/// Purely a read-path optimization: correctness never depends on hit or
/// miss, so eviction order is not protocol-visible. Buffers are shared via
/// `Arc` so a hit hands out the bytes without copying them.
pub struct ReadCache {
    capacity: usize,
    map: HashMap<ContainerId, Arc<Vec<u8>>>,
    order: VecDeque<ContainerId>,
}

impl ReadCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, id: &ContainerId) -> bool {
        self.map.contains_key(id)
    }

    /// Fetch a cached container, marking it most recently used.
    pub fn get(&mut self, id: &ContainerId) -> Option<Arc<Vec<u8>>> {
        let bytes = self.map.get(id)?.clone();
        self.touch(id);
        Some(bytes)
    }

    /// Insert a container, evicting the least recently used entries once
    /// over capacity. Re-inserting an existing identifier refreshes both
    /// its bytes and its recency.
    pub fn insert(&mut self, id: ContainerId, bytes: Arc<Vec<u8>>) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(id, bytes).is_some() {
            self.touch(&id);
            return;
        }
        self.order.push_back(id);
        while self.map.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, id: &ContainerId) {
        if let Some(at) = self.order.iter().position(|entry| entry == id) {
            self.order.remove(at);
            self.order.push_back(*id);
        }
    }
}
