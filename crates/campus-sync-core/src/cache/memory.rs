use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::entry::CacheEntry;

/// Default number of entries kept in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 256;

/// Bounded, process-local key -> entry table.
///
/// When full, inserting a new key evicts the entry with the oldest
/// `written_at`. The lock is never held across an await point.
#[derive(Debug)]
pub struct MemoryTier {
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn insert(&self, key: &str, entry: Arc<CacheEntry>) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.written_at())
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}
