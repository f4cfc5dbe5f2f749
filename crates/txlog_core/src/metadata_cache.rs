//! Bounded transaction id to log position index.

use crate::types::LogPosition;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Remembers where recently committed transactions start.
///
/// Purely an optimization: a miss means the caller scans the log. The oldest
/// entry is evicted once capacity is reached; capacity zero disables caching.
#[derive(Debug)]
pub struct TransactionMetadataCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    positions: HashMap<u64, LogPosition>,
    order: VecDeque<u64>,
}

impl TransactionMetadataCache {
    /// Creates a cache holding at most `capacity` transactions.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Records that transaction `tx_id` starts at `position`.
    pub fn cache_transaction_metadata(&self, tx_id: u64, position: LogPosition) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.positions.insert(tx_id, position).is_some() {
            return;
        }
        inner.order.push_back(tx_id);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.positions.remove(&oldest);
            }
        }
    }

    /// Start position of `tx_id`, if cached.
    #[must_use]
    pub fn get_start_position(&self, tx_id: u64) -> Option<LogPosition> {
        self.inner.lock().positions.get(&tx_id).copied()
    }

    /// Forgets everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.positions.clear();
        inner.order.clear();
    }

    /// Number of cached transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().positions.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached transactions.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let cache = TransactionMetadataCache::new(2);
        cache.cache_transaction_metadata(1, LogPosition::new(0, 100));
        cache.cache_transaction_metadata(2, LogPosition::new(0, 200));
        cache.cache_transaction_metadata(3, LogPosition::new(0, 300));

        assert_eq!(cache.get_start_position(1), None);
        assert_eq!(cache.get_start_position(2), Some(LogPosition::new(0, 200)));
        assert_eq!(cache.get_start_position(3), Some(LogPosition::new(0, 300)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn recaching_updates_in_place() {
        let cache = TransactionMetadataCache::new(2);
        cache.cache_transaction_metadata(1, LogPosition::new(0, 100));
        cache.cache_transaction_metadata(1, LogPosition::new(1, 100));
        cache.cache_transaction_metadata(2, LogPosition::new(1, 200));
        assert_eq!(cache.get_start_position(1), Some(LogPosition::new(1, 100)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_disables() {
        let cache = TransactionMetadataCache::new(0);
        cache.cache_transaction_metadata(1, LogPosition::new(0, 100));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_forgets_everything() {
        let cache = TransactionMetadataCache::new(4);
        cache.cache_transaction_metadata(1, LogPosition::new(0, 100));
        cache.clear();
        assert_eq!(cache.get_start_position(1), None);
        assert!(cache.is_empty());
    }
}
