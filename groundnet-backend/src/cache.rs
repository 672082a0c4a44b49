//! Short-TTL memoization for per-entity aggregates, plus named locks with
//! expiry used to serialize bundle writers. Values are invalidated
//! explicitly on vetting changes rather than left to expire.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Station,
    Satellite,
    Transmitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    SuccessRate,
    GoodCount,
    BadCount,
    UnknownCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    kind: EntityKind,
    id: String,
    metric: Metric,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires: Instant,
}

pub struct MetricCache {
    ttl: Duration,
    entries: Mutex<HashMap<MetricKey, Entry>>,
    locks: Mutex<HashMap<String, Instant>>,
}

impl MetricCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, kind: EntityKind, id: &str, metric: Metric) -> Option<i64> {
        let entries = self.entries.lock().unwrap();
        let key = MetricKey {
            kind,
            id: id.to_string(),
            metric,
        };
        entries
            .get(&key)
            .filter(|entry| entry.expires > Instant::now())
            .map(|entry| entry.value)
    }

    pub fn set(&self, kind: EntityKind, id: &str, metric: Metric, value: i64) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            MetricKey {
                kind,
                id: id.to_string(),
                metric,
            },
            Entry {
                value,
                expires: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every cached metric of one entity. Called when a contributing
    /// observation's vetted status changes.
    pub fn invalidate_entity(&self, kind: EntityKind, id: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, _| !(key.kind == kind && key.id == id));
    }

    /// Try to take a named lock. Returns false when the lock is live, in
    /// which case the caller defers to its next run. Expired locks are
    /// reclaimed so a crashed holder cannot wedge the name forever.
    pub fn try_lock(&self, name: &str, ttl: Duration) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        match locks.get(name) {
            Some(expires) if *expires > now => false,
            _ => {
                locks.insert(name.to_string(), now + ttl);
                true
            }
        }
    }

    pub fn unlock(&self, name: &str) {
        let mut locks = self.locks.lock().unwrap();
        locks.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_expire_after_ttl() {
        let cache = MetricCache::new(Duration::from_millis(20));
        cache.set(EntityKind::Station, "7", Metric::SuccessRate, 80);
        assert_eq!(
            cache.get(EntityKind::Station, "7", Metric::SuccessRate),
            Some(80)
        );
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(EntityKind::Station, "7", Metric::SuccessRate), None);
    }

    #[test]
    fn invalidation_is_scoped_to_one_entity() {
        let cache = MetricCache::new(Duration::from_secs(60));
        cache.set(EntityKind::Station, "7", Metric::SuccessRate, 80);
        cache.set(EntityKind::Station, "8", Metric::SuccessRate, 50);
        cache.set(EntityKind::Transmitter, "7", Metric::GoodCount, 3);

        cache.invalidate_entity(EntityKind::Station, "7");
        assert_eq!(cache.get(EntityKind::Station, "7", Metric::SuccessRate), None);
        assert_eq!(
            cache.get(EntityKind::Station, "8", Metric::SuccessRate),
            Some(50)
        );
        assert_eq!(
            cache.get(EntityKind::Transmitter, "7", Metric::GoodCount),
            Some(3)
        );
    }

    #[test]
    fn named_lock_blocks_second_taker_until_released() {
        let cache = MetricCache::new(Duration::from_secs(60));
        assert!(cache.try_lock("ziplock-1-100", Duration::from_secs(60)));
        assert!(!cache.try_lock("ziplock-1-100", Duration::from_secs(60)));
        cache.unlock("ziplock-1-100");
        assert!(cache.try_lock("ziplock-1-100", Duration::from_secs(60)));
    }

    #[test]
    fn expired_lock_is_reclaimed() {
        let cache = MetricCache::new(Duration::from_secs(60));
        assert!(cache.try_lock("ziplock-1-100", Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.try_lock("ziplock-1-100", Duration::from_secs(60)));
    }
}
