//! TTL-bounded route cache.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::core::router::{RouteCache, RouteCacheEntry};

/// Process-local [`RouteCache`]. Entries older than the TTL are treated as absent.
pub struct InMemoryRouteCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, RouteCacheEntry>>,
}

impl InMemoryRouteCache {
    /// Cache with the given time-to-live.
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Entries currently held, live or expired.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn is_live(&self, entry: &RouteCacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.cached_at) < self.ttl
    }
}

impl RouteCache for InMemoryRouteCache {
    fn get(&self, sender_id: &str, now: DateTime<Utc>) -> Option<RouteCacheEntry> {
        let entry = self.entries.read().get(sender_id).cloned()?;
        if self.is_live(&entry, now) {
            return Some(entry);
        }
        self.entries.write().remove(sender_id);
        None
    }

    fn put(&self, sender_id: &str, entry: RouteCacheEntry) {
        self.entries.write().insert(sender_id.to_string(), entry);
    }

    fn invalidate(&self, sender_id: &str) {
        self.entries.write().remove(sender_id);
    }

    fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| self.is_live(entry, now));
        before - entries.len()
    }
}
