use crate::error::ResolveError;
use crate::transform::CacheKey;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Which tier produced a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Primary,
    Secondary,
    Original,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Primary => "primary",
            Source::Secondary => "secondary",
            Source::Original => "original",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub resolved_url: String,
    pub source: Source,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(resolved_url: String, source: Source, ttl: Duration) -> Self {
        Self {
            resolved_url,
            source,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn check(&self, key: &CacheKey) -> Result<(), ResolveError> {
        if self.resolved_url.trim().is_empty() {
            return Err(ResolveError::CacheIntegrity(key.to_string()));
        }
        Ok(())
    }
}

/// Bounded TTL map of resolved URLs. Reads go straight to the map; inserts
/// and eviction are serialized so the size bound holds after every insert.
pub struct ResolutionCache {
    entries: DashMap<CacheKey, CacheEntry>,
    write_lock: Mutex<()>,
    max_entries: usize,
    evict_to: usize,
}

impl ResolutionCache {
    pub fn new(max_entries: usize, evict_to_ratio: f64) -> Self {
        let evict_to = ((max_entries as f64) * evict_to_ratio).floor() as usize;
        Self {
            entries: DashMap::new(),
            write_lock: Mutex::new(()),
            max_entries,
            evict_to: evict_to.min(max_entries),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?.value().clone();
        if entry.is_expired(now) {
            return None;
        }
        if let Err(e) = entry.check(key) {
            warn!("{}, dropping it", e);
            self.entries.remove(key);
            return None;
        }
        Some(entry)
    }

    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.entries.insert(key, entry);

        if self.entries.len() > self.max_entries {
            self.evict_nearest_expiry();
        }
    }

    fn evict_nearest_expiry(&self) {
        let mut by_expiry: Vec<(Instant, CacheKey)> = self
            .entries
            .iter()
            .map(|e| (e.value().expires_at, e.key().clone()))
            .collect();
        by_expiry.sort_by_key(|(expires_at, _)| *expires_at);

        let excess = self.entries.len().saturating_sub(self.evict_to);
        for (_, key) in by_expiry.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        debug!(
            "Evicted {} cache entries (size now {})",
            excess,
            self.entries.len()
        );
    }

    /// Removes expired entries and returns how many went.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Removes every entry produced by `source`.
    pub fn purge_source(&self, source: Source) -> usize {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.source != source);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformParams;

    fn key(n: usize) -> CacheKey {
        CacheKey::new(&format!("/img/{n}.jpg"), &TransformParams::new())
    }

    fn entry(ttl_secs: u64) -> CacheEntry {
        CacheEntry::new(
            "https://cdn.example.com/x.jpg".to_string(),
            Source::Primary,
            Duration::from_secs(ttl_secs),
        )
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = ResolutionCache::new(10, 0.8);
        cache.insert(key(1), entry(60));
        let later = Instant::now() + Duration::from_secs(61);
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get_at(&key(1), later).is_none());
        // still physically present until swept
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep_expired_at(later), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn never_exceeds_max_after_insert() {
        let cache = ResolutionCache::new(10, 0.8);
        for n in 0..100 {
            cache.insert(key(n), entry(60 + n as u64));
            assert!(cache.len() <= 10, "size {} after insert {}", cache.len(), n);
        }
    }

    #[test]
    fn evicts_nearest_expiry_down_to_target() {
        let cache = ResolutionCache::new(10, 0.8);
        for n in 0..10 {
            cache.insert(key(n), entry(100 + n as u64));
        }
        // the 11th insert expires last, so the three soonest-expiring go
        cache.insert(key(99), entry(1000));
        assert_eq!(cache.len(), 8);
        for n in 0..3 {
            assert!(cache.get(&key(n)).is_none(), "entry {n} survived");
        }
        assert!(cache.get(&key(99)).is_some());
        assert!(cache.get(&key(9)).is_some());
    }

    #[test]
    fn malformed_entry_is_a_miss() {
        let cache = ResolutionCache::new(10, 0.8);
        cache.insert(
            key(1),
            CacheEntry::new(String::new(), Source::Secondary, Duration::from_secs(60)),
        );
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_only_touches_one_source() {
        let cache = ResolutionCache::new(10, 0.8);
        cache.insert(key(1), entry(60));
        cache.insert(
            key(2),
            CacheEntry::new(
                "https://s3.example.com/x.jpg".to_string(),
                Source::Secondary,
                Duration::from_secs(60),
            ),
        );
        assert_eq!(cache.purge_source(Source::Primary), 1);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
    }
}
