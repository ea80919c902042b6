use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use lru::LruCache;

/// Configuration of [`BanditCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanditCacheConfig {
    /// Maximum number of entries. Zero disables caching.
    pub capacity: usize,
    /// How long an entry stays valid after it was written.
    pub ttl: Duration,
}

impl BanditCacheConfig {
    /// Default value for [`BanditCacheConfig::capacity`].
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Default value for [`BanditCacheConfig::ttl`].
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn new() -> BanditCacheConfig {
        BanditCacheConfig::default()
    }

    /// Update capacity. Zero disables caching.
    pub fn with_capacity(mut self, capacity: usize) -> BanditCacheConfig {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> BanditCacheConfig {
        self.ttl = ttl;
        self
    }
}

impl Default for BanditCacheConfig {
    fn default() -> BanditCacheConfig {
        BanditCacheConfig {
            capacity: BanditCacheConfig::DEFAULT_CAPACITY,
            ttl: BanditCacheConfig::DEFAULT_TTL,
        }
    }
}

/// A memoized bandit decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDecision {
    /// Hash of the attributes the decision was made with.
    pub attributes_hash: String,
    pub variation_id: String,
    pub decision_uuid: String,
}

#[derive(Debug)]
struct Entry {
    value: CachedDecision,
    expires_at: Instant,
}

/// Upper bound on remembered per-key invalidations. Past it, the whole table is folded into a
/// generation bump.
const MAX_TRACKED_INVALIDATIONS: usize = 10_000;

/// Snapshot of the cache's write-back state taken when a fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteTicket {
    generation: u64,
    epoch: u64,
}

#[derive(Debug)]
struct CacheState {
    /// `None` when caching is disabled.
    entries: Option<LruCache<String, Entry>>,
    /// Bumped by every reset. A fetch that started under an older generation does not write its
    /// result back.
    generation: u64,
    /// Bumped by every removal.
    epoch: u64,
    /// Epoch of the latest removal of each key, since the last generation bump.
    invalidated: HashMap<String, u64>,
}

impl CacheState {
    fn get(&mut self, key: &str, now: Instant) -> Option<&CachedDecision> {
        let entries = self.entries.as_mut()?;
        let expired = entries.peek(key)?.expires_at <= now;
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| &entry.value)
    }

    fn remove(&mut self, key: &str) {
        if let Some(entries) = self.entries.as_mut() {
            entries.pop(key);
        }
        self.epoch += 1;
        if self.invalidated.len() >= MAX_TRACKED_INVALIDATIONS
            && !self.invalidated.contains_key(key)
        {
            self.generation += 1;
            self.invalidated.clear();
        }
        self.invalidated.insert(key.to_owned(), self.epoch);
    }

    fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.generation += 1;
        self.invalidated.clear();
    }

    fn ticket(&self) -> WriteTicket {
        WriteTicket {
            generation: self.generation,
            epoch: self.epoch,
        }
    }

    /// Whether a fetch for `key` started at `ticket` may still write back: no reset happened and
    /// `key` was not removed since.
    fn is_current(&self, key: &str, ticket: WriteTicket) -> bool {
        self.generation == ticket.generation
            && self
                .invalidated
                .get(key)
                .map_or(true, |&epoch| epoch <= ticket.epoch)
    }
}

/// Per-call cache behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BanditCacheOptions {
    /// Skip the lookup. A fresh result is still written back.
    pub ignore_cache: bool,
    /// Clear the whole cache first.
    pub reset_cache: bool,
    /// Clear this user's entry for the rule first.
    pub invalidate_user_cache: bool,
}

/// Outcome of [`BanditCache::lookup_or_begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheLookup {
    Hit(CachedDecision),
    /// Nothing usable is cached. Pass `ticket` to [`BanditCache::save_if_current`].
    Miss { ticket: WriteTicket },
}

/// Least-recently-used cache of bandit decisions with a per-entry time-to-live.
///
/// All operations run under one lock. The external fetch happens outside of it; its result is
/// written back only if the cache was not reset and the entry was not removed in the meantime.
#[derive(Debug)]
pub struct BanditCache {
    state: Mutex<CacheState>,
    ttl: Duration,
}

impl BanditCache {
    pub fn new(config: BanditCacheConfig) -> BanditCache {
        let entries = NonZeroUsize::new(config.capacity).map(LruCache::new);
        BanditCache {
            state: Mutex::new(CacheState {
                entries,
                generation: 0,
                epoch: 0,
                invalidated: HashMap::new(),
            }),
            ttl: config.ttl,
        }
    }

    /// Cache key of a (user, rule) pair.
    ///
    /// The user id is length-prefixed, so separators inside ids cannot make two different pairs
    /// collide.
    pub fn cache_key(user_id: &str, rule_id: &str) -> String {
        format!("{}-{user_id}-{rule_id}", user_id.chars().count())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .expect("thread holding bandit cache lock should not panic")
    }

    /// Get a live entry, marking it as recently used.
    pub fn lookup(&self, key: &str) -> Option<CachedDecision> {
        self.lock().get(key, Instant::now()).cloned()
    }

    /// Get a live entry without affecting recency.
    pub fn peek(&self, key: &str) -> Option<CachedDecision> {
        let state = self.lock();
        let entry = state.entries.as_ref()?.peek(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    pub fn save(&self, key: impl Into<String>, value: CachedDecision) {
        let expires_at = Instant::now() + self.ttl;
        if let Some(entries) = self.lock().entries.as_mut() {
            entries.put(key.into(), Entry { value, expires_at });
        }
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Remove all entries.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply per-call options and look up `key` in one critical section.
    ///
    /// An entry whose attributes hash differs from `attributes_hash` is dropped and reported as
    /// a miss.
    pub(crate) fn lookup_or_begin(
        &self,
        key: &str,
        attributes_hash: &str,
        options: BanditCacheOptions,
    ) -> CacheLookup {
        let mut state = self.lock();

        if options.reset_cache {
            state.clear();
        }
        if options.invalidate_user_cache {
            state.remove(key);
        }

        if !options.ignore_cache {
            match state.get(key, Instant::now()).cloned() {
                Some(cached) if cached.attributes_hash == attributes_hash => {
                    return CacheLookup::Hit(cached);
                }
                Some(_) => {
                    if let Some(entries) = state.entries.as_mut() {
                        entries.pop(key);
                    }
                }
                None => {}
            }
        }

        CacheLookup::Miss {
            ticket: state.ticket(),
        }
    }

    /// Write back a fetched decision unless the cache was reset, or `key` was removed, since
    /// `ticket` was taken. Returns whether the entry was written.
    pub(crate) fn save_if_current(
        &self,
        key: impl Into<String>,
        value: CachedDecision,
        ticket: WriteTicket,
    ) -> bool {
        let key = key.into();
        let mut state = self.lock();
        if !state.is_current(&key, ticket) {
            log::debug!(target: "decision_core",
                "bandit cache changed while fetching, not caching decision");
            return false;
        }
        let expires_at = Instant::now() + self.ttl;
        match state.entries.as_mut() {
            Some(entries) => {
                entries.put(key, Entry { value, expires_at });
                true
            }
            None => false,
        }
    }
}
