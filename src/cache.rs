//! In-memory memoization of validation results.
//!
//! Results are keyed by a pair of content hashes: one over the manifest set,
//! one over the plugin set and its configuration. Entries expire after
//! `max_age` and are evicted in batches of ~10% once `max_entries` is reached.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::logging::{default_sink, SharedSink};
use crate::models::ValidationResult;
use crate::plugin::RegisteredPlugin;

const COMPONENT: &str = "cache";

/// Which entries to drop first when the cache is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently accessed.
    #[default]
    Lru,
    /// Least frequently accessed.
    Lfu,
    /// Oldest first.
    Ttl,
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    pub enabled: bool,
    pub max_entries: usize,
    pub max_age: Duration,
    /// Runs faster than this are not worth caching.
    pub min_execution_time: Duration,
    /// Store results that contain error violations.
    pub cache_failed_results: bool,
    pub strategy: EvictionStrategy,
    /// Period of the background expiry sweep. `None` disables it.
    pub cleanup_interval: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            max_age: Duration::from_secs(300),
            min_execution_time: Duration::ZERO,
            cache_failed_results: true,
            strategy: EvictionStrategy::Lru,
            cleanup_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl CacheOptions {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// A stored result and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: ValidationResult,
    pub created_at: Instant,
    pub manifest_hash: String,
    pub plugin_hash: String,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    /// Estimated footprint in bytes.
    pub size: usize,
}

/// Selects entries to drop. An entry is removed when it matches any of the
/// set criteria; with nothing set, everything is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationCriteria {
    pub manifest_hash: Option<String>,
    pub plugin_hash: Option<String>,
    pub older_than: Option<Duration>,
}

impl InvalidationCriteria {
    /// Clear the whole cache.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn manifest_hash(hash: impl Into<String>) -> Self {
        Self {
            manifest_hash: Some(hash.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn plugin_hash(hash: impl Into<String>) -> Self {
        Self {
            plugin_hash: Some(hash.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn older_than(age: Duration) -> Self {
        Self {
            older_than: Some(age),
            ..Self::default()
        }
    }

    fn is_all(&self) -> bool {
        self.manifest_hash.is_none() && self.plugin_hash.is_none() && self.older_than.is_none()
    }

    fn matches(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.manifest_hash.as_deref() == Some(entry.manifest_hash.as_str())
            || self.plugin_hash.as_deref() == Some(entry.plugin_hash.as_str())
            || self
                .older_than
                .is_some_and(|age| now.duration_since(entry.created_at) > age)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub memory_bytes: usize,
    /// `hits / (hits + misses)`, `0.0` before any lookup.
    pub hit_ratio: f64,
    pub average_access_count: f64,
}

/// Thread-safe result cache.
pub struct ValidationCache {
    options: CacheOptions,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sink: SharedSink,
}

impl std::fmt::Debug for ValidationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationCache")
            .field("options", &self.options)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl ValidationCache {
    #[must_use]
    pub fn new(options: CacheOptions) -> Self {
        Self::with_sink(options, default_sink())
    }

    #[must_use]
    pub fn with_sink(options: CacheOptions, sink: SharedSink) -> Self {
        Self {
            options,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sink,
        }
    }

    #[must_use]
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Look up a result. Expired entries are removed and count as a miss.
    pub fn get(&self, manifest_hash: &str, plugin_hash: &str) -> Option<ValidationResult> {
        if !self.options.enabled {
            return None;
        }
        let key = cache_key(manifest_hash, plugin_hash);
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(&key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) if now.duration_since(entry.created_at) <= self.options.max_age => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.result.clone());
            }
            Some(_) => {}
        }

        entries.remove(&key);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.sink
            .debug(COMPONENT, &format!("evicted expired entry {key}"));
        None
    }

    /// Whether `result` qualifies for caching.
    #[must_use]
    pub fn should_cache(&self, result: &ValidationResult) -> bool {
        if !self.options.enabled {
            return false;
        }
        let min_ms = u64::try_from(self.options.min_execution_time.as_millis()).unwrap_or(u64::MAX);
        if result.metadata.execution_time_ms < min_ms {
            return false;
        }
        result.valid || self.options.cache_failed_results
    }

    /// Store a result. Returns `false` when [`should_cache`](Self::should_cache)
    /// rejects it.
    pub fn set(&self, manifest_hash: &str, plugin_hash: &str, result: ValidationResult) -> bool {
        if !self.should_cache(&result) {
            return false;
        }
        let key = cache_key(manifest_hash, plugin_hash);
        let size = estimate_size(&key, &result);
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.options.max_entries.max(1) {
            let evicted = self.evict_batch(&mut entries);
            self.sink.debug(
                COMPONENT,
                &format!(
                    "capacity reached; evicted {evicted} entries ({:?})",
                    self.options.strategy
                ),
            );
        }

        entries.insert(
            key,
            CacheEntry {
                result,
                created_at: now,
                manifest_hash: manifest_hash.to_string(),
                plugin_hash: plugin_hash.to_string(),
                access_count: 0,
                last_accessed_at: now,
                size,
            },
        );
        true
    }

    /// Evict ~10% of the capacity (at least one entry) using the configured
    /// strategy.
    fn evict_batch(&self, entries: &mut HashMap<String, CacheEntry>) -> usize {
        let count = self.options.max_entries.max(1).div_ceil(10).min(entries.len());
        let mut candidates: Vec<(&String, &CacheEntry)> = entries.iter().collect();
        match self.options.strategy {
            EvictionStrategy::Lru => candidates.sort_by(|a, b| {
                a.1.last_accessed_at
                    .cmp(&b.1.last_accessed_at)
                    .then_with(|| a.0.cmp(b.0))
            }),
            EvictionStrategy::Lfu => candidates.sort_by(|a, b| {
                a.1.access_count
                    .cmp(&b.1.access_count)
                    .then_with(|| a.1.last_accessed_at.cmp(&b.1.last_accessed_at))
                    .then_with(|| a.0.cmp(b.0))
            }),
            EvictionStrategy::Ttl => candidates.sort_by(|a, b| {
                a.1.created_at
                    .cmp(&b.1.created_at)
                    .then_with(|| a.0.cmp(b.0))
            }),
        }
        let victims: Vec<String> = candidates
            .into_iter()
            .take(count)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &victims {
            entries.remove(key);
        }
        self.evictions
            .fetch_add(victims.len() as u64, Ordering::Relaxed);
        victims.len()
    }

    /// Remove every entry older than `max_age`. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let max_age = self.options.max_age;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.created_at) <= max_age);
        let removed = before - entries.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            self.sink
                .debug(COMPONENT, &format!("sweep removed {removed} expired entries"));
        }
        removed
    }

    /// Drop entries matching `criteria`. Returns the number removed.
    pub fn invalidate(&self, criteria: &InvalidationCriteria) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        if criteria.is_all() {
            entries.clear();
        } else {
            let now = Instant::now();
            entries.retain(|_, entry| !criteria.matches(entry, now));
        }
        let removed = before - entries.len();
        self.sink
            .info(COMPONENT, &format!("invalidated {removed} cache entries"));
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let total_access: u64 = entries.values().map(|e| e.access_count).sum();
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: entries.len(),
            memory_bytes: entries.values().map(|e| e.size).sum(),
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            average_access_count: if entries.is_empty() {
                0.0
            } else {
                total_access as f64 / entries.len() as f64
            },
        }
    }

    /// Reset hit, miss and eviction counters. Entries are kept.
    pub fn clear_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Start the periodic expiry sweep on the current tokio runtime.
///
/// The task holds only a weak reference and ends once the cache is dropped.
/// Returns `None` when no interval is configured or no runtime is running.
pub fn spawn_sweeper(cache: &Arc<ValidationCache>) -> Option<JoinHandle<()>> {
    let period = cache.options().cleanup_interval?;
    if !cache.is_enabled() || period.is_zero() {
        return None;
    }
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let weak: Weak<ValidationCache> = Arc::downgrade(cache);
    Some(handle.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            match weak.upgrade() {
                Some(cache) => {
                    cache.sweep_expired();
                }
                None => break,
            }
        }
    }))
}

fn cache_key(manifest_hash: &str, plugin_hash: &str) -> String {
    format!("{manifest_hash}:{plugin_hash}")
}

fn estimate_size(key: &str, result: &ValidationResult) -> usize {
    key.len() + serde_json::to_vec(result).map(|v| v.len()).unwrap_or(0)
}

/// Serialize `value` as JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Stable hash of a manifest set. Order matters; key order within a manifest
/// does not.
#[must_use]
pub fn hash_manifests(manifests: &[Value]) -> String {
    let mut data = String::from("[");
    for (i, manifest) in manifests.iter().enumerate() {
        if i > 0 {
            data.push(',');
        }
        write_canonical(manifest, &mut data);
    }
    data.push(']');
    sha256_hex(data.as_bytes())
}

/// Stable hash of a plugin set: names sorted, each with version and
/// resolved configuration.
#[must_use]
pub fn hash_plugins(plugins: &[RegisteredPlugin]) -> String {
    let mut sorted: Vec<&RegisteredPlugin> = plugins.iter().collect();
    sorted.sort_by(|a, b| a.name().cmp(b.name()));
    let mut data = String::new();
    for entry in sorted {
        data.push_str(entry.name());
        data.push('@');
        data.push_str(entry.plugin.version());
        data.push('=');
        write_canonical(&Value::Object(entry.config.clone()), &mut data);
        data.push('\n');
    }
    sha256_hex(data.as_bytes())
}
