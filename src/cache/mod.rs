//! TTL cache for successful read results.
//!
//! Keys are derived deterministically from the resource, operation,
//! normalized parameters and credential identity, and carry the resource name
//! as a readable prefix so writes can invalidate everything under it.

use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default time-to-live for cached reads.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Deterministic cache key: `"<resource>:<sha256 hex>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    key: String,
}

impl CacheKey {
    /// Derives the key for a request.
    ///
    /// Top-level `null` parameters are dropped and keys are hashed in sorted
    /// order, so `{a: 1, b: null}` and `{a: 1}` share an entry.
    pub fn derive(
        resource: &str,
        operation: &str,
        parameters: &BTreeMap<String, Value>,
        credential_id: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        for part in [resource, operation, credential_id] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        for (name, value) in parameters.iter().filter(|(_, v)| !v.is_null()) {
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }

        Self {
            resource: resource.to_string(),
            key: format!("{}:{}", resource, hex::encode(hasher.finalize())),
        }
    }

    /// The resource this key was derived from.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The full key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// A stored payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The entry's key.
    pub key: CacheKey,
    /// The cached result.
    pub payload: Value,
    /// The instant at and after which the entry is a miss.
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Shared response cache. Each operation takes the lock once, so a reader
/// never observes a half-written entry.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: Option<usize>,
}

impl ResponseCache {
    /// Creates an unbounded cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: None,
        }
    }

    /// Creates a cache holding at most `max_entries` entries.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    /// Returns the payload stored under `key`, removing it if expired.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(key.as_str()) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => {
                    trace!(key = %key, "Cache hit");
                    return Some(entry.payload.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Another writer may have replaced the entry between the two locks.
        match entries.get(key.as_str()) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key.as_str());
                debug!(key = %key, "Evicted expired cache entry");
                None
            }
            Some(entry) => Some(entry.payload.clone()),
            None => None,
        }
    }

    /// Stores `payload` under `key` for `ttl`, replacing any existing entry.
    pub fn set(&self, key: CacheKey, payload: Value, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();

        if let Some(max) = self.max_entries {
            if !entries.contains_key(key.as_str()) && entries.len() >= max {
                entries.retain(|_, entry| !entry.is_expired(now));
                if entries.len() >= max {
                    let soonest = entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.expires_at)
                        .map(|(k, _)| k.clone());
                    if let Some(victim) = soonest {
                        entries.remove(&victim);
                    }
                }
            }
        }

        entries.insert(
            key.as_str().to_string(),
            CacheEntry {
                key,
                payload,
                expires_at: now + ttl,
            },
        );
    }

    /// Removes every entry whose resource starts with `resource_prefix`.
    /// Returns the number of entries removed.
    pub fn invalidate(&self, resource_prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.key.resource().starts_with(resource_prefix));
        let removed = before - entries.len();

        if removed > 0 {
            debug!(resource_prefix, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Removes all expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until evicted.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
