//! TTL- and size-bounded response cache.
//!
//! Memoizes classification verdicts keyed by the exact `(text, model,
//! context)` triple. The cache is a performance optimization only: a false
//! miss costs one upstream call, while a false hit would serve a wrong
//! verdict, so keys are exact-match with no normalization. Expiry is lazy
//! (checked on read), with an opportunistic cleanup on every 10th write and
//! oldest-first eviction whenever the entry count exceeds the bound.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;
use crate::verdict::AnalysisVerdict;

/// Every Nth write triggers an opportunistic expired-entry cleanup.
const CLEANUP_WRITE_STRIDE: u64 = 10;

#[derive(Debug, Clone)]
struct CacheEntry {
    verdict: AnalysisVerdict,
    expires_at: Instant,
    /// Monotonic insertion sequence, used for oldest-first eviction.
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    writes: u64,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Cache statistics for the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Exact-match verdict cache with TTL and size bounds.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    /// Creates a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Deterministic key over the three inputs. Each component is
    /// length-prefixed before hashing so that component boundaries cannot
    /// collide ("ab"+"c" never keys the same as "a"+"bc").
    fn key(text: &str, model: &str, context: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [text, model, context] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Looks up a verdict. Expired entries are deleted and reported as
    /// misses.
    pub fn get(&self, text: &str, model: &str, context: &str) -> Option<AnalysisVerdict> {
        let key = Self::key(text, model, context);
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let found = inner
            .entries
            .get(&key)
            .map(|entry| (entry.expires_at > now, entry.verdict.clone()));

        match found {
            Some((true, verdict)) => {
                inner.hits += 1;
                Some(verdict)
            }
            Some((false, _)) => {
                inner.entries.remove(&key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Stores a verdict under the exact input triple with the configured
    /// TTL, then enforces the size bound.
    pub fn put(&self, text: &str, model: &str, context: &str, verdict: AnalysisVerdict) {
        let key = Self::key(text, model, context);
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                verdict,
                expires_at: now + self.config.ttl,
                seq,
            },
        );
        inner.writes += 1;

        if inner.writes % CLEANUP_WRITE_STRIDE == 0 {
            inner.entries.retain(|_, entry| entry.expires_at > now);
        }

        // Evict oldest insertions until we are back inside the bound.
        let excess = inner.entries.len().saturating_sub(self.config.max_entries);
        if excess > 0 {
            let mut by_age: Vec<(String, u64)> = inner
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.seq))
                .collect();
            by_age.sort_by_key(|&(_, seq)| seq);
            for (key, _) in by_age.into_iter().take(excess) {
                inner.entries.remove(&key);
                inner.evictions += 1;
            }
            debug!(evicted = excess, "cache size bound enforced");
        }
    }

    /// Number of entries currently stored (including not-yet-collected
    /// expired entries).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Returns true when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all entries and resets nothing else.
    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    /// Snapshot of hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
