// src/query/cache.rs
//! In-process query-analysis cache: absolute TTL, last writer wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::query::model::{Analysis, GeoPoint};

/// Lower-case, trim and collapse whitespace so trivially different spellings share a key.
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 over the normalized query text and the location hint.
pub fn cache_key(text: &str, location: Option<GeoPoint>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(text).as_bytes());
    match location {
        Some(loc) => hasher.update(format!("|{:.4},{:.4}", loc.lat, loc.lon).as_bytes()),
        None => hasher.update(b"|-"),
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone)]
struct Entry {
    analysis: Analysis,
    stored_at: Instant,
}

/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    ttl: Duration,
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl AnalysisCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A zero TTL disables the cache.
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(&self, key: &str) -> Option<Analysis> {
        if !self.is_enabled() {
            return None;
        }
        let guard = self.inner.read().ok()?;
        guard
            .get(key)
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.analysis.clone())
    }

    pub fn insert(&self, key: String, analysis: Analysis) {
        if !self.is_enabled() {
            return;
        }
        if let Ok(mut guard) = self.inner.write() {
            // Opportunistic sweep keeps the map bounded by live entries.
            let ttl = self.ttl;
            guard.retain(|_, e| e.stored_at.elapsed() < ttl);
            guard.insert(
                key,
                Entry {
                    analysis,
                    stored_at: Instant::now(),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
