//! cache.rs — multi-tier TTL cache over an external key-value store.
//!
//! Key formats are part of the interop contract and must stay bit-exact:
//! `ai_factoids:{slug}`, `ai_factoids_stale:{slug}`, `ai_council_data:{slug}`,
//! `sitewide_factoids_{limit}`.
//!
//! The one piece of logic that lives here beyond TTL bookkeeping: envelopes
//! whose factoids are all fallback-typed are never written to the primary
//! tier. "AI unavailable" filler must not be served as if it were insight.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::factoid::{CacheStatus, FactoidResponseEnvelope};

pub fn primary_key(slug: &str) -> String {
    format!("ai_factoids:{slug}")
}

pub fn stale_key(slug: &str) -> String {
    format!("ai_factoids_stale:{slug}")
}

pub fn data_key(slug: &str) -> String {
    format!("ai_council_data:{slug}")
}

pub fn sitewide_key(limit: usize) -> String {
    format!("sitewide_factoids_{limit}")
}

/// Minimal surface over the external store. Implementations must treat any
/// backend failure as a miss (`None`) or a silent no-op; the pipeline never
/// fails a request because the cache store is down.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
    fn backend_name(&self) -> &'static str;
}

/// Process-local store with per-entry expiry. The production deployment
/// points this trait at a shared store; tests and single-instance runs use
/// this one.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        match guard.get(key) {
            Some((_, expiry)) if *expiry <= Instant::now() => {
                guard.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        guard.insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn delete(&self, key: &str) {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        guard.remove(key);
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

pub type SharedStore = Arc<dyn CacheStore>;

/// Tiered factoid cache: primary (short TTL, actively served), stale
/// (long TTL safety net), plus the gathered-data entry the gatherer owns.
#[derive(Clone)]
pub struct FactoidCache {
    store: SharedStore,
    cfg: CacheConfig,
}

impl FactoidCache {
    pub fn new(store: SharedStore, cfg: CacheConfig) -> Self {
        Self { store, cfg }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub async fn read_primary(&self, slug: &str) -> Option<FactoidResponseEnvelope> {
        let mut env: FactoidResponseEnvelope = self.read_json(&primary_key(slug)).await?;
        env.cache_status = CacheStatus::Cached;
        counter!("factoid_cache_hits_total").increment(1);
        Some(env)
    }

    pub async fn read_stale(&self, slug: &str) -> Option<FactoidResponseEnvelope> {
        let mut env: FactoidResponseEnvelope = self.read_json(&stale_key(slug)).await?;
        env.cache_status = CacheStatus::Cached;
        Some(env)
    }

    /// Write an AI-sourced envelope to both tiers. Fallback-only envelopes
    /// are refused (returns false) and any prior good entry is left intact.
    pub async fn write_envelope(&self, env: &FactoidResponseEnvelope, warmed: bool) -> bool {
        if env.fallback_only() || env.factoids.is_empty() {
            counter!("factoid_cache_write_refused_total").increment(1);
            return false;
        }
        let primary_ttl = if warmed {
            self.cfg.ttl_primary_warmed_secs
        } else {
            self.cfg.ttl_primary_live_secs
        };
        self.write_json(&primary_key(&env.council), env, primary_ttl)
            .await;
        self.write_json(&stale_key(&env.council), env, self.cfg.ttl_stale_secs)
            .await;
        counter!("factoid_cache_writes_total").increment(1);
        true
    }

    pub async fn read_sitewide(&self, limit: usize) -> Option<FactoidResponseEnvelope> {
        let mut env: FactoidResponseEnvelope = self.read_json(&sitewide_key(limit)).await?;
        env.cache_status = CacheStatus::Cached;
        Some(env)
    }

    pub async fn write_sitewide(&self, env: &FactoidResponseEnvelope, limit: usize) -> bool {
        if env.fallback_only() || env.factoids.is_empty() {
            return false;
        }
        self.write_json(&sitewide_key(limit), env, self.cfg.ttl_primary_live_secs)
            .await;
        true
    }

    /// Remove every per-council entry: both factoid tiers plus the gathered
    /// data. Idempotent; deleting absent keys is a no-op.
    pub async fn invalidate_council(&self, slug: &str) {
        self.store.delete(&primary_key(slug)).await;
        self.store.delete(&stale_key(slug)).await;
        self.store.delete(&data_key(slug)).await;
        counter!("factoid_cache_invalidations_total").increment(1);
    }

    pub async fn invalidate_sitewide(&self) {
        self.store.delete(&sitewide_key(self.cfg.sitewide_limit)).await;
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "dropping undecodable cache entry");
                self.store.delete(key).await;
                None
            }
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        match serde_json::to_string(value) {
            Ok(raw) => {
                self.store
                    .set(key, raw, Duration::from_secs(ttl_secs))
                    .await
            }
            Err(e) => tracing::warn!(key, error = %e, "cache serialize failed"),
        }
    }
}
