// src/config/cache.rs
//
// TTLs and throttle settings for the factoid cache tiers. The second values
// are part of the interop contract with the existing deployment: primary
// 21600s live / 604800s warmed, stale 2592000s, gathered data 3600s.

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_primary_live_secs: u64,
    pub ttl_primary_warmed_secs: u64,
    pub ttl_stale_secs: u64,
    pub ttl_data_secs: u64,
    /// Fixed-window cap on the expensive generation path, per council.
    pub rate_limit_per_hour: u32,
    /// Factoid count used for the sitewide aggregate cache key.
    pub sitewide_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_primary_live_secs: 21_600,
            ttl_primary_warmed_secs: 604_800,
            ttl_stale_secs: 2_592_000,
            ttl_data_secs: 3_600,
            rate_limit_per_hour: 25,
            sitewide_limit: 5,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let mut cfg = CacheConfig::default();
        override_u64(&mut cfg.ttl_primary_live_secs, "FACTOID_TTL_PRIMARY_SECS");
        override_u64(&mut cfg.ttl_primary_warmed_secs, "FACTOID_TTL_WARMED_SECS");
        override_u64(&mut cfg.ttl_stale_secs, "FACTOID_TTL_STALE_SECS");
        override_u64(&mut cfg.ttl_data_secs, "FACTOID_TTL_DATA_SECS");
        if let Some(v) = parse_env("FACTOID_RATE_LIMIT_PER_HOUR") {
            cfg.rate_limit_per_hour = v;
        }
        if let Some(v) = parse_env("FACTOID_SITEWIDE_LIMIT") {
            cfg.sitewide_limit = v;
        }
        cfg
    }
}

fn override_u64(slot: &mut u64, var: &str) {
    if let Some(v) = parse_env(var) {
        *slot = v;
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.parse().ok())
}
