//! invalidate.rs — rate-limited, session-aware cache invalidation.
//!
//! The data-mutation boundary calls `on_financial_data_changed` explicitly;
//! there is no framework-level observer registry. Bursty sessions (a
//! multi-field bulk edit) are coalesced: once a session has produced three
//! rapid changes, further invalidations for it are batched behind a short
//! delay and applied once. The delayed flush is a spawned task, not a
//! durable queue; a restart during the delay drops the batch, which is
//! acceptable because invalidation is idempotent and re-triggered by the
//! next change. Coordinator state is process-local by documented design.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::counter;

use crate::cache::FactoidCache;
use crate::sitewide::ChangeLog;

const DEFAULT_BURST_THRESHOLD: u32 = 3;
const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_SESSION_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_MAX_PER_HOUR: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// Caches dropped immediately.
    Applied,
    /// Queued behind the batch delay for a bursty session.
    Batched,
    /// Skipped: this result already hit its hourly stale-mark cap.
    RateLimited,
}

/// Tracks per-session change counts and the pending batch. Injected so
/// tests construct isolated instances and the process-local scope is a
/// visible constructor property rather than a hidden global.
pub struct BatchCoordinator {
    burst_threshold: u32,
    session_window: Duration,
    delay: Duration,
    sessions: Mutex<HashMap<String, (Instant, u32)>>,
    pending: Mutex<HashSet<String>>,
}

impl BatchCoordinator {
    pub fn new(burst_threshold: u32, session_window: Duration, delay: Duration) -> Self {
        Self {
            burst_threshold: burst_threshold.max(1),
            session_window,
            delay,
            sessions: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_BURST_THRESHOLD,
            DEFAULT_SESSION_WINDOW,
            DEFAULT_BATCH_DELAY,
        )
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Count one change for the session; true once the burst threshold is
    /// reached within the window.
    fn should_batch(&self, session_key: &str) -> bool {
        let now = Instant::now();
        let mut guard = lock(&self.sessions);
        let entry = guard.entry(session_key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.session_window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 >= self.burst_threshold
    }

    /// Add a council to the pending batch. True when this call started the
    /// batch (the caller should schedule a flush).
    fn enqueue(&self, slug: &str) -> bool {
        let mut guard = lock(&self.pending);
        let was_empty = guard.is_empty();
        guard.insert(slug.to_string());
        was_empty
    }

    fn drain(&self) -> Vec<String> {
        lock(&self.pending).drain().collect()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

pub struct InvalidationService {
    cache: FactoidCache,
    changelog: Arc<ChangeLog>,
    coordinator: Arc<BatchCoordinator>,
    rate: Mutex<HashMap<String, (Instant, u32)>>,
    max_per_hour: u32,
}

impl InvalidationService {
    pub fn new(
        cache: FactoidCache,
        changelog: Arc<ChangeLog>,
        coordinator: Arc<BatchCoordinator>,
    ) -> Self {
        Self {
            cache,
            changelog,
            coordinator,
            rate: Mutex::new(HashMap::new()),
            max_per_hour: DEFAULT_MAX_PER_HOUR,
        }
    }

    pub fn with_max_per_hour(mut self, max: u32) -> Self {
        self.max_per_hour = max.max(1);
        self
    }

    /// Invalidate one council's cached results. Always cascades to the
    /// sitewide aggregate, which summarizes across councils.
    pub async fn invalidate(
        &self,
        council: &str,
        _year: Option<&str>,
        reason: &str,
        session_key: Option<&str>,
        force: bool,
    ) -> InvalidationOutcome {
        if !force && !self.within_rate_limit(council) {
            tracing::debug!(council, reason, "invalidation rate-limited");
            counter!("factoid_invalidations_rate_limited_total").increment(1);
            return InvalidationOutcome::RateLimited;
        }

        if !force {
            if let Some(session) = session_key {
                if self.coordinator.should_batch(session) {
                    let start_flush = self.coordinator.enqueue(council);
                    tracing::debug!(council, session, "invalidation batched");
                    if start_flush {
                        self.spawn_flush();
                    }
                    return InvalidationOutcome::Batched;
                }
            }
        }

        self.apply(council).await;
        tracing::info!(council, reason, force, "cache invalidated");
        InvalidationOutcome::Applied
    }

    /// Entry point for the data-write boundary: records the change for the
    /// sitewide change detector, then invalidates.
    pub async fn on_financial_data_changed(
        &self,
        council: &str,
        year: Option<&str>,
        reason: &str,
        session_key: Option<&str>,
    ) -> InvalidationOutcome {
        self.changelog.record(council, year, reason);
        self.invalidate(council, year, reason, session_key, false)
            .await
    }

    /// Deletions always force: stale data after a deletion is strictly
    /// worse than extra invalidation work.
    pub async fn on_financial_data_deleted(
        &self,
        council: &str,
        year: Option<&str>,
        reason: &str,
    ) -> InvalidationOutcome {
        self.changelog.record(council, year, reason);
        self.invalidate(council, year, reason, None, true).await
    }

    /// Apply everything currently pending. Public so tests and shutdown
    /// paths can flush without waiting out the delay.
    pub async fn flush_pending(&self) {
        for slug in self.coordinator.drain() {
            self.apply(&slug).await;
            tracing::info!(council = %slug, "batched invalidation applied");
        }
    }

    async fn apply(&self, council: &str) {
        self.cache.invalidate_council(council).await;
        self.cache.invalidate_sitewide().await;
    }

    fn spawn_flush(&self) {
        let cache = self.cache.clone();
        let coordinator = Arc::clone(&self.coordinator);
        let delay = self.coordinator.delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for slug in coordinator.drain() {
                cache.invalidate_council(&slug).await;
                cache.invalidate_sitewide().await;
                tracing::info!(council = %slug, "batched invalidation applied");
            }
        });
    }

    fn within_rate_limit(&self, council: &str) -> bool {
        let now = Instant::now();
        let mut guard = lock(&self.rate);
        let entry = guard.entry(council.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= Duration::from_secs(3_600) {
            *entry = (now, 0);
        }
        if entry.1 >= self.max_per_hour {
            return false;
        }
        entry.1 += 1;
        true
    }
}
