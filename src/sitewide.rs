//! sitewide.rs — cross-council factoid generation on a daily schedule.
//!
//! The scheduler walks Idle → CheckWindow → DetectChanges → Generate and
//! back. Generation only happens when a trigger window is open and the
//! change log (or the dataset fingerprint) says something moved since the
//! last successful run. `force` bypasses both checks; `dry_run` reports
//! what would happen without generating.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ai::{parse_factoids, SharedLlm};
use crate::cache::FactoidCache;
use crate::error::FactoidError;
use crate::factoid::FactoidResponseEnvelope;
use crate::gather::SharedRepository;
use crate::prompt::{build_sitewide_prompt, FieldSummary};

/// Slug recorded on sitewide envelopes.
pub const SITEWIDE_SLUG: &str = "sitewide";

/// How many councils appear in each top/bottom ranking.
const RANKING_SIZE: usize = 3;

// ------------------------------------------------------------
// Change log
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub council: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    pub reason: String,
    pub logged_at: DateTime<Utc>,
    pub processed: bool,
}

/// Append-only record of financial-data mutations, optionally persisted so
/// pending changes survive a restart.
pub struct ChangeLog {
    path: Option<PathBuf>,
    entries: Mutex<Vec<ChangeLogEntry>>,
}

impl ChangeLog {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn at_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    pub fn record(&self, council: &str, year: Option<&str>, reason: &str) {
        let snapshot = {
            let mut guard = self.lock();
            guard.push(ChangeLogEntry {
                council: council.to_string(),
                year: year.map(str::to_string),
                reason: reason.to_string(),
                logged_at: Utc::now(),
                processed: false,
            });
            self.path.as_ref().map(|_| guard.clone())
        };
        self.persist(snapshot);
    }

    pub fn has_pending(&self) -> bool {
        self.lock().iter().any(|e| !e.processed)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().iter().filter(|e| !e.processed).count()
    }

    /// Idempotent: marking an already-processed log again is a no-op.
    pub fn mark_all_processed(&self) {
        let snapshot = {
            let mut guard = self.lock();
            for entry in guard.iter_mut() {
                entry.processed = true;
            }
            self.path.as_ref().map(|_| guard.clone())
        };
        self.persist(snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ChangeLogEntry>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn persist(&self, snapshot: Option<Vec<ChangeLogEntry>>) {
        let (Some(path), Some(entries)) = (&self.path, snapshot) else {
            return;
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match serde_json::to_vec_pretty(&entries) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    tracing::warn!(path = %path.display(), error = %e, "change log write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "change log serialize failed"),
        }
    }
}

// ------------------------------------------------------------
// Schedule state
// ------------------------------------------------------------

fn default_update_times() -> Vec<NaiveTime> {
    vec![
        NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
        NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitewideSchedule {
    #[serde(default = "default_update_times")]
    pub update_times: Vec<NaiveTime>,
    #[serde(default)]
    pub pending_changes: bool,
    #[serde(default)]
    pub last_generation_at: Option<DateTime<Utc>>,
    /// sha256 of the aggregated dataset at the last successful run.
    #[serde(default)]
    pub last_data_hash: Option<String>,
}

impl Default for SitewideSchedule {
    fn default() -> Self {
        Self {
            update_times: default_update_times(),
            pending_changes: false,
            last_generation_at: None,
            last_data_hash: None,
        }
    }
}

impl SitewideSchedule {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// A window is open when a daily trigger time has passed today and no
    /// generation has run since that trigger.
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        self.update_times.iter().any(|t| {
            let trigger = today.and_time(*t).and_utc();
            now >= trigger
                && self
                    .last_generation_at
                    .map(|last| last < trigger)
                    .unwrap_or(true)
        })
    }
}

// ------------------------------------------------------------
// Aggregation + generation
// ------------------------------------------------------------

pub struct SitewideGenerator {
    repo: SharedRepository,
    llm: SharedLlm,
    cache: FactoidCache,
    limit: usize,
    max_fields: usize,
}

impl SitewideGenerator {
    pub fn new(
        repo: SharedRepository,
        llm: SharedLlm,
        cache: FactoidCache,
        limit: usize,
        max_fields: usize,
    ) -> Self {
        Self {
            repo,
            llm,
            cache,
            limit,
            max_fields,
        }
    }

    /// Reduce every council's latest values to per-field statistics. The
    /// prompt later consumes these summaries, never the raw series, so
    /// prompt size stays bounded regardless of council count.
    pub async fn aggregate(&self) -> anyhow::Result<Vec<FieldSummary>> {
        let slugs = self.repo.list_slugs().await?;
        let metrics = self.repo.metric_keys().await?;
        let mut summaries = Vec::with_capacity(metrics.len());

        for metric in &metrics {
            let mut ranked: Vec<(String, f64)> = Vec::new();
            let mut by_type: BTreeMap<String, (f64, usize)> = BTreeMap::new();
            let mut by_nation: BTreeMap<String, (f64, usize)> = BTreeMap::new();

            for slug in &slugs {
                let series = match self.repo.metric_series(slug, metric).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(slug, metric, error = %e, "skipping council in aggregate");
                        continue;
                    }
                };
                let Some(latest) = series.values().next_back().map(|v| v / 1_000_000.0) else {
                    continue;
                };
                let identity = match self.repo.identity(slug).await {
                    Ok(Some(id)) => id,
                    _ => continue,
                };
                ranked.push((identity.name.clone(), latest));
                if let Some(ct) = identity.council_type {
                    let slot = by_type.entry(ct).or_insert((0.0, 0));
                    slot.0 += latest;
                    slot.1 += 1;
                }
                if let Some(nation) = identity.nation {
                    let slot = by_nation.entry(nation).or_insert((0.0, 0));
                    slot.0 += latest;
                    slot.1 += 1;
                }
            }

            if ranked.is_empty() {
                continue;
            }
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let top = ranked.iter().take(RANKING_SIZE).cloned().collect();
            let bottom = ranked.iter().rev().take(RANKING_SIZE).cloned().collect();

            summaries.push(FieldSummary {
                field: metric.clone(),
                top,
                bottom,
                average_by_type: by_type
                    .into_iter()
                    .map(|(k, (sum, n))| (k, sum / n as f64))
                    .collect(),
                average_by_nation: by_nation
                    .into_iter()
                    .map(|(k, (sum, n))| (k, sum / n as f64))
                    .collect(),
            });
        }

        Ok(summaries)
    }

    /// Stable digest of the aggregated dataset; a changed digest means the
    /// underlying data moved even if no change-log entry was recorded.
    pub fn fingerprint(summaries: &[FieldSummary]) -> String {
        let mut hasher = Sha256::new();
        for s in summaries {
            hasher.update(s.field.as_bytes());
            for (name, v) in s.top.iter().chain(s.bottom.iter()) {
                hasher.update(name.as_bytes());
                hasher.update(v.to_bits().to_le_bytes());
            }
            for (k, v) in s.average_by_type.iter().chain(s.average_by_nation.iter()) {
                hasher.update(k.as_bytes());
                hasher.update(v.to_bits().to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    pub async fn generate(
        &self,
        summaries: &[FieldSummary],
    ) -> Result<FactoidResponseEnvelope, FactoidError> {
        if !self.llm.is_available() {
            return Err(FactoidError::LlmUnavailable);
        }
        let prompt = build_sitewide_prompt(summaries, self.limit, self.max_fields);
        let raw = self.llm.complete(&prompt).await?;
        let factoids = parse_factoids(&raw)?;
        let envelope =
            FactoidResponseEnvelope::new(SITEWIDE_SLUG, factoids, self.llm.model_name(), true);
        self.cache.write_sitewide(&envelope, self.limit).await;
        Ok(envelope)
    }
}

// ------------------------------------------------------------
// Scheduler state machine
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    CheckWindow,
    DetectChanges,
    Generate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No trigger window open; nothing happened.
    NotInWindow,
    /// Window open but no data changed since the last successful run.
    NoChanges,
    /// Dry run: reports whether a real tick would have generated.
    WouldGenerate(bool),
    Generated { factoid_count: usize },
    Failed(String),
}

pub struct SitewideScheduler {
    schedule_path: PathBuf,
    changelog: std::sync::Arc<ChangeLog>,
    generator: SitewideGenerator,
}

impl SitewideScheduler {
    pub fn new(
        schedule_path: impl Into<PathBuf>,
        changelog: std::sync::Arc<ChangeLog>,
        generator: SitewideGenerator,
    ) -> Self {
        Self {
            schedule_path: schedule_path.into(),
            changelog,
            generator,
        }
    }

    /// Write a fresh default schedule file (`--init-schedule`).
    pub fn init_schedule(&self) -> anyhow::Result<()> {
        SitewideSchedule::default().save(&self.schedule_path)
    }

    /// One scheduler tick. Re-running after a successful generation with no
    /// new changes is a no-op (`NoChanges`).
    pub async fn tick(&self, force: bool, dry_run: bool) -> TickOutcome {
        self.tick_at(Utc::now(), force, dry_run).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>, force: bool, dry_run: bool) -> TickOutcome {
        let mut schedule = SitewideSchedule::load(&self.schedule_path);
        let mut state = SchedulerState::Idle;
        let mut fingerprint: Option<String> = None;
        let mut summaries: Vec<FieldSummary> = Vec::new();

        loop {
            state = match state {
                SchedulerState::Idle => {
                    if force {
                        SchedulerState::Generate
                    } else {
                        SchedulerState::CheckWindow
                    }
                }
                SchedulerState::CheckWindow => {
                    if !schedule.in_window(now) {
                        return TickOutcome::NotInWindow;
                    }
                    SchedulerState::DetectChanges
                }
                SchedulerState::DetectChanges => {
                    summaries = match self.generator.aggregate().await {
                        Ok(s) => s,
                        Err(e) => return TickOutcome::Failed(format!("aggregate failed: {e}")),
                    };
                    let digest = SitewideGenerator::fingerprint(&summaries);
                    let data_moved = schedule.last_data_hash.as_deref() != Some(digest.as_str());
                    fingerprint = Some(digest);

                    if self.changelog.has_pending() || data_moved {
                        schedule.pending_changes = true;
                        SchedulerState::Generate
                    } else {
                        return TickOutcome::NoChanges;
                    }
                }
                SchedulerState::Generate => {
                    if dry_run {
                        return TickOutcome::WouldGenerate(true);
                    }
                    if summaries.is_empty() {
                        summaries = match self.generator.aggregate().await {
                            Ok(s) => s,
                            Err(e) => {
                                return TickOutcome::Failed(format!("aggregate failed: {e}"))
                            }
                        };
                        fingerprint = Some(SitewideGenerator::fingerprint(&summaries));
                    }
                    match self.generator.generate(&summaries).await {
                        Ok(envelope) => {
                            schedule.pending_changes = false;
                            schedule.last_generation_at = Some(now);
                            schedule.last_data_hash = fingerprint.take();
                            self.changelog.mark_all_processed();
                            if let Err(e) = schedule.save(&self.schedule_path) {
                                tracing::warn!(error = %e, "schedule state write failed");
                            }
                            return TickOutcome::Generated {
                                factoid_count: envelope.factoid_count,
                            };
                        }
                        Err(e) => {
                            // Leave pending_changes set so the next window retries.
                            if let Err(se) = schedule.save(&self.schedule_path) {
                                tracing::warn!(error = %se, "schedule state write failed");
                            }
                            return TickOutcome::Failed(e.to_string());
                        }
                    }
                }
            };
        }
    }
}
