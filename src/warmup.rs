//! warmup.rs — proactive cache regeneration for high-traffic councils.
//!
//! Schedules come from periodic usage analysis; the warmer walks the due
//! list (priority ascending, popularity descending) and refreshes each
//! council through the normal pipeline with the warmed TTL. One council's
//! failure never aborts the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::notify::{alert_or_log, AlertPayload, WebhookNotifier};
use crate::pipeline::FactoidPipeline;

/// Failure count at which an operational alert goes out.
const ALERT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupSchedule {
    pub council: String,
    /// 1 (hottest) to 3.
    pub priority: u8,
    pub frequency_hours: u32,
    pub popularity_score: f64,
    pub consecutive_failures: u32,
    pub next_warmup: DateTime<Utc>,
}

impl WarmupSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_warmup <= now
    }

    /// Success resets the failure streak and schedules the next regular run.
    fn mark_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.next_warmup = now + Duration::hours(i64::from(self.frequency_hours));
    }

    /// Back-off grows with the streak so persistently broken councils are
    /// retried less often, not abandoned.
    fn mark_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let factor = i64::from(1 + self.consecutive_failures);
        self.next_warmup = now + Duration::hours(i64::from(self.frequency_hours) * factor);
    }
}

/// Build schedules from usage statistics: the top fifth of councils by hits
/// get priority 1 / 6h, the next two fifths priority 2 / 12h, the rest
/// priority 3 / 24h.
pub fn schedules_from_usage(usage: &[(String, u64)], now: DateTime<Utc>) -> Vec<WarmupSchedule> {
    let mut ranked: Vec<_> = usage.to_vec();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let total = ranked.len().max(1);

    ranked
        .into_iter()
        .enumerate()
        .map(|(rank, (council, hits))| {
            let (priority, frequency_hours) = if rank * 5 < total {
                (1, 6)
            } else if rank * 5 < total * 3 {
                (2, 12)
            } else {
                (3, 24)
            };
            WarmupSchedule {
                council,
                priority,
                frequency_hours,
                popularity_score: hits as f64,
                consecutive_failures: 0,
                next_warmup: now,
            }
        })
        .collect()
}

/// Due entries in warmup order: priority ascending, then popularity
/// descending.
pub fn due_in_order(schedules: &[WarmupSchedule], now: DateTime<Utc>) -> Vec<WarmupSchedule> {
    let mut due: Vec<_> = schedules.iter().filter(|s| s.is_due(now)).cloned().collect();
    due.sort_by(|a, b| {
        a.priority.cmp(&b.priority).then(
            b.popularity_score
                .partial_cmp(&a.popularity_score)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    due
}

/// JSON-file persistence for the schedule set.
pub struct ScheduleBook {
    path: PathBuf,
}

impl ScheduleBook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Vec<WarmupSchedule> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, schedules: &[WarmupSchedule]) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(schedules)?)?;
        Ok(())
    }

    /// Merge freshly-analyzed schedules, keeping failure/next-run state for
    /// councils that already had an entry.
    pub fn upsert(&self, fresh: Vec<WarmupSchedule>) -> anyhow::Result<usize> {
        let existing = self.load();
        let mut merged = Vec::with_capacity(fresh.len());
        for mut schedule in fresh {
            if let Some(prev) = existing.iter().find(|e| e.council == schedule.council) {
                schedule.consecutive_failures = prev.consecutive_failures;
                schedule.next_warmup = prev.next_warmup;
            }
            merged.push(schedule);
        }
        let count = merged.len();
        self.save(&merged)?;
        Ok(count)
    }
}

#[derive(Debug, Default)]
pub struct WarmupReport {
    pub warmed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: usize,
}

pub struct CacheWarmer {
    pipeline: Arc<FactoidPipeline>,
    notifier: Option<WebhookNotifier>,
    max_councils: usize,
}

impl CacheWarmer {
    pub fn new(pipeline: Arc<FactoidPipeline>, notifier: Option<WebhookNotifier>) -> Self {
        Self {
            pipeline,
            notifier,
            max_councils: usize::MAX,
        }
    }

    pub fn with_max_councils(mut self, max: usize) -> Self {
        self.max_councils = max.max(1);
        self
    }

    /// Sequentially warm every due schedule, mutating each entry's failure
    /// and next-run state in place.
    pub async fn run(
        &self,
        schedules: &mut [WarmupSchedule],
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> WarmupReport {
        let due_order: Vec<String> = due_in_order(schedules, now)
            .into_iter()
            .take(self.max_councils)
            .map(|s| s.council)
            .collect();

        let mut report = WarmupReport {
            skipped: schedules.len() - due_order.len().min(schedules.len()),
            ..WarmupReport::default()
        };

        for council in &due_order {
            let Some(schedule) = schedules.iter_mut().find(|s| &s.council == council) else {
                continue;
            };
            if dry_run {
                report.warmed.push(council.clone());
                continue;
            }

            match self.pipeline.refresh(council).await {
                Ok(envelope) => {
                    schedule.mark_success(now);
                    counter!("factoid_warmup_success_total").increment(1);
                    tracing::info!(
                        council,
                        factoids = envelope.factoid_count,
                        "warmed council cache"
                    );
                    report.warmed.push(council.clone());
                }
                Err(e) => {
                    schedule.mark_failure(now);
                    counter!("factoid_warmup_failure_total").increment(1);
                    tracing::warn!(council, error = %e, failures = schedule.consecutive_failures, "warmup failed");
                    if schedule.consecutive_failures == ALERT_FAILURE_THRESHOLD {
                        alert_or_log(
                            &self.notifier,
                            AlertPayload {
                                council: council.clone(),
                                consecutive_failures: schedule.consecutive_failures,
                                message: e.to_string(),
                                timestamp_iso: now.to_rfc3339(),
                            },
                        )
                        .await;
                    }
                    report.failed.push(council.clone());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(council: &str, priority: u8, popularity: f64) -> WarmupSchedule {
        WarmupSchedule {
            council: council.into(),
            priority,
            frequency_hours: 6,
            popularity_score: popularity,
            consecutive_failures: 0,
            next_warmup: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn due_order_is_priority_then_popularity() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let schedules = vec![
            schedule("low-pop-p1", 1, 10.0),
            schedule("p2", 2, 999.0),
            schedule("high-pop-p1", 1, 80.0),
        ];
        let due = due_in_order(&schedules, now);
        let names: Vec<_> = due.iter().map(|s| s.council.as_str()).collect();
        assert_eq!(names, vec!["high-pop-p1", "low-pop-p1", "p2"]);
    }

    #[test]
    fn backoff_grows_with_failures_and_resets_on_success() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let mut s = schedule("a", 1, 1.0);
        s.mark_failure(now);
        assert_eq!(s.consecutive_failures, 1);
        assert_eq!(s.next_warmup, now + Duration::hours(12));
        s.mark_failure(now);
        assert_eq!(s.next_warmup, now + Duration::hours(18));
        s.mark_success(now);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.next_warmup, now + Duration::hours(6));
    }

    #[test]
    fn usage_analysis_tiers_by_rank() {
        let now = Utc::now();
        let usage: Vec<(String, u64)> =
            (0..10).map(|i| (format!("c{i}"), 100 - i as u64)).collect();
        let schedules = schedules_from_usage(&usage, now);
        assert_eq!(schedules[0].priority, 1);
        assert_eq!(schedules[0].frequency_hours, 6);
        assert_eq!(schedules[4].priority, 2);
        assert_eq!(schedules[9].priority, 3);
        assert_eq!(schedules[9].frequency_hours, 24);
    }

    #[test]
    fn not_due_entries_are_skipped() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut future = schedule("later", 1, 1.0);
        future.next_warmup = now + Duration::hours(4);
        assert!(due_in_order(&[future], now).is_empty());
    }
}
