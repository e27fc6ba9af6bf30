//! Integration tests for the sitewide scheduler state machine: window
//! checks, change detection, idempotent re-runs, and failure retry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use council_factoids::ai::{MockLlm, NullLlm, SharedLlm};
use council_factoids::cache::{sitewide_key, CacheStore, FactoidCache, MemoryStore};
use council_factoids::config::CacheConfig;
use council_factoids::gather::CouncilDataRepository;
use council_factoids::sitewide::{
    ChangeLog, SitewideGenerator, SitewideSchedule, SitewideScheduler, TickOutcome,
};
use council_factoids::snapshot::{CouncilIdentity, PeerComparison, PopulationData};

struct TwoCouncilRepo;

#[async_trait]
impl CouncilDataRepository for TwoCouncilRepo {
    async fn identity(&self, slug: &str) -> anyhow::Result<Option<CouncilIdentity>> {
        Ok(Some(CouncilIdentity {
            name: slug.to_uppercase(),
            slug: slug.into(),
            council_type: Some("County".into()),
            nation: Some("England".into()),
        }))
    }

    async fn metric_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["total-debt".into()])
    }

    async fn metric_series(
        &self,
        slug: &str,
        _metric: &str,
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        let mut m = BTreeMap::new();
        let base = if slug == "alpha" { 50.0 } else { 90.0 };
        m.insert("2023".to_string(), base * 1_000_000.0);
        Ok(m)
    }

    async fn peer_comparisons(
        &self,
        _slug: &str,
    ) -> anyhow::Result<BTreeMap<String, PeerComparison>> {
        Ok(BTreeMap::new())
    }

    async fn population(&self, _slug: &str) -> anyhow::Result<PopulationData> {
        Ok(PopulationData::default())
    }

    async fn list_slugs(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["alpha".into(), "beta".into()])
    }
}

struct Fixture {
    scheduler: SitewideScheduler,
    store: Arc<MemoryStore>,
    changelog: Arc<ChangeLog>,
    schedule_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn fixture(llm: SharedLlm) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let schedule_path = dir.path().join("sitewide_schedule.json");
    let store = Arc::new(MemoryStore::new());
    let cache = FactoidCache::new(store.clone(), CacheConfig::default());
    let changelog = Arc::new(ChangeLog::in_memory());
    let generator = SitewideGenerator::new(Arc::new(TwoCouncilRepo), llm, cache, 5, 8);
    let scheduler = SitewideScheduler::new(&schedule_path, changelog.clone(), generator);
    Fixture {
        scheduler,
        store,
        changelog,
        schedule_path,
        _dir: dir,
    }
}

fn mock_llm() -> SharedLlm {
    Arc::new(MockLlm::new(
        r#"[{"text":"Beta carries the highest debt at 90.0m","insight_type":"ranking"}]"#,
    ))
}

#[tokio::test]
async fn force_generates_and_caches_sitewide_factoids() {
    let f = fixture(mock_llm());
    let outcome = f.scheduler.tick(true, false).await;
    assert_eq!(outcome, TickOutcome::Generated { factoid_count: 1 });
    assert!(f.store.get(&sitewide_key(5)).await.is_some());
}

#[tokio::test]
async fn outside_window_nothing_happens() {
    let f = fixture(mock_llm());
    let early = Utc.with_ymd_and_hms(2026, 8, 28, 3, 0, 0).unwrap();
    assert_eq!(
        f.scheduler.tick_at(early, false, false).await,
        TickOutcome::NotInWindow
    );
    assert!(f.store.get(&sitewide_key(5)).await.is_none());
}

#[tokio::test]
async fn rerun_without_new_changes_is_a_noop() {
    let f = fixture(mock_llm());
    let morning = Utc.with_ymd_and_hms(2026, 8, 28, 6, 30, 0).unwrap();
    assert!(matches!(
        f.scheduler.tick_at(morning, false, false).await,
        TickOutcome::Generated { .. }
    ));

    // Next day's window opens, but neither the change log nor the data
    // fingerprint moved.
    let next_day = Utc.with_ymd_and_hms(2026, 8, 29, 6, 30, 0).unwrap();
    assert_eq!(
        f.scheduler.tick_at(next_day, false, false).await,
        TickOutcome::NoChanges
    );
}

#[tokio::test]
async fn change_log_entry_triggers_regeneration_and_is_consumed() {
    let f = fixture(mock_llm());
    let morning = Utc.with_ymd_and_hms(2026, 8, 28, 6, 30, 0).unwrap();
    f.scheduler.tick_at(morning, false, false).await;

    f.changelog.record("alpha", Some("2023"), "figure updated");
    let next_day = Utc.with_ymd_and_hms(2026, 8, 29, 6, 30, 0).unwrap();
    assert!(matches!(
        f.scheduler.tick_at(next_day, false, false).await,
        TickOutcome::Generated { .. }
    ));
    assert!(!f.changelog.has_pending());
}

#[tokio::test]
async fn dry_run_reports_without_generating() {
    let f = fixture(mock_llm());
    let outcome = f.scheduler.tick(true, true).await;
    assert_eq!(outcome, TickOutcome::WouldGenerate(true));
    assert!(f.store.get(&sitewide_key(5)).await.is_none());
}

#[tokio::test]
async fn failure_leaves_pending_changes_for_the_next_window() {
    let f = fixture(Arc::new(NullLlm));
    let morning = Utc.with_ymd_and_hms(2026, 8, 28, 6, 30, 0).unwrap();
    assert!(matches!(
        f.scheduler.tick_at(morning, false, false).await,
        TickOutcome::Failed(_)
    ));
    let schedule = SitewideSchedule::load(&f.schedule_path);
    assert!(schedule.pending_changes);
    assert!(schedule.last_generation_at.is_none());
}
