//! gather.rs — builds the normalized snapshot the prompt builder consumes.
//!
//! The repository is the boundary to whatever holds the financial records.
//! The gatherer's own contract: a per-metric read error skips that metric,
//! never aborts the gather; a total failure yields a sparse snapshot with
//! identity populated. Observed values only, no interpolation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cache::{data_key, CacheStore, SharedStore};
use crate::error::FactoidError;
use crate::snapshot::{CouncilDataSnapshot, CouncilIdentity, PeerComparison, PopulationData};

#[async_trait]
pub trait CouncilDataRepository: Send + Sync {
    /// `None` means the slug is unknown (404 at the API edge).
    async fn identity(&self, slug: &str) -> anyhow::Result<Option<CouncilIdentity>>;

    /// The configured metric keys to gather, e.g. `total-debt`.
    async fn metric_keys(&self) -> anyhow::Result<Vec<String>>;

    /// Raw values in pounds, keyed by year label. Absent years are absent.
    async fn metric_series(&self, slug: &str, metric: &str)
        -> anyhow::Result<BTreeMap<String, f64>>;

    async fn peer_comparisons(&self, slug: &str)
        -> anyhow::Result<BTreeMap<String, PeerComparison>>;

    async fn population(&self, slug: &str) -> anyhow::Result<PopulationData>;

    /// All known slugs, for the sitewide aggregate and batch jobs.
    async fn list_slugs(&self) -> anyhow::Result<Vec<String>>;
}

pub type SharedRepository = Arc<dyn CouncilDataRepository>;

const POUNDS_PER_MILLION: f64 = 1_000_000.0;

#[derive(Clone)]
pub struct DataGatherer {
    repo: SharedRepository,
    store: SharedStore,
    ttl: Duration,
}

impl DataGatherer {
    pub fn new(repo: SharedRepository, store: SharedStore, ttl_secs: u64) -> Self {
        Self {
            repo,
            store,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn repository(&self) -> SharedRepository {
        Arc::clone(&self.repo)
    }

    /// Gather the snapshot for one council, read-through cached for ~1h
    /// under `ai_council_data:{slug}`.
    pub async fn gather(&self, slug: &str) -> Result<CouncilDataSnapshot, FactoidError> {
        let key = data_key(slug);
        if let Some(raw) = self.store.get(&key).await {
            if let Ok(snap) = serde_json::from_str::<CouncilDataSnapshot>(&raw) {
                return Ok(snap);
            }
            self.store.delete(&key).await;
        }

        let identity = self
            .repo
            .identity(slug)
            .await
            .map_err(|e| {
                tracing::warn!(slug, error = %e, "identity lookup failed");
                FactoidError::UnknownCouncil(slug.to_string())
            })?
            .ok_or_else(|| FactoidError::UnknownCouncil(slug.to_string()))?;

        let snapshot = self.gather_data(slug, identity).await;

        if let Ok(raw) = serde_json::to_string(&snapshot) {
            self.store.set(&key, raw, self.ttl).await;
        }
        Ok(snapshot)
    }

    async fn gather_data(&self, slug: &str, identity: CouncilIdentity) -> CouncilDataSnapshot {
        let mut snapshot = CouncilDataSnapshot::sparse(identity);

        let metrics = match self.repo.metric_keys().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(slug, error = %e, "metric key list unavailable, sparse snapshot");
                return snapshot;
            }
        };

        for metric in &metrics {
            match self.repo.metric_series(slug, metric).await {
                Ok(series) if !series.is_empty() => {
                    let in_millions: BTreeMap<String, f64> = series
                        .into_iter()
                        .map(|(year, v)| (year, v / POUNDS_PER_MILLION))
                        .collect();
                    snapshot
                        .financial_time_series
                        .insert(metric.clone(), in_millions);
                }
                Ok(_) => {} // no observed values; absent key, not an empty map
                Err(e) => {
                    tracing::warn!(slug, metric, error = %e, "metric read failed, skipping");
                }
            }
        }

        match self.repo.peer_comparisons(slug).await {
            Ok(peers) => snapshot.peer_comparisons = peers,
            Err(e) => tracing::warn!(slug, error = %e, "peer comparisons unavailable"),
        }
        match self.repo.population(slug).await {
            Ok(pop) => snapshot.population = pop,
            Err(e) => tracing::warn!(slug, error = %e, "population unavailable"),
        }

        snapshot
    }
}

// ------------------------------------------------------------
// File-backed repository
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CouncilRecord {
    name: String,
    slug: String,
    #[serde(default)]
    council_type: Option<String>,
    #[serde(default)]
    nation: Option<String>,
    /// metric -> { year label -> value in pounds }
    #[serde(default)]
    metrics: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    peer_comparisons: BTreeMap<String, PeerComparison>,
    #[serde(default)]
    population: PopulationData,
}

#[derive(Debug, Deserialize)]
struct CouncilDataset {
    metric_keys: Vec<String>,
    councils: Vec<CouncilRecord>,
}

/// Repository over a JSON dataset file. Covers single-instance deployments
/// and fixtures; the host application supplies its own implementation
/// against the real database.
pub struct FileCouncilRepository {
    dataset: CouncilDataset,
}

impl FileCouncilRepository {
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(&path)?;
        let dataset: CouncilDataset = serde_json::from_str(&data)?;
        Ok(Self { dataset })
    }

    fn record(&self, slug: &str) -> Option<&CouncilRecord> {
        self.dataset.councils.iter().find(|c| c.slug == slug)
    }
}

#[async_trait]
impl CouncilDataRepository for FileCouncilRepository {
    async fn identity(&self, slug: &str) -> anyhow::Result<Option<CouncilIdentity>> {
        Ok(self.record(slug).map(|c| CouncilIdentity {
            name: c.name.clone(),
            slug: c.slug.clone(),
            council_type: c.council_type.clone(),
            nation: c.nation.clone(),
        }))
    }

    async fn metric_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.dataset.metric_keys.clone())
    }

    async fn metric_series(
        &self,
        slug: &str,
        metric: &str,
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        Ok(self
            .record(slug)
            .and_then(|c| c.metrics.get(metric))
            .cloned()
            .unwrap_or_default())
    }

    async fn peer_comparisons(
        &self,
        slug: &str,
    ) -> anyhow::Result<BTreeMap<String, PeerComparison>> {
        Ok(self
            .record(slug)
            .map(|c| c.peer_comparisons.clone())
            .unwrap_or_default())
    }

    async fn population(&self, slug: &str) -> anyhow::Result<PopulationData> {
        Ok(self
            .record(slug)
            .map(|c| c.population.clone())
            .unwrap_or_default())
    }

    async fn list_slugs(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.dataset.councils.iter().map(|c| c.slug.clone()).collect())
    }
}
