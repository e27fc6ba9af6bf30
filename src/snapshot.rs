//! snapshot.rs — the gathered, normalized data bundle for one council.
//!
//! Values in `financial_time_series` are pre-normalized to millions; missing
//! metrics are absent keys, never null placeholders. `BTreeMap` keeps
//! iteration order stable so prompt building stays byte-deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouncilIdentity {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub council_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerComparison {
    /// This council's value for the metric, in millions.
    pub value: f64,
    /// Average across comparable councils, in millions.
    pub peer_average: f64,
    /// 0–100; where this council sits among its peers.
    pub percentile: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopulationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilDataSnapshot {
    pub identity: CouncilIdentity,
    /// metric key -> { year label -> value in millions }
    pub financial_time_series: BTreeMap<String, BTreeMap<String, f64>>,
    pub peer_comparisons: BTreeMap<String, PeerComparison>,
    pub population: PopulationData,
}

impl CouncilDataSnapshot {
    /// A snapshot with identity populated and all data maps empty. This is
    /// what the gatherer returns on total failure; callers must tolerate it.
    pub fn sparse(identity: CouncilIdentity) -> Self {
        Self {
            identity,
            financial_time_series: BTreeMap::new(),
            peer_comparisons: BTreeMap::new(),
            population: PopulationData::default(),
        }
    }

    pub fn latest_value(&self, metric: &str) -> Option<(&str, f64)> {
        self.financial_time_series
            .get(metric)?
            .iter()
            .next_back()
            .map(|(y, v)| (y.as_str(), *v))
    }

    pub fn earliest_value(&self, metric: &str) -> Option<(&str, f64)> {
        self.financial_time_series
            .get(metric)?
            .iter()
            .next()
            .map(|(y, v)| (y.as_str(), *v))
    }

    /// Percent change from the earliest to the latest available year.
    /// Intermediate years are deliberately ignored (preserved source
    /// behavior). Returns `None` for metrics with fewer than 2 data points
    /// or a zero base value.
    pub fn percent_change(&self, metric: &str) -> Option<f64> {
        let series = self.financial_time_series.get(metric)?;
        if series.len() < 2 {
            return None;
        }
        let first = *series.values().next()?;
        let last = *series.values().next_back()?;
        if first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }

    pub fn has_financial_data(&self) -> bool {
        self.financial_time_series
            .values()
            .any(|series| !series.is_empty())
    }
}
