//! fallback.rs — deterministic, data-only factoid synthesis.
//!
//! Pure function of the snapshot: no network, no clock, and it cannot fail.
//! Output is tagged `basic` (confidence 1.0) so callers can tell filler
//! from model insight without inspecting text; the absolute last resort is
//! a single `system` factoid at reduced confidence.

use crate::factoid::{Factoid, InsightType};
use crate::snapshot::CouncilDataSnapshot;

/// Metric preferred for the headline figure when present.
const PRIMARY_METRIC: &str = "total-debt";

const LAST_RESORT_CONFIDENCE: f32 = 0.4;

/// Produce at most `limit` factoids (always at least one).
pub fn fallback_factoids(snapshot: &CouncilDataSnapshot, limit: usize) -> Vec<Factoid> {
    let limit = limit.max(1);
    let mut out = Vec::with_capacity(limit);
    let name = display_name(snapshot);

    if let Some(pop) = snapshot.population.latest {
        out.push(Factoid::new(
            format!("{name} serves a population of {}", group_thousands(pop)),
            InsightType::Basic,
            1.0,
        ));
    }

    if let Some((metric, year, value)) = headline_figure(snapshot) {
        out.push(Factoid::new(
            format!("{name} reported {metric} of £{value:.1}m in {year}"),
            InsightType::Basic,
            1.0,
        ));
    }

    if let Some(ct) = &snapshot.identity.council_type {
        let text = match &snapshot.identity.nation {
            Some(nation) => format!("{name} is a {} council in {nation}", ct.to_lowercase()),
            None => format!("{name} is a {} council", ct.to_lowercase()),
        };
        out.push(Factoid::new(text, InsightType::Basic, 1.0));
    }

    if out.is_empty() {
        out.push(Factoid::new(
            format!("Financial insights for {name} are being prepared"),
            InsightType::System,
            LAST_RESORT_CONFIDENCE,
        ));
    }

    out.truncate(limit);
    out
}

fn display_name(snapshot: &CouncilDataSnapshot) -> String {
    let name = snapshot.identity.name.trim();
    if name.is_empty() {
        if snapshot.identity.slug.trim().is_empty() {
            "This council".to_string()
        } else {
            snapshot.identity.slug.trim().to_string()
        }
    } else {
        name.to_string()
    }
}

fn headline_figure(snapshot: &CouncilDataSnapshot) -> Option<(String, String, f64)> {
    let metric = if snapshot.financial_time_series.contains_key(PRIMARY_METRIC) {
        PRIMARY_METRIC.to_string()
    } else {
        snapshot.financial_time_series.keys().next()?.clone()
    };
    let (year, value) = snapshot.latest_value(&metric)?;
    Some((metric.replace('-', " "), year.to_string(), value))
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CouncilIdentity, PopulationData};
    use std::collections::BTreeMap;

    #[test]
    fn empty_snapshot_still_yields_one_factoid() {
        let snap = CouncilDataSnapshot::sparse(CouncilIdentity::default());
        let out = fallback_factoids(&snap, 3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].insight_type, InsightType::System);
        assert!(out[0].confidence < 1.0);
    }

    #[test]
    fn population_leads_the_priority_order() {
        let mut snap = CouncilDataSnapshot::sparse(CouncilIdentity {
            name: "Worcestershire".into(),
            slug: "worcestershire".into(),
            council_type: Some("County".into()),
            nation: Some("England".into()),
        });
        snap.population = PopulationData {
            latest: Some(592_000),
            trend: None,
        };
        let mut series = BTreeMap::new();
        series.insert("2023".to_string(), 79.0);
        snap.financial_time_series
            .insert("total-debt".to_string(), series);

        let out = fallback_factoids(&snap, 3);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].text, "Worcestershire serves a population of 592,000");
        assert_eq!(out[1].text, "Worcestershire reported total debt of £79.0m in 2023");
        assert!(out.iter().all(|f| f.insight_type == InsightType::Basic));
        assert!(out.iter().all(|f| (f.confidence - 1.0).abs() < 1e-6));
    }

    #[test]
    fn limit_is_respected() {
        let mut snap = CouncilDataSnapshot::sparse(CouncilIdentity {
            name: "Worcestershire".into(),
            slug: "worcestershire".into(),
            council_type: Some("County".into()),
            nation: Some("England".into()),
        });
        snap.population = PopulationData {
            latest: Some(592_000),
            trend: None,
        };
        let out = fallback_factoids(&snap, 1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn zero_limit_is_bumped_to_one() {
        let snap = CouncilDataSnapshot::sparse(CouncilIdentity::default());
        assert_eq!(fallback_factoids(&snap, 0).len(), 1);
    }
}
