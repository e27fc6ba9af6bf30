//! factoid.rs — the atomic output unit and the cached response envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap applied to factoid text everywhere it enters the system.
pub const MAX_FACTOID_CHARS: usize = 150;

/// Typed category of an insight. `Basic` and `System` mark rule-generated
/// filler; everything else is expected to come from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Trend,
    Comparison,
    Peak,
    Change,
    Ranking,
    Efficiency,
    Volatility,
    Basic,
    System,
    Error,
    /// Catch-all; also what unknown model-supplied categories collapse to.
    #[serde(other)]
    General,
}

/// A single short insight with a typed category and confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factoid {
    pub text: String,
    pub insight_type: InsightType,
    /// 0.0–1.0. AI-sourced factoids default to 0.8, fallback to 1.0,
    /// the last-resort placeholder to 0.3–0.5.
    pub confidence: f32,
}

impl Factoid {
    pub fn new(text: impl Into<String>, insight_type: InsightType, confidence: f32) -> Self {
        Self {
            text: truncate_text(&text.into()),
            insight_type,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Rule-generated filler rather than a model insight.
    pub fn is_fallback(&self) -> bool {
        matches!(self.insight_type, InsightType::Basic | InsightType::System)
    }
}

/// Truncate to `MAX_FACTOID_CHARS` characters, respecting char boundaries.
pub fn truncate_text(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_FACTOID_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().take(MAX_FACTOID_CHARS).collect()
}

/// Where a served response came from, relative to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Fresh,
    Cached,
    NotCached,
}

/// The cached unit: one generation result for one council (or the sitewide
/// aggregate, where `council` holds a sentinel slug).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoidResponseEnvelope {
    pub success: bool,
    pub council: String,
    pub factoids: Vec<Factoid>,
    pub generated_at: DateTime<Utc>,
    pub ai_model: String,
    pub cache_status: CacheStatus,
    pub factoid_count: usize,
}

impl FactoidResponseEnvelope {
    pub fn new(
        council: impl Into<String>,
        factoids: Vec<Factoid>,
        ai_model: impl Into<String>,
        success: bool,
    ) -> Self {
        let factoid_count = factoids.len();
        Self {
            success,
            council: council.into(),
            factoids,
            generated_at: Utc::now(),
            ai_model: ai_model.into(),
            cache_status: CacheStatus::Fresh,
            factoid_count,
        }
    }

    /// True when every factoid is rule-generated filler. Such envelopes are
    /// never written to the primary cache tier and surface as 503 upstream.
    pub fn fallback_only(&self) -> bool {
        !self.factoids.is_empty() && self.factoids.iter().all(Factoid::is_fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_char_boundary_safe() {
        let long = "é".repeat(200);
        let out = truncate_text(&long);
        assert_eq!(out.chars().count(), MAX_FACTOID_CHARS);
    }

    #[test]
    fn unknown_insight_type_collapses_to_general() {
        let t: InsightType = serde_json::from_str("\"wibble\"").unwrap();
        assert_eq!(t, InsightType::General);
        let t: InsightType = serde_json::from_str("\"trend\"").unwrap();
        assert_eq!(t, InsightType::Trend);
    }

    #[test]
    fn fallback_only_detection() {
        let mut env = FactoidResponseEnvelope::new(
            "worcestershire",
            vec![Factoid::new("a", InsightType::Basic, 1.0)],
            "fallback",
            false,
        );
        assert!(env.fallback_only());
        env.factoids.push(Factoid::new("b", InsightType::Trend, 0.8));
        assert!(!env.fallback_only());
    }
}
