//! pipeline.rs — the per-council generation path.
//!
//! Request flow: throttle → primary cache (hit returns) → gather → prompt →
//! complete → parse → dual-tier cache write. Any LLM/parse failure degrades
//! first to the stale tier, then to the fallback generator; fallback-only
//! envelopes are never cached and carry `success=false` so the API edge can
//! shape them as 503.

use std::sync::Arc;

use metrics::counter;

use crate::ai::{parse_factoids, SharedLlm};
use crate::cache::FactoidCache;
use crate::error::FactoidError;
use crate::factoid::{CacheStatus, FactoidResponseEnvelope};
use crate::fallback::fallback_factoids;
use crate::gather::DataGatherer;
use crate::prompt::{build_council_prompt, PromptStyle};
use crate::snapshot::CouncilDataSnapshot;
use crate::throttle::RateThrottle;

/// Model identifier recorded on envelopes the fallback generator produced.
pub const FALLBACK_MODEL: &str = "fallback";

pub struct FactoidPipeline {
    gatherer: DataGatherer,
    llm: SharedLlm,
    cache: FactoidCache,
    throttle: RateThrottle,
    factoid_limit: usize,
    style: PromptStyle,
}

impl FactoidPipeline {
    pub fn new(
        gatherer: DataGatherer,
        llm: SharedLlm,
        cache: FactoidCache,
        throttle: RateThrottle,
        factoid_limit: usize,
    ) -> Self {
        Self {
            gatherer,
            llm,
            cache,
            throttle,
            factoid_limit,
            style: PromptStyle::Standard,
        }
    }

    pub fn with_style(mut self, style: PromptStyle) -> Self {
        self.style = style;
        self
    }

    pub fn cache(&self) -> &FactoidCache {
        &self.cache
    }

    pub fn gatherer(&self) -> &DataGatherer {
        &self.gatherer
    }

    pub fn llm(&self) -> &SharedLlm {
        &self.llm
    }

    pub fn factoid_limit(&self) -> usize {
        self.factoid_limit
    }

    /// The request-serving entrypoint: throttled and read-through cached.
    pub async fn generate(&self, slug: &str) -> Result<FactoidResponseEnvelope, FactoidError> {
        self.throttle.check(slug)?;

        if let Some(cached) = self.cache.read_primary(slug).await {
            return Ok(cached);
        }
        counter!("factoid_cache_misses_total").increment(1);

        self.generate_uncached(slug, false).await
    }

    /// Background refresh for the cache warmer: bypasses the throttle and
    /// the cache read, writes with the warmed (7d) TTL. Fails rather than
    /// falling back, so the warmer can track per-council failures.
    pub async fn refresh(&self, slug: &str) -> Result<FactoidResponseEnvelope, FactoidError> {
        let snapshot = self.gatherer.gather(slug).await?;
        let envelope = self.generate_ai(&snapshot).await?;
        self.cache.write_envelope(&envelope, true).await;
        Ok(envelope)
    }

    /// Drop all three per-council cache keys (staff endpoint).
    pub async fn clear_cache(&self, slug: &str) {
        self.cache.invalidate_council(slug).await;
    }

    async fn generate_uncached(
        &self,
        slug: &str,
        warmed: bool,
    ) -> Result<FactoidResponseEnvelope, FactoidError> {
        let snapshot = self.gatherer.gather(slug).await?;

        match self.generate_ai(&snapshot).await {
            Ok(envelope) => {
                self.cache.write_envelope(&envelope, warmed).await;
                Ok(envelope)
            }
            Err(e) if e.degrades_to_fallback() => {
                // Safety net first: a long-TTL stale entry from a prior
                // AI run beats deterministic filler.
                if let Some(stale) = self.cache.read_stale(slug).await {
                    tracing::info!(slug, error = %e, "serving stale entry after generation failure");
                    counter!("factoid_stale_served_total").increment(1);
                    return Ok(stale);
                }
                if matches!(e, FactoidError::LlmUnavailable) {
                    tracing::debug!(slug, "LLM unavailable, serving fallback");
                } else {
                    tracing::warn!(slug, error = %e, "generation failed, serving fallback");
                }
                counter!("factoid_fallbacks_total").increment(1);
                Ok(self.fallback_envelope(&snapshot))
            }
            Err(e) => Err(e),
        }
    }

    async fn generate_ai(
        &self,
        snapshot: &CouncilDataSnapshot,
    ) -> Result<FactoidResponseEnvelope, FactoidError> {
        if !self.llm.is_available() {
            return Err(FactoidError::LlmUnavailable);
        }

        let prompt = build_council_prompt(snapshot, self.factoid_limit, self.style);
        counter!("factoid_llm_calls_total").increment(1);
        let raw = self.llm.complete(&prompt).await?;

        let factoids = parse_factoids(&raw).map_err(|e| {
            tracing::debug!(raw, "unparseable model output");
            e
        })?;

        Ok(FactoidResponseEnvelope::new(
            &snapshot.identity.slug,
            factoids,
            self.llm.model_name(),
            true,
        ))
    }

    fn fallback_envelope(&self, snapshot: &CouncilDataSnapshot) -> FactoidResponseEnvelope {
        let factoids = fallback_factoids(snapshot, self.factoid_limit);
        let mut envelope = FactoidResponseEnvelope::new(
            &snapshot.identity.slug,
            factoids,
            FALLBACK_MODEL,
            false,
        );
        envelope.cache_status = CacheStatus::NotCached;
        envelope
    }

    /// Operational status for the `/status/` endpoint and CLI diagnostics.
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            ai_available: self.llm.is_available(),
            ai_model: self.llm.model_name().to_string(),
            cache_backend: self.cache.backend_name().to_string(),
            rate_limit_per_hour: self.throttle.limit(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStatus {
    pub ai_available: bool,
    pub ai_model: String,
    pub cache_backend: String,
    pub rate_limit_per_hour: u32,
}

/// Convenience constructor wiring the default throttle from config.
pub fn build_pipeline(
    gatherer: DataGatherer,
    llm: SharedLlm,
    cache: FactoidCache,
    factoid_limit: usize,
) -> Arc<FactoidPipeline> {
    let throttle = RateThrottle::per_hour(cache.config().rate_limit_per_hour);
    Arc::new(FactoidPipeline::new(
        gatherer, llm, cache, throttle, factoid_limit,
    ))
}
