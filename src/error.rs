//! error.rs — typed failure taxonomy for the factoid pipeline.
//!
//! Per-metric gather failures never appear here: the gatherer logs and skips
//! them. Cache-store failures degrade to a miss inside the cache layer. What
//! remains are the failures a caller can meaningfully branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoidError {
    /// No LLM credential configured. Expected in many deployments; callers
    /// short-circuit to the fallback generator without logging an error.
    #[error("no LLM credential configured")]
    LlmUnavailable,

    /// Transport or API failure from the LLM provider. The original message
    /// is preserved for logging; never a raw reqwest error to the caller.
    #[error("LLM request failed: {0}")]
    Llm(String),

    /// The model's output could not be turned into at least one factoid.
    #[error("could not parse model output: {0}")]
    Parse(String),

    /// Fixed-window throttle tripped before any gather/LLM work started.
    #[error("rate limit exceeded for '{council}' ({limit}/hour)")]
    RateLimited { council: String, limit: u32 },

    /// The slug does not resolve to a council. Maps to 404 at the API edge.
    #[error("unknown council: {0}")]
    UnknownCouncil(String),
}

impl FactoidError {
    /// True when the failure should be handled by serving fallback factoids
    /// rather than surfacing an error to the caller.
    pub fn degrades_to_fallback(&self) -> bool {
        matches!(
            self,
            FactoidError::LlmUnavailable | FactoidError::Llm(_) | FactoidError::Parse(_)
        )
    }
}
