//! api.rs — HTTP surface over the factoid pipeline.
//!
//! Response shaping rules: the client always receives at least one factoid
//! and never a raw error payload. A fallback-only result is an integrity
//! issue, not a transparent degrade, so it ships as 503 with
//! `show_retry: true` while still carrying user-facing factoids.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::error::FactoidError;
use crate::factoid::{CacheStatus, Factoid, FactoidResponseEnvelope, InsightType};
use crate::pipeline::{FactoidPipeline, FALLBACK_MODEL};

pub const STAFF_TOKEN_HEADER: &str = "x-staff-token";

const BATCH_MIN: usize = 1;
const BATCH_MAX: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FactoidPipeline>,
    /// Shared secret for the staff-only cache endpoint. `None` disables it.
    pub staff_token: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/factoids/ai/{slug}/", get(get_factoids))
        .route("/api/factoids/ai/batch/", post(batch_factoids))
        .route("/api/factoids/ai/{slug}/cache/", delete(clear_cache))
        .route("/api/factoids/ai/status/", get(status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct FactoidApiResponse {
    #[serde(flatten)]
    envelope: FactoidResponseEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    show_retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FactoidApiResponse {
    fn ok(envelope: FactoidResponseEnvelope) -> Self {
        Self {
            envelope,
            show_retry: None,
            error: None,
        }
    }

    fn degraded(envelope: FactoidResponseEnvelope) -> Self {
        Self {
            envelope,
            show_retry: Some(true),
            error: None,
        }
    }
}

/// Envelope served on unexpected errors: a single system factoid, never an
/// exception payload.
fn processing_envelope(slug: &str) -> FactoidResponseEnvelope {
    let mut env = FactoidResponseEnvelope::new(
        slug,
        vec![Factoid::new(
            "Financial insights are being processed, please try again shortly",
            InsightType::System,
            0.3,
        )],
        FALLBACK_MODEL,
        false,
    );
    env.cache_status = CacheStatus::NotCached;
    env
}

async fn get_factoids(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> (StatusCode, Json<FactoidApiResponse>) {
    match state.pipeline.generate(&slug).await {
        Ok(envelope) if envelope.fallback_only() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(FactoidApiResponse::degraded(envelope)),
        ),
        Ok(envelope) => (StatusCode::OK, Json(FactoidApiResponse::ok(envelope))),
        Err(FactoidError::UnknownCouncil(_)) => (
            StatusCode::NOT_FOUND,
            Json(FactoidApiResponse {
                envelope: processing_envelope(&slug),
                show_retry: None,
                error: Some(format!("unknown council: {slug}")),
            }),
        ),
        Err(e @ FactoidError::RateLimited { .. }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(FactoidApiResponse {
                envelope: processing_envelope(&slug),
                show_retry: Some(true),
                error: Some(e.to_string()),
            }),
        ),
        Err(e) => {
            tracing::error!(slug, error = %e, "unexpected generation failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(FactoidApiResponse::degraded(processing_envelope(&slug))),
            )
        }
    }
}

#[derive(Deserialize)]
struct BatchRequest {
    councils: Vec<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum BatchSlot {
    Ok {
        success: bool,
        factoid_count: usize,
        cache_status: CacheStatus,
    },
    Err {
        success: bool,
        error: String,
    },
}

#[derive(Serialize)]
struct BatchResponse {
    results: std::collections::BTreeMap<String, BatchSlot>,
}

async fn batch_factoids(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, (StatusCode, Json<serde_json::Value>)> {
    let count = body.councils.len();
    if !(BATCH_MIN..=BATCH_MAX).contains(&count) {
        // Rejected before any gather/LLM work for any slug.
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("councils must contain {BATCH_MIN}-{BATCH_MAX} slugs, got {count}")
            })),
        ));
    }

    let mut results = std::collections::BTreeMap::new();
    for slug in &body.councils {
        let slot = match state.pipeline.generate(slug).await {
            Ok(envelope) => BatchSlot::Ok {
                success: envelope.success,
                factoid_count: envelope.factoid_count,
                cache_status: envelope.cache_status,
            },
            Err(e) => BatchSlot::Err {
                success: false,
                error: e.to_string(),
            },
        };
        results.insert(slug.clone(), slot);
    }
    Ok(Json(BatchResponse { results }))
}

async fn clear_cache(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let presented = headers
        .get(STAFF_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    let authorized = matches!(
        (&state.staff_token, presented),
        (Some(expected), Some(got)) if expected == got
    );
    if !authorized {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "staff only"})),
        );
    }

    state.pipeline.clear_cache(&slug).await;
    (
        StatusCode::OK,
        Json(serde_json::json!({"cleared": slug})),
    )
}

async fn status(State(state): State<AppState>) -> Json<crate::pipeline::PipelineStatus> {
    Json(state.pipeline.status())
}
