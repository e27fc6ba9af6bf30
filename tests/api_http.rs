//! Integration tests for the HTTP surface.
//!
//! Covered (strict):
//! - 200 envelope shape for an AI-sourced result, cached in both tiers
//! - 503 + show_retry for fallback-only results, primary tier left empty
//! - 404 for unknown councils
//! - batch size validation rejects before any repository/LLM work
//! - staff-token enforcement on the cache-clear endpoint
//! - status endpoint shape

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot

use council_factoids::ai::{MockLlm, NullLlm, SharedLlm};
use council_factoids::api::{create_router, AppState, STAFF_TOKEN_HEADER};
use council_factoids::cache::{primary_key, stale_key, CacheStore, FactoidCache, MemoryStore};
use council_factoids::config::CacheConfig;
use council_factoids::gather::{CouncilDataRepository, DataGatherer};
use council_factoids::pipeline::FactoidPipeline;
use council_factoids::snapshot::{CouncilIdentity, PeerComparison, PopulationData};
use council_factoids::throttle::RateThrottle;

struct CountingRepo {
    reads: AtomicUsize,
}

impl CountingRepo {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CouncilDataRepository for CountingRepo {
    async fn identity(&self, slug: &str) -> anyhow::Result<Option<CouncilIdentity>> {
        if slug != "worcestershire" {
            return Ok(None);
        }
        Ok(Some(CouncilIdentity {
            name: "Worcestershire".into(),
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
        _slug: &str,
        _metric: &str,
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut m = BTreeMap::new();
        m.insert("2019".to_string(), 50_000_000.0);
        m.insert("2023".to_string(), 79_000_000.0);
        Ok(m)
    }

    async fn peer_comparisons(
        &self,
        _slug: &str,
    ) -> anyhow::Result<BTreeMap<String, PeerComparison>> {
        Ok(BTreeMap::new())
    }

    async fn population(&self, _slug: &str) -> anyhow::Result<PopulationData> {
        Ok(PopulationData {
            latest: Some(592_000),
            trend: None,
        })
    }

    async fn list_slugs(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["worcestershire".into()])
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    repo: Arc<CountingRepo>,
}

fn build_app(llm: SharedLlm, staff_token: Option<&str>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let repo = CountingRepo::new();
    let cache = FactoidCache::new(store.clone(), CacheConfig::default());
    let gatherer = DataGatherer::new(repo.clone(), store.clone(), 3_600);
    let pipeline = Arc::new(FactoidPipeline::new(
        gatherer,
        llm,
        cache,
        RateThrottle::per_hour(25),
        3,
    ));
    let router = create_router(AppState {
        pipeline,
        staff_token: staff_token.map(str::to_string),
    });
    TestApp {
        router,
        store,
        repo,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.expect("router response");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON body")
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request build")
}

#[tokio::test]
async fn ai_result_is_served_and_cached_in_both_tiers() {
    let llm = Arc::new(MockLlm::new(
        r#"[{"text":"Debt rose 58% since 2019","insight_type":"trend"}]"#,
    ));
    let app = build_app(llm, None);

    let (status, body) = send(&app.router, get("/api/factoids/ai/worcestershire/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["council"], json!("worcestershire"));
    assert_eq!(body["factoid_count"], json!(1));
    assert_eq!(body["factoids"][0]["text"], json!("Debt rose 58% since 2019"));
    assert_eq!(body["factoids"][0]["insight_type"], json!("trend"));
    assert_eq!(body["factoids"][0]["confidence"], json!(0.8));
    assert_eq!(body["cache_status"], json!("fresh"));
    assert!(body.get("show_retry").is_none());

    assert!(app.store.get(&primary_key("worcestershire")).await.is_some());
    assert!(app.store.get(&stale_key("worcestershire")).await.is_some());
}

#[tokio::test]
async fn fallback_only_result_is_503_with_retry_and_not_cached() {
    let app = build_app(Arc::new(NullLlm), None);

    let (status, body) = send(&app.router, get("/api/factoids/ai/worcestershire/")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["show_retry"], json!(true));
    // the UI still gets at least one user-facing factoid
    assert!(body["factoid_count"].as_u64().unwrap() >= 1);
    let first_type = body["factoids"][0]["insight_type"].as_str().unwrap();
    assert!(first_type == "basic" || first_type == "system");

    assert!(app.store.get(&primary_key("worcestershire")).await.is_none());
}

#[tokio::test]
async fn unknown_council_is_404() {
    let app = build_app(Arc::new(NullLlm), None);
    let (status, body) = send(&app.router, get("/api/factoids/ai/atlantis/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("atlantis"));
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_any_work() {
    let llm = Arc::new(MockLlm::new(r#"[{"text":"x"}]"#));
    let app = build_app(llm.clone(), None);

    let slugs: Vec<String> = (0..6).map(|i| format!("council-{i}")).collect();
    let req = Request::builder()
        .method("POST")
        .uri("/api/factoids/ai/batch/")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({ "councils": slugs })).unwrap(),
        ))
        .expect("request build");

    let (status, _body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.repo.reads.load(Ordering::SeqCst), 0);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn batch_returns_per_slug_results() {
    let llm = Arc::new(MockLlm::new(r#"[{"text":"x","insight_type":"trend"}]"#));
    let app = build_app(llm, None);

    let req = Request::builder()
        .method("POST")
        .uri("/api/factoids/ai/batch/")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({ "councils": ["worcestershire", "atlantis"] })).unwrap(),
        ))
        .expect("request build");

    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["worcestershire"]["success"], json!(true));
    assert_eq!(body["results"]["atlantis"]["success"], json!(false));
    assert!(body["results"]["atlantis"]["error"]
        .as_str()
        .unwrap()
        .contains("unknown council"));
}

#[tokio::test]
async fn cache_clear_requires_staff_token() {
    let llm = Arc::new(MockLlm::new(r#"[{"text":"x","insight_type":"trend"}]"#));
    let app = build_app(llm, Some("sekrit"));

    // prime the cache
    send(&app.router, get("/api/factoids/ai/worcestershire/")).await;
    assert!(app.store.get(&primary_key("worcestershire")).await.is_some());

    let forbidden = Request::builder()
        .method("DELETE")
        .uri("/api/factoids/ai/worcestershire/cache/")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, forbidden).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.store.get(&primary_key("worcestershire")).await.is_some());

    let allowed = Request::builder()
        .method("DELETE")
        .uri("/api/factoids/ai/worcestershire/cache/")
        .header(STAFF_TOKEN_HEADER, "sekrit")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, allowed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], json!("worcestershire"));
    assert!(app.store.get(&primary_key("worcestershire")).await.is_none());
    assert!(app.store.get(&stale_key("worcestershire")).await.is_none());
}

#[tokio::test]
async fn status_reports_llm_and_cache_configuration() {
    let app = build_app(Arc::new(NullLlm), None);
    let (status, body) = send(&app.router, get("/api/factoids/ai/status/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ai_available"], json!(false));
    assert_eq!(body["ai_model"], json!("disabled"));
    assert_eq!(body["cache_backend"], json!("memory"));
    assert_eq!(body["rate_limit_per_hour"], json!(25));
}
