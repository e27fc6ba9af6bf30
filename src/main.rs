//! Council Factoids — Binary Entrypoint
//! Boots the Axum HTTP server, wiring routes, shared state, and middleware.

use council_factoids::api::{create_router, AppState};
use council_factoids::bootstrap;
use council_factoids::metrics::Metrics;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable compact tracing logs. Filter defaults to `council_factoids=info`
/// unless RUST_LOG overrides it.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("council_factoids=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let runtime = bootstrap::build_runtime()?;

    let metrics = Metrics::init(runtime.cache.config().ttl_primary_live_secs)?;

    let state = AppState {
        pipeline: runtime.pipeline,
        staff_token: std::env::var("FACTOID_STAFF_TOKEN").ok(),
    };
    let router = create_router(state).merge(metrics.router());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "factoid service listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
