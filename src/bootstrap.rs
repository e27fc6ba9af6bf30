// src/bootstrap.rs
//
// Shared wiring for the server and the job binaries: load config, build
// the store, repository, LLM client, and pipeline.

use std::sync::Arc;

use tracing::info;

use crate::ai::build_llm_from_config;
use crate::cache::{FactoidCache, MemoryStore, SharedStore};
use crate::config::{AiConfig, CacheConfig};
use crate::gather::{DataGatherer, FileCouncilRepository, SharedRepository};
use crate::pipeline::{build_pipeline, FactoidPipeline};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
pub const DEFAULT_DATA_PATH: &str = "data/councils.json";
pub const DEFAULT_FACTOID_LIMIT: usize = 3;

pub struct Runtime {
    pub pipeline: Arc<FactoidPipeline>,
    pub repo: SharedRepository,
    pub cache: FactoidCache,
    pub store: SharedStore,
}

/// Config file if present, env otherwise. A missing credential is not an
/// error; the pipeline degrades to fallback factoids.
pub fn load_ai_config() -> AiConfig {
    let path = std::env::var("FACTOID_AI_CONFIG_PATH")
        .unwrap_or_else(|_| DEFAULT_AI_CONFIG_PATH.to_string());
    match AiConfig::load_from_file(&path) {
        Ok(cfg) => {
            info!(path, model = %cfg.model, enabled = cfg.enabled, "AI config loaded from file");
            cfg
        }
        Err(_) => AiConfig::from_env(),
    }
}

pub fn factoid_limit_from_env() -> usize {
    std::env::var("FACTOID_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_FACTOID_LIMIT)
}

/// Build the full runtime from the environment.
pub fn build_runtime() -> anyhow::Result<Runtime> {
    let data_path =
        std::env::var("FACTOID_DATA_PATH").unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string());
    let repo: SharedRepository = Arc::new(FileCouncilRepository::load_from_file(&data_path)?);
    info!(data_path, "council dataset loaded");

    let store: SharedStore = Arc::new(MemoryStore::new());
    let cache_cfg = CacheConfig::from_env();
    let cache = FactoidCache::new(Arc::clone(&store), cache_cfg);

    let gatherer = DataGatherer::new(Arc::clone(&repo), Arc::clone(&store), cache_cfg.ttl_data_secs);
    let llm = build_llm_from_config(&load_ai_config());
    let pipeline = build_pipeline(gatherer, llm, cache.clone(), factoid_limit_from_env());

    Ok(Runtime {
        pipeline,
        repo,
        cache,
        store,
    })
}
