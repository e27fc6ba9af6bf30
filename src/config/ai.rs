// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}
fn default_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// "ENV" means: read from OPENAI_API_KEY. An empty resolved key leaves
    /// the client in the unavailable state rather than failing construction.
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: "ENV".to_string(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AiConfig = serde_json::from_str(&data)?;
        cfg.resolve_env_key();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Env-only construction for deployments without a config file.
    /// Missing OPENAI_API_KEY is not an error; the adapter reports
    /// unavailable and the pipeline serves fallback factoids.
    pub fn from_env() -> Self {
        let mut cfg = AiConfig::default();
        if let Ok(m) = env::var("FACTOID_AI_MODEL") {
            cfg.model = m;
        }
        if let Ok(t) = env::var("FACTOID_AI_TEMPERATURE") {
            if let Ok(v) = t.parse() {
                cfg.temperature = v;
            }
        }
        if let Ok(t) = env::var("FACTOID_AI_MAX_TOKENS") {
            if let Ok(v) = t.parse() {
                cfg.max_tokens = v;
            }
        }
        if let Ok(t) = env::var("FACTOID_AI_TIMEOUT_SECS") {
            if let Ok(v) = t.parse() {
                cfg.timeout_secs = v;
            }
        }
        cfg.resolve_env_key();
        cfg.sanitize();
        cfg
    }

    fn resolve_env_key(&mut self) {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
        }
    }

    fn sanitize(&mut self) {
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
    }

    pub fn has_credential(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_temperature_is_reset() {
        let mut cfg = AiConfig {
            temperature: 9.5,
            ..AiConfig::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.temperature, default_temperature());
    }

    #[test]
    fn blank_key_means_no_credential() {
        let cfg = AiConfig {
            api_key: "  ".into(),
            ..AiConfig::default()
        };
        assert!(!cfg.has_credential());
    }
}
