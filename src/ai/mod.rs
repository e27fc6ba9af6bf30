pub mod client;
pub mod parser;

pub use client::{build_llm_from_config, LlmClient, MockLlm, NullLlm, OpenAiClient, SharedLlm};
pub use parser::parse_factoids;
