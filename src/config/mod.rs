pub mod ai;
pub mod cache;

pub use ai::AiConfig;
pub use cache::CacheConfig;
