pub mod cached;
pub mod openai;

use crate::domain::error::Result;
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;

pub use cached::CachedLLMClient;
pub use openai::OpenAICompatibleClient;

/// Chat-completion provider. Callers tolerate empty responses by treating
/// them as zero artifacts, never as a fatal error.
#[async_trait]
pub trait LLMClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String>;
}

pub type SharedLLMClient = std::sync::Arc<dyn LLMClient + Send + Sync>;
