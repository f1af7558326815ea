use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LLMProvider {
    OpenAI,
    Compatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Compatible,
            base_url: "https://foundation-models.api.cloud.ru/v1".to_string(),
            model: "ai-sage/GigaChat3-10B-A1.8B".to_string(),
            api_key: None,
            max_tokens: Some(4096),
            temperature: Some(0.3),
        }
    }
}
