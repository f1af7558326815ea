use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageButton {
    pub text: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub button_type: String,
    #[serde(default)]
    pub data_test_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInput {
    #[serde(default)]
    pub input_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub data_test_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLink {
    pub text: String,
    pub href: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub data_test_id: String,
}

/// Structure of the target page as seen by the reconnaissance provider.
/// The provider never raises for navigation failures; it returns this
/// structure with the `error` field populated instead so the pipeline can
/// continue with degraded context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStructure {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub buttons: Vec<PageButton>,
    #[serde(default)]
    pub inputs: Vec<PageInput>,
    #[serde(default)]
    pub links: Vec<PageLink>,
    #[serde(default)]
    pub selectors: std::collections::HashMap<String, String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageStructure {
    /// Minimal fallback structure used when every navigation attempt failed.
    pub fn error_structure(url: &str, message: impl Into<String>) -> Self {
        Self {
            title: "Unknown".to_string(),
            url: url.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}
