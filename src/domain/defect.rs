use serde::{Deserialize, Serialize};

/// A defect normalized from an external tracker (Jira-like or TestOps-like).
/// Providers map their own payloads into this shape; fetch failures yield an
/// empty list, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectRecord {
    pub id: String,
    pub summary: String,
    pub status: String,
    pub priority: String,
    #[serde(default)]
    pub components: Vec<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectFilters {
    pub project: Option<String>,
    pub status: Option<String>,
    pub component: Option<String>,
    pub max_results: Option<usize>,
}
