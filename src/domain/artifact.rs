use serde::{Deserialize, Serialize};

/// A candidate test produced by the generation stage. Lives only inside the
/// pipeline; nothing is persisted until the artifact survives validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifact {
    pub id: String,
    pub name: String,
    pub source: String,
    /// Stage that produced the artifact ("generation" or "generation_retry_N").
    pub origin: String,
    pub endpoint: Option<String>,
}

/// Durable record of an accepted artifact, written only by the persistence
/// stage. One row per surviving artifact; artifacts with warnings are still
/// persisted so generated work is never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub job_id: String,
    pub name: String,
    pub code: String,
    pub test_type: String,
    pub code_hash: String,
    pub validation_status: String,
    pub priority: Option<String>,
    pub tags_json: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateKind {
    Exact,
    EmbeddingSimilar,
    LlmConfirmed,
}

/// Pair of artifacts judged to be duplicates, with the kind of evidence that
/// produced the relation. Only kept inside the optimization report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRelation {
    pub first_id: String,
    pub second_id: String,
    pub kind: DuplicateKind,
    pub similarity: f32,
}
