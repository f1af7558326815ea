//! Duplicate detection and requirement-coverage scoring over a batch of
//! generated artifacts. Three duplicate passes: exact content hash, embedding
//! cosine similarity, LLM adjudication of the ambiguous similarity zone.
//! Removal always keeps the first-seen artifact of a duplicate pair.

use crate::application::use_cases::embedding_service::{cosine_similarity, EmbeddingService};
use crate::domain::artifact::{DuplicateKind, DuplicateRelation, GeneratedArtifact};
use crate::domain::error::Result;
use crate::domain::llm_config::LLMConfig;
use crate::infrastructure::llm_clients::SharedLLMClient;
use crate::shared::hashing::{content_hash, hash_value};
use crate::shared::ttl_cache::TtlCache;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const AMBIGUOUS_LOW: f32 = 0.75;
const AMBIGUOUS_HIGH: f32 = 0.85;
const ADJUDICATION_TTL: Duration = Duration::from_secs(86400);

#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    pub similarity_threshold: f32,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageQuality {
    Good,
    Insufficient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementCoverage {
    pub requirement: String,
    pub covered: bool,
    pub covering_tests: Vec<String>,
    pub quality: CoverageQuality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub optimized: Vec<GeneratedArtifact>,
    pub duplicates: Vec<DuplicateRelation>,
    pub coverage_score: f64,
    pub coverage: Vec<RequirementCoverage>,
    pub gaps: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct Optimizer {
    embeddings: Arc<EmbeddingService>,
    llm: Option<SharedLLMClient>,
    llm_config: LLMConfig,
    adjudication_cache: Mutex<TtlCache<bool>>,
}

impl Optimizer {
    pub fn new(embeddings: Arc<EmbeddingService>) -> Self {
        Self {
            embeddings,
            llm: None,
            llm_config: LLMConfig::default(),
            adjudication_cache: Mutex::new(TtlCache::new(512, ADJUDICATION_TTL)),
        }
    }

    pub fn with_llm(mut self, llm: SharedLLMClient, llm_config: LLMConfig) -> Self {
        self.llm = Some(llm);
        self.llm_config = llm_config;
        self
    }

    pub async fn optimize(
        &self,
        artifacts: &[GeneratedArtifact],
        requirements: &[String],
        options: &OptimizerOptions,
    ) -> Result<OptimizationReport> {
        let mut duplicates = find_exact_duplicates(artifacts);
        let exact_count = duplicates.len();

        if artifacts.len() >= 2 {
            let (similar, ambiguous) = self
                .find_embedding_duplicates(artifacts, options.similarity_threshold)
                .await;
            duplicates.extend(similar);
            duplicates.extend(self.adjudicate_ambiguous(artifacts, ambiguous).await);
        }

        info!(
            total = duplicates.len(),
            exact = exact_count,
            "Duplicate detection completed"
        );

        let optimized = remove_duplicates(artifacts, &duplicates);
        let (coverage, coverage_score, gaps) = analyze_coverage(artifacts, requirements);
        let recommendations = build_recommendations(&duplicates, &gaps);

        Ok(OptimizationReport {
            optimized,
            duplicates,
            coverage_score,
            coverage,
            gaps,
            recommendations,
        })
    }

    /// Pairs at or above the threshold become relations; pairs in the
    /// ambiguous zone below it are returned for adjudication.
    async fn find_embedding_duplicates(
        &self,
        artifacts: &[GeneratedArtifact],
        threshold: f32,
    ) -> (Vec<DuplicateRelation>, Vec<(usize, usize, f32)>) {
        let texts: Vec<String> = artifacts
            .iter()
            .map(|a| format!("{} {}", a.name, a.source))
            .collect();
        let vectors = Arc::clone(&self.embeddings).embed_all(&texts).await;

        let mut relations = Vec::new();
        let mut ambiguous = Vec::new();
        for i in 0..artifacts.len() {
            for j in (i + 1)..artifacts.len() {
                let similarity = cosine_similarity(&vectors[i], &vectors[j]);
                if similarity >= threshold {
                    relations.push(DuplicateRelation {
                        first_id: artifacts[i].id.clone(),
                        second_id: artifacts[j].id.clone(),
                        kind: DuplicateKind::EmbeddingSimilar,
                        similarity,
                    });
                } else if similarity > AMBIGUOUS_LOW && similarity < AMBIGUOUS_HIGH {
                    ambiguous.push((i, j, similarity));
                }
            }
        }
        (relations, ambiguous)
    }

    /// Yes/no duplicate judgment for genuinely ambiguous pairs, cached per
    /// pair for a day. No LLM wired means no promotion.
    async fn adjudicate_ambiguous(
        &self,
        artifacts: &[GeneratedArtifact],
        ambiguous: Vec<(usize, usize, f32)>,
    ) -> Vec<DuplicateRelation> {
        let Some(llm) = &self.llm else {
            return Vec::new();
        };
        if ambiguous.is_empty() {
            return Vec::new();
        }
        info!(pairs = ambiguous.len(), "Adjudicating ambiguous duplicate pairs");

        let mut confirmed = Vec::new();
        for (i, j, similarity) in ambiguous {
            let first = &artifacts[i];
            let second = &artifacts[j];
            let key = hash_value(&format!("{}:{}", first.id, second.id));

            let verdict = if let Some(cached) = self.lock_cache().get(&key) {
                debug!("Duplicate adjudication cache hit");
                cached
            } else {
                let system = "You compare two automated test cases.";
                let prompt = format!(
                    "Are these two tests duplicates of each other (testing the same \
                     behavior)? Answer only YES or NO.\n\nTest 1:\n{}\n\nTest 2:\n{}",
                    first.source, second.source
                );
                match llm.generate(&self.llm_config, system, &prompt).await {
                    Ok(answer) => {
                        let is_duplicate = answer.to_uppercase().contains("YES");
                        self.lock_cache().put(key, is_duplicate);
                        is_duplicate
                    }
                    Err(err) => {
                        warn!(error = %err, "Duplicate adjudication failed");
                        continue;
                    }
                }
            };

            if verdict {
                confirmed.push(DuplicateRelation {
                    first_id: first.id.clone(),
                    second_id: second.id.clone(),
                    kind: DuplicateKind::LlmConfirmed,
                    similarity,
                });
            }
        }
        confirmed
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TtlCache<bool>> {
        match self.adjudication_cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Content-hash equality over normalized source. The first occurrence wins;
/// each later occurrence yields exactly one relation back to the first.
fn find_exact_duplicates(artifacts: &[GeneratedArtifact]) -> Vec<DuplicateRelation> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut duplicates = Vec::new();
    for artifact in artifacts {
        let hash = content_hash(&artifact.source);
        match seen.get(hash.as_str()) {
            Some(first_id) => duplicates.push(DuplicateRelation {
                first_id: first_id.to_string(),
                second_id: artifact.id.clone(),
                kind: DuplicateKind::Exact,
                similarity: 1.0,
            }),
            None => {
                seen.insert(hash, &artifact.id);
            }
        }
    }
    duplicates
}

fn remove_duplicates(
    artifacts: &[GeneratedArtifact],
    duplicates: &[DuplicateRelation],
) -> Vec<GeneratedArtifact> {
    let dropped: HashSet<&str> = duplicates
        .iter()
        .map(|relation| relation.second_id.as_str())
        .collect();
    artifacts
        .iter()
        .filter(|artifact| !dropped.contains(artifact.id.as_str()))
        .cloned()
        .collect()
}

/// An artifact covers a requirement when the requirement text appears in its
/// source, case-insensitively. Heuristic only, not a semantic judgment.
fn analyze_coverage(
    artifacts: &[GeneratedArtifact],
    requirements: &[String],
) -> (Vec<RequirementCoverage>, f64, Vec<String>) {
    let lowered: Vec<(String, &GeneratedArtifact)> = artifacts
        .iter()
        .map(|artifact| (artifact.source.to_lowercase(), artifact))
        .collect();

    let mut coverage = Vec::new();
    let mut gaps = Vec::new();
    for requirement in requirements {
        let needle = requirement.to_lowercase();
        let covering_tests: Vec<String> = lowered
            .iter()
            .filter(|(source, _)| source.contains(&needle))
            .map(|(_, artifact)| artifact.id.clone())
            .collect();

        let covered = !covering_tests.is_empty();
        if !covered {
            gaps.push(requirement.clone());
        }
        coverage.push(RequirementCoverage {
            requirement: requirement.clone(),
            covered,
            quality: if covering_tests.len() >= 2 {
                CoverageQuality::Good
            } else {
                CoverageQuality::Insufficient
            },
            covering_tests,
        });
    }

    let score = if requirements.is_empty() {
        0.0
    } else {
        coverage.iter().filter(|c| c.covered).count() as f64 / requirements.len() as f64
    };
    (coverage, score, gaps)
}

fn build_recommendations(duplicates: &[DuplicateRelation], gaps: &[String]) -> Vec<String> {
    let mut recommendations = Vec::new();
    if !duplicates.is_empty() {
        recommendations.push(format!("Remove {} duplicate tests", duplicates.len()));
    }
    if !gaps.is_empty() {
        recommendations.push(format!(
            "Add tests for {} uncovered requirements",
            gaps.len()
        ));
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: &str, source: &str) -> GeneratedArtifact {
        GeneratedArtifact {
            id: id.to_string(),
            name: format!("test_{}", id),
            source: source.to_string(),
            origin: "generation".to_string(),
            endpoint: None,
        }
    }

    fn optimizer() -> Optimizer {
        Optimizer::new(Arc::new(EmbeddingService::local_only()))
    }

    #[tokio::test]
    async fn test_identical_sources_yield_exactly_one_relation() {
        let artifacts = vec![
            artifact("a", "def test_a(): pass"),
            artifact("b", "def test_a(): pass"),
        ];
        let report = optimizer()
            .optimize(&artifacts, &[], &OptimizerOptions::default())
            .await
            .unwrap();

        let exact: Vec<_> = report
            .duplicates
            .iter()
            .filter(|d| d.kind == DuplicateKind::Exact)
            .collect();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].first_id, "a");
        assert_eq!(exact[0].second_id, "b");
        assert_eq!(report.optimized.len(), 1);
        assert_eq!(report.optimized[0].id, "a");
    }

    #[tokio::test]
    async fn test_formatting_differences_still_exact_duplicates() {
        let artifacts = vec![
            artifact("a", "def test_a():   \r\n    pass\r\n"),
            artifact("b", "def test_a():\n    pass"),
        ];
        let report = optimizer()
            .optimize(&artifacts, &[], &OptimizerOptions::default())
            .await
            .unwrap();
        assert_eq!(report.optimized.len(), 1);
    }

    #[tokio::test]
    async fn test_coverage_gaps_and_quality() {
        let artifacts = vec![
            artifact("a", "def test_login():\n    do('login form')"),
            artifact("b", "def test_login_again():\n    do('LOGIN FORM')"),
        ];
        let requirements = vec!["login form".to_string(), "password reset".to_string()];
        let report = optimizer()
            .optimize(&artifacts, &requirements, &OptimizerOptions::default())
            .await
            .unwrap();

        assert_eq!(report.gaps, vec!["password reset".to_string()]);
        assert!((report.coverage_score - 0.5).abs() < 1e-9);
        let login = &report.coverage[0];
        assert!(login.covered);
        assert_eq!(login.quality, CoverageQuality::Good);
        let reset = &report.coverage[1];
        assert!(!reset.covered);
        assert_eq!(reset.quality, CoverageQuality::Insufficient);
    }

    #[tokio::test]
    async fn test_empty_requirements_score_zero() {
        let artifacts = vec![artifact("a", "def test_a(): pass")];
        let report = optimizer()
            .optimize(&artifacts, &[], &OptimizerOptions::default())
            .await
            .unwrap();
        assert_eq!(report.coverage_score, 0.0);
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn test_remove_duplicates_keeps_first_seen() {
        let artifacts = vec![
            artifact("a", "x"),
            artifact("b", "y"),
            artifact("c", "z"),
        ];
        let duplicates = vec![DuplicateRelation {
            first_id: "a".to_string(),
            second_id: "c".to_string(),
            kind: DuplicateKind::EmbeddingSimilar,
            similarity: 0.9,
        }];
        let kept = remove_duplicates(&artifacts, &duplicates);
        let ids: Vec<&str> = kept.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
