//! Aggregation over normalized defect records, used to enrich generation
//! prompts with the areas where the product already breaks.

use crate::domain::defect::{DefectFilters, DefectRecord};
use crate::infrastructure::defects::SharedDefectProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectSummary {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_priority: HashMap<String, usize>,
    /// Components ordered by defect count, most affected first.
    pub top_components: Vec<(String, usize)>,
}

pub struct DefectAnalysisService {
    provider: SharedDefectProvider,
}

impl DefectAnalysisService {
    pub fn new(provider: SharedDefectProvider) -> Self {
        Self { provider }
    }

    pub async fn analyze(&self, filters: &DefectFilters) -> DefectSummary {
        let defects = self.provider.fetch_defects(filters).await;
        summarize(&defects)
    }
}

pub fn summarize(defects: &[DefectRecord]) -> DefectSummary {
    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut by_priority: HashMap<String, usize> = HashMap::new();
    let mut by_component: HashMap<String, usize> = HashMap::new();

    for defect in defects {
        *by_status.entry(defect.status.clone()).or_default() += 1;
        *by_priority.entry(defect.priority.clone()).or_default() += 1;
        for component in &defect.components {
            *by_component.entry(component.clone()).or_default() += 1;
        }
    }

    let mut top_components: Vec<(String, usize)> = by_component.into_iter().collect();
    top_components.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    DefectSummary {
        total: defects.len(),
        by_status,
        by_priority,
        top_components,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defect(id: &str, status: &str, priority: &str, components: &[&str]) -> DefectRecord {
        DefectRecord {
            id: id.to_string(),
            summary: format!("defect {}", id),
            status: status.to_string(),
            priority: priority.to_string(),
            components: components.iter().map(|c| c.to_string()).collect(),
            created_at: None,
        }
    }

    #[test]
    fn test_summarize_counts() {
        let defects = vec![
            defect("D-1", "Open", "High", &["auth"]),
            defect("D-2", "Open", "Low", &["auth", "ui"]),
            defect("D-3", "Closed", "High", &["ui"]),
        ];
        let summary = summarize(&defects);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_status["Open"], 2);
        assert_eq!(summary.by_priority["High"], 2);
        assert_eq!(summary.top_components[0], ("auth".to_string(), 2));
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.top_components.is_empty());
    }
}
