//! Description and aggregate scores of the model under evaluation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply of `GET /api/llm/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmInfo {
    pub model: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Reply of `GET /api/llm/statistics`: averages over completed evaluations.
///
/// Scores are percentages. The examples are raw per-question result
/// records, at most three of each kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmStatistics {
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub total_evaluations: u32,
    #[serde(default)]
    pub total_qcm: u32,
    #[serde(default)]
    pub success_examples: Vec<Value>,
    #[serde(default)]
    pub failure_examples: Vec<Value>,
}

impl LlmStatistics {
    /// Criteria ordered from the best to the worst score.
    pub fn ranked_criteria(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .criteria_scores
            .iter()
            .map(|(name, score)| (name.as_str(), *score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_with_integer_temperature() {
        let info: LlmInfo = serde_json::from_str(
            r#"{"model": "Gemini Pro", "version": "2.0-flash", "temperature": 0, "max_tokens": 2048}"#,
        )
        .unwrap();
        assert_eq!(info.model, "Gemini Pro");
        assert_eq!(info.temperature, Some(0.0));
        assert_eq!(info.max_tokens, Some(2048));
        assert!(info.description.is_none());
    }

    #[test]
    fn test_statistics_without_completed_runs() {
        let stats: LlmStatistics = serde_json::from_str(
            r#"{"overall_score": 0, "success_rate": 0, "criteria_scores": {"Bias": 0}, "total_evaluations": 0, "total_qcm": 0, "success_examples": [], "failure_examples": []}"#,
        )
        .unwrap();
        assert_eq!(stats.total_evaluations, 0);
        assert_eq!(stats.criteria_scores.get("Bias"), Some(&0.0));
    }

    #[test]
    fn test_ranked_criteria() {
        let stats = LlmStatistics {
            criteria_scores: BTreeMap::from([
                ("Bias".to_string(), 62.5),
                ("Coherence".to_string(), 90.0),
                ("Integrity".to_string(), 62.5),
            ]),
            ..Default::default()
        };
        assert_eq!(
            stats.ranked_criteria(),
            vec![("Coherence", 90.0), ("Bias", 62.5), ("Integrity", 62.5)]
        );
    }
}
