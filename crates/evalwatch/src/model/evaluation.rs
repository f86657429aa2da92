//! Evaluation records and their lifecycle enums.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Lifecycle status of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl EvaluationStatus {
    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationStatus::Pending => write!(f, "pending"),
            EvaluationStatus::Running => write!(f, "running"),
            EvaluationStatus::Completed => write!(f, "completed"),
            EvaluationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Sub-state of a running evaluation.
///
/// Variants are declared in pipeline order, so `Ord` is the forward
/// direction: `Generation < Evaluation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPhase {
    /// QCM items are being generated from the documents.
    Generation,
    /// Generated items are being graded against the model.
    Evaluation,
}

impl std::fmt::Display for EvaluationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationPhase::Generation => write!(f, "generation"),
            EvaluationPhase::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// Full evaluation record as returned by `GET /api/evaluations/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub status: EvaluationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<EvaluationPhase>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub total_qcm: u32,
    #[serde(default)]
    pub completed_qcm: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_batches: Option<u32>,
    /// Failure message, only meaningful when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub selected_criteria: BTreeSet<String>,
    #[serde(default)]
    pub advanced_criteria: BTreeSet<String>,
    /// Ids of the documents the run was started against.
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Grading results, opaque to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
    /// Generated report files keyed by format (`html`, `json`, `csv`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_paths: Option<BTreeMap<String, String>>,
}

impl Evaluation {
    /// Creates a fresh `pending` record with every counter at zero.
    pub fn pending(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: EvaluationStatus::Pending,
            phase: None,
            progress: 0.0,
            total_qcm: 0,
            completed_qcm: 0,
            batch: None,
            total_batches: None,
            error: None,
            selected_criteria: BTreeSet::new(),
            advanced_criteria: BTreeSet::new(),
            documents: vec![],
            test_mode: false,
            start_time: None,
            end_time: None,
            results: None,
            report_paths: None,
        }
    }
}

/// Lightweight record as listed by `GET /api/evaluations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub id: String,
    pub status: EvaluationStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub total_qcm: u32,
    #[serde(default)]
    pub completed_qcm: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qcm_count: Option<u32>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationSummary {
    /// Returns true while the run is `pending` or `running`.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Body of `POST /api/evaluations/start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartEvaluationRequest {
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub selected_criteria: Vec<String>,
    #[serde(default)]
    pub advanced_criteria: Vec<String>,
}

/// Reply of `POST /api/evaluations/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedEvaluation {
    pub evaluation_id: String,
    #[serde(default)]
    pub selected_criteria: Vec<String>,
    #[serde(default)]
    pub advanced_criteria: Vec<String>,
}
