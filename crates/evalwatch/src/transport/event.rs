//! Inbound channel events, decoded once at the transport boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DecodeError;
use crate::model::{EvaluationPhase, EvaluationStatus, QcmItem};

/// A newly generated QCM item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcmGenerated {
    pub evaluation_id: String,
    pub qcm: QcmItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Advisory notice that the backend picked up a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStarted {
    pub evaluation_id: String,
    #[serde(default)]
    pub selected_criteria: Vec<String>,
    #[serde(default)]
    pub advanced_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A grading batch finished during the `evaluation` phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCompleted {
    pub evaluation_id: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub batch: Option<u32>,
    #[serde(default)]
    pub total_batches: Option<u32>,
}

/// Cumulative counters from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub evaluation_id: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub total_qcm: Option<u32>,
    #[serde(default)]
    pub completed_qcm: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub evaluation_id: String,
    #[serde(default)]
    pub previous_phase: Option<EvaluationPhase>,
    pub new_phase: EvaluationPhase,
}

/// Generic status payload: has `status` and either no `type` or
/// `type: "evaluation_status"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub evaluation_id: String,
    pub status: EvaluationStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub total_qcm: Option<u32>,
    #[serde(default)]
    pub completed_qcm: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCompleted {
    pub evaluation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailed {
    pub evaluation_id: String,
    #[serde(default)]
    pub error: String,
}

/// Every event kind a channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    QcmGenerated(QcmGenerated),
    EvaluationStarted(EvaluationStarted),
    BatchCompleted(BatchCompleted),
    Progress(ProgressUpdate),
    PhaseChange(PhaseChange),
    Status(StatusUpdate),
    /// `evaluation_completed` from the notifications channel.
    Completed(EvaluationCompleted),
    /// `evaluation_error` from the notifications channel.
    Failed(EvaluationFailed),
    /// A well-formed event of a kind this client does not act on.
    Other {
        kind: String,
        evaluation_id: Option<String>,
    },
}

impl ChannelEvent {
    /// Decodes a text frame. Unknown `type` values decode to `Other`;
    /// known kinds with missing or mistyped fields are errors.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = match &value {
            Value::Object(map) => map.get("type").and_then(Value::as_str).map(str::to_owned),
            _ => return Err(DecodeError::NotAnObject),
        };

        match kind.as_deref() {
            Some("qcm_generated") => parse("qcm_generated", value).map(ChannelEvent::QcmGenerated),
            Some("evaluation_started") => {
                parse("evaluation_started", value).map(ChannelEvent::EvaluationStarted)
            }
            Some("evaluation_batch_completed") => {
                parse("evaluation_batch_completed", value).map(ChannelEvent::BatchCompleted)
            }
            Some("progress_update") => parse("progress_update", value).map(ChannelEvent::Progress),
            Some("phase_change") => parse("phase_change", value).map(ChannelEvent::PhaseChange),
            Some("evaluation_status") | None => {
                parse("evaluation_status", value).map(ChannelEvent::Status)
            }
            Some("evaluation_completed") => {
                parse("evaluation_completed", value).map(ChannelEvent::Completed)
            }
            Some("evaluation_error") => parse("evaluation_error", value).map(ChannelEvent::Failed),
            Some(other) => Ok(ChannelEvent::Other {
                kind: other.to_string(),
                evaluation_id: value
                    .get("evaluation_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            }),
        }
    }

    /// The evaluation this event belongs to, if any.
    pub fn evaluation_id(&self) -> Option<&str> {
        match self {
            ChannelEvent::QcmGenerated(e) => Some(&e.evaluation_id),
            ChannelEvent::EvaluationStarted(e) => Some(&e.evaluation_id),
            ChannelEvent::BatchCompleted(e) => Some(&e.evaluation_id),
            ChannelEvent::Progress(e) => Some(&e.evaluation_id),
            ChannelEvent::PhaseChange(e) => Some(&e.evaluation_id),
            ChannelEvent::Status(e) => Some(&e.evaluation_id),
            ChannelEvent::Completed(e) => Some(&e.evaluation_id),
            ChannelEvent::Failed(e) => Some(&e.evaluation_id),
            ChannelEvent::Other { evaluation_id, .. } => evaluation_id.as_deref(),
        }
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &str {
        match self {
            ChannelEvent::QcmGenerated(_) => "qcm_generated",
            ChannelEvent::EvaluationStarted(_) => "evaluation_started",
            ChannelEvent::BatchCompleted(_) => "evaluation_batch_completed",
            ChannelEvent::Progress(_) => "progress_update",
            ChannelEvent::PhaseChange(_) => "phase_change",
            ChannelEvent::Status(_) => "evaluation_status",
            ChannelEvent::Completed(_) => "evaluation_completed",
            ChannelEvent::Failed(_) => "evaluation_error",
            ChannelEvent::Other { kind, .. } => kind,
        }
    }
}

fn parse<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidEvent {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}
