//! Records exchanged with the evaluation backend.

pub mod catalog;
pub mod evaluation;
pub mod llm;
pub mod qcm;

pub use catalog::{
    Document, DocumentDeleted, DocumentStatus, Report, ReportDetail, ReportFilter, ReportFormat,
};
pub use evaluation::{
    Evaluation, EvaluationPhase, EvaluationStatus, EvaluationSummary, StartEvaluationRequest,
    StartedEvaluation,
};
pub use llm::{LlmInfo, LlmStatistics};
pub use qcm::QcmItem;
