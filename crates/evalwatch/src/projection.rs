//! Client-side mirror of one evaluation's state.
//!
//! Authoritative snapshots go through [`EvaluationProjection::replace`];
//! live events go through [`EvaluationProjection::apply`], which never
//! moves progress or phase backwards and stops accepting updates once the
//! evaluation reached a terminal status.

use serde::Serialize;

use crate::model::{Evaluation, EvaluationPhase, EvaluationStatus};

/// Partial update carried by a live event. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationUpdate {
    pub status: Option<EvaluationStatus>,
    pub phase: Option<EvaluationPhase>,
    pub progress: Option<f64>,
    pub total_qcm: Option<u32>,
    pub completed_qcm: Option<u32>,
    pub batch: Option<u32>,
    pub total_batches: Option<u32>,
    pub error: Option<String>,
}

/// What an `apply` did to the projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub changed: bool,
    /// The update moved the projection into a terminal status.
    pub became_terminal: bool,
    /// Forward phase move as `(from, to)`.
    pub phase_transition: Option<(Option<EvaluationPhase>, EvaluationPhase)>,
    /// Nothing was applied because no evaluation is loaded or it is frozen.
    pub ignored: bool,
}

impl ApplyOutcome {
    fn ignored() -> Self {
        Self {
            ignored: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationProjection {
    current: Option<Evaluation>,
    frozen: bool,
}

impl EvaluationProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts mirroring `id` from a fresh pending record.
    pub fn begin(&mut self, id: &str) {
        self.current = Some(Evaluation::pending(id));
        self.frozen = false;
    }

    /// Overwrites everything with an authoritative snapshot. Freezes iff
    /// the snapshot is terminal.
    pub fn replace(&mut self, mut snapshot: Evaluation) {
        snapshot.progress = clip_progress(snapshot.progress);
        if snapshot.status != EvaluationStatus::Failed {
            snapshot.error = None;
        }
        self.frozen = snapshot.status.is_terminal();
        self.current = Some(snapshot);
    }

    /// Applies a live update under the monotonic rules.
    pub fn apply(&mut self, update: &EvaluationUpdate) -> ApplyOutcome {
        if self.frozen {
            return ApplyOutcome::ignored();
        }
        let Some(current) = self.current.as_mut() else {
            return ApplyOutcome::ignored();
        };

        let mut outcome = ApplyOutcome::default();

        if let Some(progress) = update.progress {
            let progress = clip_progress(progress);
            if progress > current.progress {
                current.progress = progress;
                outcome.changed = true;
            }
        }

        if let Some(total) = update.total_qcm {
            outcome.changed |= current.total_qcm != total;
            current.total_qcm = total;
        }
        if let Some(completed) = update.completed_qcm {
            outcome.changed |= current.completed_qcm != completed;
            current.completed_qcm = completed;
        }

        if let Some(phase) = update.phase {
            if current.phase.map_or(true, |previous| phase > previous) {
                outcome.phase_transition = Some((current.phase, phase));
                current.phase = Some(phase);
                outcome.changed = true;
            }
        }

        if update.batch.is_some() && current.batch != update.batch {
            current.batch = update.batch;
            outcome.changed = true;
        }
        if update.total_batches.is_some() && current.total_batches != update.total_batches {
            current.total_batches = update.total_batches;
            outcome.changed = true;
        }

        if let Some(status) = update.status {
            if status.is_terminal() {
                outcome.changed |= current.status != status;
                current.status = status;
                self.frozen = true;
                outcome.became_terminal = true;
            } else if status_rank(status) > status_rank(current.status) {
                current.status = status;
                outcome.changed = true;
            }
        }

        if current.status == EvaluationStatus::Failed {
            if let Some(error) = &update.error {
                outcome.changed |= current.error.as_ref() != Some(error);
                current.error = Some(error.clone());
            }
        }

        outcome
    }

    pub fn current(&self) -> Option<&Evaluation> {
        self.current.as_ref()
    }

    /// True once a terminal status was seen; cleared by a non-terminal
    /// `replace` or `begin`.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.frozen = false;
    }
}

fn clip_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

fn status_rank(status: EvaluationStatus) -> u8 {
    match status {
        EvaluationStatus::Pending => 0,
        EvaluationStatus::Running => 1,
        EvaluationStatus::Completed | EvaluationStatus::Failed => 2,
    }
}
