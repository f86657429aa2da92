//! Routes decoded channel events into projection and feed changes.

use std::time::Duration;

use log::debug;

use crate::broadcast::Notice;
use crate::model::{EvaluationPhase, EvaluationStatus, QcmItem};
use crate::projection::{ApplyOutcome, EvaluationUpdate};
use crate::session::SessionState;
use crate::transport::{Channel, ChannelEvent};

/// Follow-up work produced by one event. The session carries these out.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notify(Notice),
    /// The projection changed and should be re-rendered.
    ProjectionChanged,
    /// An item was added to the front of the feed.
    FeedAppended(QcmItem),
    /// Fetch the evaluation after `delay` and replace the projection.
    ScheduleReconciliation {
        evaluation_id: String,
        epoch: u64,
        delay: Duration,
    },
    RefreshHistory,
}

pub struct Dispatcher {
    reconciliation_delay: Duration,
}

impl Dispatcher {
    pub fn new(reconciliation_delay: Duration) -> Self {
        Self {
            reconciliation_delay,
        }
    }

    /// Applies `event` to the session. Events for any evaluation other
    /// than the tracked one change nothing.
    pub fn dispatch(
        &self,
        state: &mut SessionState,
        channel: Channel,
        event: ChannelEvent,
    ) -> Vec<Effect> {
        let Some(evaluation_id) = event.evaluation_id() else {
            debug!("Ignoring {} on {} without evaluation id", event.kind(), channel);
            return vec![];
        };
        if !state.is_tracking(evaluation_id) {
            debug!(
                "Ignoring {} on {} for untracked evaluation {}",
                event.kind(),
                channel,
                evaluation_id
            );
            return vec![];
        }

        let mut effects = Vec::new();
        match event {
            ChannelEvent::QcmGenerated(generated) => {
                let item = generated.qcm.clone();
                if state.feed_mut().append(generated.qcm) {
                    effects.push(Effect::FeedAppended(item));
                } else {
                    debug!("QCM {} already in feed", item.id);
                }
            }
            ChannelEvent::EvaluationStarted(started) => {
                let message = started
                    .message
                    .unwrap_or_else(|| format!("Evaluation {} started", started.evaluation_id));
                effects.push(Effect::Notify(
                    Notice::info(message).for_evaluation(&started.evaluation_id),
                ));
            }
            ChannelEvent::BatchCompleted(batch) => {
                let update = EvaluationUpdate {
                    progress: batch.progress,
                    batch: batch.batch,
                    total_batches: batch.total_batches,
                    ..Default::default()
                };
                self.apply(state, &update, &mut effects);
            }
            ChannelEvent::Progress(progress) => {
                let update = EvaluationUpdate {
                    progress: progress.progress,
                    total_qcm: progress.total_qcm,
                    completed_qcm: progress.completed_qcm,
                    ..Default::default()
                };
                self.apply(state, &update, &mut effects);
            }
            ChannelEvent::PhaseChange(change) => {
                let update = EvaluationUpdate {
                    phase: Some(change.new_phase),
                    ..Default::default()
                };
                let outcome = self.apply(state, &update, &mut effects);
                // A session attached mid-run has no phase of its own yet;
                // the event's previous phase stands in for it.
                if let Some((previous, EvaluationPhase::Evaluation)) = outcome.phase_transition {
                    if previous.or(change.previous_phase) == Some(EvaluationPhase::Generation) {
                        effects.push(Effect::Notify(
                            Notice::info("QCM generation finished, grading answers")
                                .for_evaluation(&change.evaluation_id),
                        ));
                    }
                }
            }
            ChannelEvent::Status(status) => {
                let update = EvaluationUpdate {
                    status: Some(status.status),
                    progress: status.progress,
                    total_qcm: status.total_qcm,
                    completed_qcm: status.completed_qcm,
                    error: status.error,
                    ..Default::default()
                };
                self.apply(state, &update, &mut effects);
            }
            ChannelEvent::Completed(_) => {
                let update = EvaluationUpdate {
                    status: Some(EvaluationStatus::Completed),
                    ..Default::default()
                };
                self.apply(state, &update, &mut effects);
            }
            ChannelEvent::Failed(failed) => {
                let update = EvaluationUpdate {
                    status: Some(EvaluationStatus::Failed),
                    error: Some(failed.error).filter(|error| !error.is_empty()),
                    ..Default::default()
                };
                self.apply(state, &update, &mut effects);
            }
            ChannelEvent::Other { kind, .. } => {
                debug!("Ignoring unhandled event kind '{}' on {}", kind, channel);
            }
        }
        effects
    }

    fn apply(
        &self,
        state: &mut SessionState,
        update: &EvaluationUpdate,
        effects: &mut Vec<Effect>,
    ) -> ApplyOutcome {
        let outcome = state.projection_mut().apply(update);
        if outcome.ignored {
            debug!("Projection is frozen, live update ignored");
            return outcome;
        }
        self.follow_up(state, &outcome, effects);
        outcome
    }

    fn follow_up(&self, state: &SessionState, outcome: &ApplyOutcome, effects: &mut Vec<Effect>) {
        if outcome.changed || outcome.became_terminal {
            effects.push(Effect::ProjectionChanged);
        }

        let Some(current) = state.projection().current() else {
            return;
        };

        if outcome.became_terminal {
            let notice = match current.status {
                EvaluationStatus::Failed => Notice::error(
                    current
                        .error
                        .clone()
                        .unwrap_or_else(|| "Evaluation failed".to_string()),
                ),
                _ => Notice::success(format!("Evaluation {} completed", current.id)),
            };
            effects.push(Effect::Notify(notice.for_evaluation(&current.id)));
            effects.push(Effect::ScheduleReconciliation {
                evaluation_id: current.id.clone(),
                epoch: state.epoch(),
                delay: self.reconciliation_delay,
            });
            effects.push(Effect::RefreshHistory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::NoticeLevel;

    fn decode(text: &str) -> ChannelEvent {
        ChannelEvent::decode(text).unwrap()
    }

    fn tracking(id: &str) -> SessionState {
        let mut state = SessionState::new();
        state.track(id);
        state
    }

    fn qcm_event(evaluation_id: &str, qcm_id: &str) -> ChannelEvent {
        decode(&format!(
            r#"{{
                "type": "qcm_generated",
                "evaluation_id": "{}",
                "qcm": {{"id": "{}", "question": "Q?", "choices": {{"A": "a", "B": "b"}}, "correct_answer": "B"}}
            }}"#,
            evaluation_id, qcm_id
        ))
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Duration::from_millis(1000))
    }

    #[test]
    fn test_qcm_for_other_evaluation_is_ignored() {
        let mut state = tracking("e1");
        let effects = dispatcher().dispatch(&mut state, Channel::QcmUpdates, qcm_event("e2", "q1"));

        assert!(effects.is_empty());
        assert!(state.feed().is_empty());
    }

    #[test]
    fn test_qcm_appended_once() {
        let mut state = tracking("e1");
        let dispatcher = dispatcher();

        let effects = dispatcher.dispatch(&mut state, Channel::QcmUpdates, qcm_event("e1", "q1"));
        assert!(matches!(&effects[..], [Effect::FeedAppended(item)] if item.id == "q1"));

        let effects = dispatcher.dispatch(&mut state, Channel::QcmUpdates, qcm_event("e1", "q1"));
        assert!(effects.is_empty());
        assert_eq!(state.feed().len(), 1);
    }

    #[test]
    fn test_out_of_order_progress_events() {
        let mut state = tracking("e1");
        let dispatcher = dispatcher();

        for progress in [40, 25, 60] {
            let event = decode(&format!(
                r#"{{"type": "progress_update", "evaluation_id": "e1", "progress": {}}}"#,
                progress
            ));
            dispatcher.dispatch(&mut state, Channel::ProgressUpdates, event);
        }

        assert_eq!(state.projection().current().unwrap().progress, 60.0);
    }

    #[test]
    fn test_terminal_status_schedules_reconciliation() {
        let mut state = tracking("e1");
        let epoch = state.epoch();
        let effects = dispatcher().dispatch(
            &mut state,
            Channel::EvaluationStatus,
            decode(r#"{"evaluation_id": "e1", "status": "completed", "progress": 100}"#),
        );

        assert!(effects.contains(&Effect::ProjectionChanged));
        assert!(effects.contains(&Effect::ScheduleReconciliation {
            evaluation_id: "e1".to_string(),
            epoch,
            delay: Duration::from_millis(1000),
        }));
        assert!(effects.contains(&Effect::RefreshHistory));

        let current = state.projection().current().unwrap();
        assert_eq!(current.status, EvaluationStatus::Completed);
        assert_eq!(current.progress, 100.0);
        assert!(state.projection().is_frozen());
    }

    #[test]
    fn test_repeated_terminal_status_is_idempotent() {
        let mut state = tracking("e1");
        let dispatcher = dispatcher();
        let event = decode(r#"{"evaluation_id": "e1", "status": "completed", "progress": 100}"#);

        dispatcher.dispatch(&mut state, Channel::EvaluationStatus, event.clone());
        let effects = dispatcher.dispatch(&mut state, Channel::Notifications, event);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_error_notification_surfaces_text() {
        let mut state = tracking("e1");
        let effects = dispatcher().dispatch(
            &mut state,
            Channel::Notifications,
            decode(r#"{"type": "evaluation_error", "evaluation_id": "e1", "error": "quota exceeded"}"#),
        );

        let notice = effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Notify(notice) => Some(notice),
                _ => None,
            })
            .unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.message, "quota exceeded");
        assert_eq!(
            state.projection().current().unwrap().status,
            EvaluationStatus::Failed
        );
    }

    #[test]
    fn test_phase_change_notifies_once() {
        let mut state = tracking("e1");
        let dispatcher = dispatcher();
        let event = decode(
            r#"{"type": "phase_change", "evaluation_id": "e1", "previous_phase": "generation", "new_phase": "evaluation"}"#,
        );

        let effects = dispatcher.dispatch(&mut state, Channel::ProgressUpdates, event.clone());
        assert_eq!(
            effects.iter().filter(|e| matches!(e, Effect::Notify(_))).count(),
            1
        );

        let effects = dispatcher.dispatch(&mut state, Channel::ProgressUpdates, event);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_phase_notice_requires_generation_before() {
        let dispatcher = dispatcher();
        let notices = |effects: &[Effect]| {
            effects
                .iter()
                .filter(|e| matches!(e, Effect::Notify(_)))
                .count()
        };

        // Straight into evaluation with no known generation phase.
        let mut state = tracking("e1");
        let effects = dispatcher.dispatch(
            &mut state,
            Channel::ProgressUpdates,
            decode(r#"{"type": "phase_change", "evaluation_id": "e1", "new_phase": "evaluation"}"#),
        );
        assert!(effects.contains(&Effect::ProjectionChanged));
        assert_eq!(notices(&effects), 0);
        assert_eq!(
            state.projection().current().unwrap().phase,
            Some(EvaluationPhase::Evaluation)
        );

        // Generation seen live, then evaluation without a previous phase.
        let mut state = tracking("e2");
        let effects = dispatcher.dispatch(
            &mut state,
            Channel::ProgressUpdates,
            decode(r#"{"type": "phase_change", "evaluation_id": "e2", "new_phase": "generation"}"#),
        );
        assert_eq!(notices(&effects), 0);
        let effects = dispatcher.dispatch(
            &mut state,
            Channel::ProgressUpdates,
            decode(r#"{"type": "phase_change", "evaluation_id": "e2", "new_phase": "evaluation"}"#),
        );
        assert_eq!(notices(&effects), 1);
    }

    #[test]
    fn test_batch_completed_updates_counters() {
        let mut state = tracking("e1");
        dispatcher().dispatch(
            &mut state,
            Channel::ProgressUpdates,
            decode(
                r#"{"type": "evaluation_batch_completed", "evaluation_id": "e1", "progress": 55.0, "batch": 3, "total_batches": 5}"#,
            ),
        );

        let current = state.projection().current().unwrap();
        assert_eq!(current.progress, 55.0);
        assert_eq!(current.batch, Some(3));
        assert_eq!(current.total_batches, Some(5));
    }

    #[test]
    fn test_started_is_notice_only() {
        let mut state = tracking("e1");
        let effects = dispatcher().dispatch(
            &mut state,
            Channel::Notifications,
            decode(r#"{"type": "evaluation_started", "evaluation_id": "e1"}"#),
        );

        assert!(matches!(&effects[..], [Effect::Notify(_)]));
        assert_eq!(
            state.projection().current().unwrap().status,
            EvaluationStatus::Pending
        );
    }

    #[test]
    fn test_unknown_kind_ignored() {
        let mut state = tracking("e1");
        let effects = dispatcher().dispatch(
            &mut state,
            Channel::Notifications,
            decode(r#"{"type": "report_ready", "evaluation_id": "e1"}"#),
        );
        assert!(effects.is_empty());
    }
}
