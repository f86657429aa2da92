//! Session-scoped context: the tracked evaluation and what is known of it.

use crate::feed::LiveFeed;
use crate::projection::EvaluationProjection;

/// Owned by the session task, which is its only writer.
///
/// Every `track` and `reset` bumps the tracking epoch; fetch results
/// carry the epoch they were issued under and are only written back if
/// it is still current.
#[derive(Debug, Default)]
pub struct SessionState {
    tracked: Option<String>,
    epoch: u64,
    projection: EvaluationProjection,
    feed: LiveFeed,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `evaluation_id` with a fresh pending projection and
    /// an empty feed. Returns the new epoch.
    pub fn track(&mut self, evaluation_id: &str) -> u64 {
        self.epoch += 1;
        self.tracked = Some(evaluation_id.to_string());
        self.projection.begin(evaluation_id);
        self.feed.clear();
        self.epoch
    }

    /// Stops tracking and drops everything known about the evaluation.
    pub fn reset(&mut self) -> u64 {
        self.epoch += 1;
        self.tracked = None;
        self.projection.clear();
        self.feed.clear();
        self.epoch
    }

    pub fn tracked_id(&self) -> Option<&str> {
        self.tracked.as_deref()
    }

    pub fn is_tracking(&self, evaluation_id: &str) -> bool {
        self.tracked.as_deref() == Some(evaluation_id)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True if a result issued for `evaluation_id` under `epoch` may still
    /// be written.
    pub fn is_current(&self, evaluation_id: &str, epoch: u64) -> bool {
        self.epoch == epoch && self.is_tracking(evaluation_id)
    }

    pub fn projection(&self) -> &EvaluationProjection {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut EvaluationProjection {
        &mut self.projection
    }

    pub fn feed(&self) -> &LiveFeed {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut LiveFeed {
        &mut self.feed
    }
}
