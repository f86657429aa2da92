//! Authoritative re-fetches: initial load, after terminal transitions,
//! after reconnects and on a poll interval.
//!
//! Every fetch runs as its own task and reports back through a channel;
//! the session decides whether the result is still relevant.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{ApiError, EvaluationApi};
use crate::model::{Evaluation, EvaluationSummary, QcmItem};

/// Maximum number of retries for retryable fetch errors.
const MAX_RETRIES: u32 = 2;
/// Base delay for exponential backoff between retries.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    /// A newly tracked evaluation.
    Initial,
    /// A live event made the evaluation terminal.
    Terminal,
    /// A channel reopened after having been open.
    Reconnect,
    Poll,
}

impl FetchReason {
    /// Whether the QCM list is fetched along with the evaluation.
    pub fn includes_feed(self) -> bool {
        matches!(self, FetchReason::Initial | FetchReason::Reconnect)
    }
}

impl std::fmt::Display for FetchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchReason::Initial => write!(f, "initial"),
            FetchReason::Terminal => write!(f, "terminal"),
            FetchReason::Reconnect => write!(f, "reconnect"),
            FetchReason::Poll => write!(f, "poll"),
        }
    }
}

/// Authoritative state of one evaluation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub evaluation: Evaluation,
    /// Oldest first, present when the fetch included the feed.
    pub qcm: Option<Vec<QcmItem>>,
}

/// Results reported back to the session.
#[derive(Debug)]
pub enum ReconcileMessage {
    /// The initial load found a non-terminal evaluation to track.
    Adopt { epoch: u64, evaluation_id: String },
    Snapshot {
        evaluation_id: String,
        epoch: u64,
        reason: FetchReason,
        result: Result<Snapshot, ApiError>,
    },
    History(Result<Vec<EvaluationSummary>, ApiError>),
    /// The poll interval elapsed.
    PollDue,
}

/// Issues fetches against the backend and reports their results.
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn EvaluationApi>,
    sender: mpsc::UnboundedSender<ReconcileMessage>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn EvaluationApi>, sender: mpsc::UnboundedSender<ReconcileMessage>) -> Self {
        Self { api, sender }
    }

    /// Loads the history and adopts the first non-terminal evaluation, if
    /// any, for the session at `epoch`.
    pub fn initial_load(&self, epoch: u64) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let evaluations = match with_retry("list evaluations", || api.list_evaluations()).await
            {
                Ok(evaluations) => evaluations,
                Err(e) => {
                    let _ = sender.send(ReconcileMessage::History(Err(e)));
                    return;
                }
            };

            let adopted = {
                let mut active = evaluations.iter().filter(|e| e.is_active());
                let adopted = active.next().map(|e| e.id.clone());
                let others: Vec<&str> = active.map(|e| e.id.as_str()).collect();

                match &adopted {
                    Some(id) if !others.is_empty() => warn!(
                        "Several evaluations are active, tracking {} and ignoring {}",
                        id,
                        others.join(", ")
                    ),
                    Some(id) => info!("Adopting active evaluation {}", id),
                    None => debug!("No active evaluation to adopt"),
                }
                adopted
            };

            let _ = sender.send(ReconcileMessage::History(Ok(evaluations)));
            if let Some(evaluation_id) = adopted {
                let _ = sender.send(ReconcileMessage::Adopt {
                    epoch,
                    evaluation_id,
                });
            }
        })
    }

    /// Fetches `evaluation_id` after `delay` and reports a snapshot tagged
    /// with `epoch`.
    pub fn fetch(
        &self,
        evaluation_id: &str,
        epoch: u64,
        reason: FetchReason,
        delay: Duration,
    ) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let sender = self.sender.clone();
        let evaluation_id = evaluation_id.to_string();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!("Fetching evaluation {} ({})", evaluation_id, reason);

            let result = fetch_snapshot(api.as_ref(), &evaluation_id, reason).await;
            let _ = sender.send(ReconcileMessage::Snapshot {
                evaluation_id,
                epoch,
                reason,
                result,
            });
        })
    }

    pub fn refresh_history(&self) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let result = with_retry("list evaluations", || api.list_evaluations()).await;
            let _ = sender.send(ReconcileMessage::History(result));
        })
    }
}

async fn fetch_snapshot(
    api: &dyn EvaluationApi,
    evaluation_id: &str,
    reason: FetchReason,
) -> Result<Snapshot, ApiError> {
    let evaluation = with_retry("fetch evaluation", || api.get_evaluation(evaluation_id)).await?;
    let qcm = if reason.includes_feed() {
        Some(with_retry("fetch QCM list", || api.get_evaluation_qcm(evaluation_id)).await?)
    } else {
        None
    };
    Ok(Snapshot { evaluation, qcm })
}

/// Runs `op`, retrying retryable errors with exponential backoff.
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let delay = RETRY_BASE_DELAY * (1 << attempt);
                attempt += 1;
                warn!(
                    "Failed to {} ({}), retrying in {:?} (attempt {}/{})",
                    what,
                    e,
                    delay,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Emits `PollDue` on a fixed interval until the receiver goes away.
pub struct PollScheduler {
    interval: Duration,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn start(&self, sender: mpsc::UnboundedSender<ReconcileMessage>) -> JoinHandle<()> {
        let period = self.interval;
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await; // skip immediate first tick

            loop {
                timer.tick().await;
                if sender.send(ReconcileMessage::PollDue).is_err() {
                    debug!("Poll scheduler stopped");
                    break;
                }
            }
        })
    }
}
