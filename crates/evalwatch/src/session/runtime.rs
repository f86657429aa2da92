//! The session task: single writer of the session state.
//!
//! Transport readers, reconciliation fetches and the poll timer all run
//! concurrently and report back through channels; only this task mutates
//! the projection and the feed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::state::SessionState;
use crate::api::{EvaluationApi, HttpEvaluationApi};
use crate::broadcast::{Notice, SessionUpdate, UpdateBroadcaster};
use crate::config::{validate_config, WatchConfig};
use crate::dispatcher::{Dispatcher, Effect};
use crate::error::{Result, SessionError};
use crate::model::{Evaluation, QcmItem, StartEvaluationRequest, StartedEvaluation};
use crate::reconcile::{FetchReason, PollScheduler, ReconcileMessage, Reconciler};
use crate::transport::{
    Channel, ChannelConnector, ChannelEndpoints, ChannelEvent, ChannelHandler, ChannelState,
    ChannelTransport, WsConnector,
};

enum SessionInput {
    Event { channel: Channel, event: ChannelEvent },
    ChannelState { channel: Channel, state: ChannelState },
    Track(String),
    Reset,
    Inspect(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Point-in-time view of a running session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub tracked: Option<String>,
    pub epoch: u64,
    pub evaluation: Option<Evaluation>,
    pub frozen: bool,
    /// Newest first.
    pub feed: Vec<QcmItem>,
    pub channels: BTreeMap<Channel, ChannelState>,
}

/// Forwards transport callbacks into the session inbox. Holds a weak
/// sender so open connections do not keep a dropped session alive.
struct InboxHandler {
    inbox: mpsc::WeakUnboundedSender<SessionInput>,
}

impl InboxHandler {
    fn forward(&self, input: SessionInput) {
        if let Some(inbox) = self.inbox.upgrade() {
            let _ = inbox.send(input);
        }
    }
}

impl ChannelHandler for InboxHandler {
    fn on_event(&self, channel: Channel, event: ChannelEvent) {
        self.forward(SessionInput::Event { channel, event });
    }

    fn on_state(&self, channel: Channel, state: ChannelState) {
        self.forward(SessionInput::ChannelState { channel, state });
    }
}

/// A configured but not yet running watch session.
pub struct WatchSession {
    config: WatchConfig,
    api: Arc<dyn EvaluationApi>,
    connector: Arc<dyn ChannelConnector>,
    updates: UpdateBroadcaster,
    initial: Option<String>,
}

impl WatchSession {
    pub fn new(
        config: WatchConfig,
        api: Arc<dyn EvaluationApi>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Self {
        let updates = UpdateBroadcaster::new(config.update_capacity);
        Self {
            config,
            api,
            connector,
            updates,
            initial: None,
        }
    }

    /// Session against the configured backend over HTTP and WebSockets.
    pub fn from_config(config: WatchConfig) -> Result<Self> {
        let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
        let connector = WsConnector::new(config.http.connect_timeout());
        Ok(Self::new(config, Arc::new(api), Arc::new(connector)))
    }

    /// Tracks `evaluation_id` from the start instead of adopting the first
    /// active evaluation.
    pub fn tracking(mut self, evaluation_id: impl Into<String>) -> Self {
        self.initial = Some(evaluation_id.into());
        self
    }

    /// Subscribes before the session starts, so no update is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn api(&self) -> Arc<dyn EvaluationApi> {
        Arc::clone(&self.api)
    }

    /// Starts the session task. Must be called within a tokio runtime.
    /// Fails without starting anything if the configuration is invalid.
    pub fn spawn(self) -> Result<SessionHandle> {
        validate_config(&self.config)?;
        let endpoints = ChannelEndpoints::new(&self.config.base_url, &self.config.ws_root)?;
        let transport = ChannelTransport::new(
            Arc::clone(&self.connector),
            endpoints,
            self.config.timing.reconnect_delay(),
        );

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (reconcile_tx, reconcile_rx) = mpsc::unbounded_channel();

        let poll = self
            .config
            .timing
            .poll_interval()
            .map(|interval| PollScheduler::new(interval).start(reconcile_tx.clone()));

        let runtime = SessionRuntime {
            state: SessionState::new(),
            dispatcher: Dispatcher::new(self.config.timing.reconciliation_delay()),
            reconciler: Reconciler::new(Arc::clone(&self.api), reconcile_tx),
            handler: Arc::new(InboxHandler {
                inbox: inbox_tx.downgrade(),
            }),
            transport,
            updates: self.updates.clone(),
            channels: self.config.channels.clone(),
            seen_open: HashSet::new(),
            poll,
            tasks: Vec::new(),
        };

        let span = tracing::info_span!("session", base_url = %self.config.base_url);
        let task = tokio::spawn(
            runtime
                .run(self.initial, inbox_rx, reconcile_rx)
                .instrument(span),
        );

        Ok(SessionHandle {
            inbox: inbox_tx,
            updates: self.updates,
            api: self.api,
            task,
        })
    }
}

/// Control surface of a running session. Dropping it stops the session.
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionInput>,
    updates: UpdateBroadcaster,
    api: Arc<dyn EvaluationApi>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Switches tracking to `evaluation_id`. Tracking the current id again
    /// is a no-op.
    pub fn track(&self, evaluation_id: &str) -> std::result::Result<(), SessionError> {
        self.send(SessionInput::Track(evaluation_id.to_string()))
    }

    /// Stops tracking and clears the projection and the feed.
    pub fn reset(&self) -> std::result::Result<(), SessionError> {
        self.send(SessionInput::Reset)
    }

    /// Starts an evaluation on the backend and tracks it.
    pub async fn start_evaluation(
        &self,
        request: &StartEvaluationRequest,
    ) -> Result<StartedEvaluation> {
        let started = self.api.start_evaluation(request).await?;
        info!(
            "Started evaluation {} on {} documents",
            started.evaluation_id,
            request.document_ids.len()
        );
        self.track(&started.evaluation_id)?;
        Ok(started)
    }

    pub async fn snapshot(&self) -> std::result::Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionInput::Inspect(tx))?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Closes every channel, cancels pending fetches and waits for the
    /// session task to end.
    pub async fn shutdown(self) -> std::result::Result<(), SessionError> {
        let _ = self.inbox.send(SessionInput::Shutdown);
        self.task
            .await
            .map_err(|e| SessionError::TaskFailed(e.to_string()))
    }

    fn send(&self, input: SessionInput) -> std::result::Result<(), SessionError> {
        self.inbox.send(input).map_err(|_| SessionError::Stopped)
    }
}

struct SessionRuntime {
    state: SessionState,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    handler: Arc<dyn ChannelHandler>,
    transport: ChannelTransport,
    updates: UpdateBroadcaster,
    channels: Vec<Channel>,
    /// Channels that have been open at least once.
    seen_open: HashSet<Channel>,
    poll: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionRuntime {
    async fn run(
        mut self,
        initial: Option<String>,
        mut inbox: mpsc::UnboundedReceiver<SessionInput>,
        mut reconciled: mpsc::UnboundedReceiver<ReconcileMessage>,
    ) {
        info!("Watch session started");

        for channel in self.channels.clone() {
            self.transport.connect(channel, Arc::clone(&self.handler));
        }

        match initial {
            Some(evaluation_id) => self.track(&evaluation_id),
            None => {
                let load = self.reconciler.initial_load(self.state.epoch());
                self.keep(load);
            }
        }

        loop {
            tokio::select! {
                input = inbox.recv() => match input {
                    Some(SessionInput::Shutdown) | None => break,
                    Some(input) => self.handle_input(input),
                },
                Some(message) = reconciled.recv() => self.handle_reconciled(message),
            }
        }

        self.stop();
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Event { channel, event } => {
                let effects = self.dispatcher.dispatch(&mut self.state, channel, event);
                self.perform(effects);
            }
            SessionInput::ChannelState { channel, state } => self.channel_state(channel, state),
            SessionInput::Track(evaluation_id) => self.track(&evaluation_id),
            SessionInput::Reset => self.reset(),
            SessionInput::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionInput::Shutdown => {}
        }
    }

    fn handle_reconciled(&mut self, message: ReconcileMessage) {
        match message {
            ReconcileMessage::Adopt {
                epoch,
                evaluation_id,
            } => {
                if self.state.epoch() == epoch && self.state.tracked_id().is_none() {
                    self.track(&evaluation_id);
                } else {
                    debug!("Not adopting {}, tracking changed meanwhile", evaluation_id);
                }
            }
            ReconcileMessage::Snapshot {
                evaluation_id,
                epoch,
                reason,
                result,
            } => self.snapshot_fetched(&evaluation_id, epoch, reason, result),
            ReconcileMessage::History(Ok(evaluations)) => {
                self.updates.send(SessionUpdate::History { evaluations });
            }
            ReconcileMessage::History(Err(e)) => {
                warn!("Failed to load evaluation history: {}", e);
                self.updates
                    .notice(Notice::warning(format!("Could not load evaluation history: {}", e)));
            }
            ReconcileMessage::PollDue => {
                if self.state.projection().is_frozen() {
                    return;
                }
                if let Some(evaluation_id) = self.state.tracked_id().map(str::to_owned) {
                    let fetch = self.reconciler.fetch(
                        &evaluation_id,
                        self.state.epoch(),
                        FetchReason::Poll,
                        Duration::ZERO,
                    );
                    self.keep(fetch);
                }
            }
        }
    }

    fn snapshot_fetched(
        &mut self,
        evaluation_id: &str,
        epoch: u64,
        reason: FetchReason,
        result: std::result::Result<crate::reconcile::Snapshot, crate::api::ApiError>,
    ) {
        if !self.state.is_current(evaluation_id, epoch) {
            debug!("Discarding stale {} fetch of {}", reason, evaluation_id);
            return;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to refresh evaluation {} ({}): {}", evaluation_id, reason, e);
                self.updates.notice(
                    Notice::warning(format!("Could not refresh evaluation {}: {}", evaluation_id, e))
                        .for_evaluation(evaluation_id),
                );
                return;
            }
        };

        let was_frozen = self.state.projection().is_frozen();
        let status = snapshot.evaluation.status;
        if was_frozen && !status.is_terminal() {
            // Issued before the terminal event arrived. Only its QCM list
            // is used.
            debug!(
                "Keeping frozen projection over outdated {} fetch of {}",
                reason, evaluation_id
            );
        } else {
            self.state.projection_mut().replace(snapshot.evaluation);
            self.publish_projection();
        }

        if let Some(items) = snapshot.qcm {
            self.state.feed_mut().seed(items);
            self.updates.send(SessionUpdate::FeedReset {
                items: self.state.feed().items().to_vec(),
            });
        }

        if !was_frozen && status.is_terminal() && reason != FetchReason::Initial {
            info!("Evaluation {} finished while not live ({})", evaluation_id, status);
            self.updates.notice(
                Notice::info(format!("Evaluation {} is {}", evaluation_id, status))
                    .for_evaluation(evaluation_id),
            );
            let refresh = self.reconciler.refresh_history();
            self.keep(refresh);
        }
    }

    fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Notify(notice) => self.updates.notice(notice),
                Effect::ProjectionChanged => self.publish_projection(),
                Effect::FeedAppended(item) => {
                    self.updates.send(SessionUpdate::FeedAppended { item });
                }
                Effect::ScheduleReconciliation {
                    evaluation_id,
                    epoch,
                    delay,
                } => {
                    debug!("Reconciling {} in {:?}", evaluation_id, delay);
                    let fetch =
                        self.reconciler
                            .fetch(&evaluation_id, epoch, FetchReason::Terminal, delay);
                    self.keep(fetch);
                }
                Effect::RefreshHistory => {
                    let refresh = self.reconciler.refresh_history();
                    self.keep(refresh);
                }
            }
        }
    }

    fn channel_state(&mut self, channel: Channel, state: ChannelState) {
        self.updates.send(SessionUpdate::Channel { channel, state });
        if state != ChannelState::Open || self.seen_open.insert(channel) {
            return;
        }

        if let Some(evaluation_id) = self.state.tracked_id().map(str::to_owned) {
            info!("Channel {} reopened, reconciling {}", channel, evaluation_id);
            let fetch = self.reconciler.fetch(
                &evaluation_id,
                self.state.epoch(),
                FetchReason::Reconnect,
                Duration::ZERO,
            );
            self.keep(fetch);
        }
    }

    fn track(&mut self, evaluation_id: &str) {
        if self.state.is_tracking(evaluation_id) {
            debug!("Already tracking {}", evaluation_id);
            return;
        }

        let epoch = self.state.track(evaluation_id);
        info!("Tracking evaluation {}", evaluation_id);
        self.updates.send(SessionUpdate::Tracking {
            evaluation_id: Some(evaluation_id.to_string()),
        });
        self.publish_projection();
        self.updates.send(SessionUpdate::FeedReset { items: vec![] });

        let fetch = self
            .reconciler
            .fetch(evaluation_id, epoch, FetchReason::Initial, Duration::ZERO);
        self.keep(fetch);
    }

    fn reset(&mut self) {
        self.state.reset();
        info!("Tracking reset");
        self.updates.send(SessionUpdate::Tracking {
            evaluation_id: None,
        });
        self.updates.send(SessionUpdate::FeedReset { items: vec![] });
    }

    fn publish_projection(&self) {
        if let Some(evaluation) = self.state.projection().current() {
            self.updates.send(SessionUpdate::Projection {
                evaluation: evaluation.clone(),
                frozen: self.state.projection().is_frozen(),
            });
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tracked: self.state.tracked_id().map(str::to_owned),
            epoch: self.state.epoch(),
            evaluation: self.state.projection().current().cloned(),
            frozen: self.state.projection().is_frozen(),
            feed: self.state.feed().items().to_vec(),
            channels: self
                .channels
                .iter()
                .filter_map(|&channel| self.transport.state(channel).map(|state| (channel, state)))
                .collect(),
        }
    }

    fn keep(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(task);
    }

    fn stop(&mut self) {
        self.transport.disconnect_all();
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Watch session stopped");
    }
}
