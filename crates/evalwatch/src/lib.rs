//! Live progress synchronization for QCM-based LLM evaluation runs.
//!
//! A [`WatchSession`] keeps one evaluation's state in sync with the
//! backend: push channels deliver live events, the [`Dispatcher`] folds
//! them into an [`EvaluationProjection`] and a [`LiveFeed`], and the
//! [`Reconciler`] replaces the projection from authoritative fetches
//! whenever live delivery may have diverged.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod model;
pub mod projection;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use api::{ApiError, EvaluationApi, HttpEvaluationApi};
pub use broadcast::{Notice, NoticeLevel, SessionUpdate, UpdateBroadcaster};
pub use config::{load_config, resolve_config, WatchConfig};
pub use dispatcher::{Dispatcher, Effect};
pub use error::{ConfigError, EvalWatchError, Result, SessionError};
pub use feed::{FeedView, LiveFeed};
pub use model::{
    Evaluation, EvaluationPhase, EvaluationStatus, EvaluationSummary, QcmItem,
    StartEvaluationRequest, StartedEvaluation,
};
pub use projection::{ApplyOutcome, EvaluationProjection, EvaluationUpdate};
pub use reconcile::{FetchReason, PollScheduler, ReconcileMessage, Reconciler};
pub use session::{SessionHandle, SessionSnapshot, SessionState, WatchSession};
pub use transport::{Channel, ChannelEvent, ChannelState, ChannelTransport, TransportError};
