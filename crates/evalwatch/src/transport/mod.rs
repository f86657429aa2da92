//! Push channels: naming, decoding, and the reconnecting transport.

pub mod channel;
pub mod connector;
pub mod error;
pub mod event;
pub mod manager;

pub use channel::{Channel, ChannelEndpoints};
pub use connector::{ChannelConnector, ChannelStream, Frame, WsConnector};
pub use error::{DecodeError, TransportError};
pub use event::{
    BatchCompleted, ChannelEvent, EvaluationCompleted, EvaluationFailed, EvaluationStarted,
    PhaseChange, ProgressUpdate, QcmGenerated, StatusUpdate,
};
pub use manager::{ChannelHandler, ChannelState, ChannelTransport};
