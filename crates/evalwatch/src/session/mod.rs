//! Watch sessions: one tracked evaluation kept in sync with the backend.

mod runtime;
pub mod state;

pub use runtime::{SessionHandle, SessionSnapshot, WatchSession};
pub use state::SessionState;
