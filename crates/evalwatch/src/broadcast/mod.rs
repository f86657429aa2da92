//! Fan-out of session updates to renderers.

pub mod notice;
pub mod updates;

pub use notice::{Notice, NoticeLevel};
pub use updates::{SessionUpdate, UpdateBroadcaster};
