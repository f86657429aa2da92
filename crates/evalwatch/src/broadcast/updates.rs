//! Session update broadcaster for renderers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use super::notice::Notice;
use crate::model::{Evaluation, EvaluationSummary, QcmItem};
use crate::transport::{Channel, ChannelState};

/// Everything a renderer needs to redraw, as it changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// The tracked evaluation changed; `None` after a reset.
    Tracking { evaluation_id: Option<String> },
    /// New projection contents.
    Projection { evaluation: Evaluation, frozen: bool },
    /// The feed was reseeded; `items` are newest first and may be empty.
    FeedReset { items: Vec<QcmItem> },
    /// One item was added at the front of the feed.
    FeedAppended { item: QcmItem },
    Notice(Notice),
    /// Fresh evaluation history.
    History { evaluations: Vec<EvaluationSummary> },
    Channel { channel: Channel, state: ChannelState },
}

/// Broadcasts session updates to any number of renderers.
#[derive(Clone)]
pub struct UpdateBroadcaster {
    sender: Arc<broadcast::Sender<SessionUpdate>>,
}

impl UpdateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, update: SessionUpdate) {
        // No active receivers is fine
        let _ = self.sender.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.sender.subscribe()
    }

    pub fn notice(&self, notice: Notice) {
        self.send(SessionUpdate::Notice(notice));
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::NoticeLevel;

    #[test]
    fn test_send_without_receivers() {
        let broadcaster = UpdateBroadcaster::new(4);
        broadcaster.notice(Notice::info("nobody listens"));
        assert_eq!(broadcaster.receiver_count(), 0);
    }

    #[test]
    fn test_send_receive() {
        let broadcaster = UpdateBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(SessionUpdate::Tracking {
            evaluation_id: Some("e1".to_string()),
        });
        broadcaster.notice(Notice::error("quota exceeded"));

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionUpdate::Tracking { evaluation_id: Some(id) } if id == "e1"
        ));
        match rx.try_recv().unwrap() {
            SessionUpdate::Notice(notice) => assert_eq!(notice.level, NoticeLevel::Error),
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_update_wire_shape() {
        let update = SessionUpdate::Channel {
            channel: Channel::Notifications,
            state: ChannelState::Open,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["kind"], "channel");
        assert_eq!(json["channel"], "notifications");
        assert_eq!(json["state"], "open");
    }
}
