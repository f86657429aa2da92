//! Per-channel connection state machine with fixed-delay reconnect.
//!
//! Each channel owns at most one connection. A connection is identified by
//! a generation number; a scheduled reconnect only fires if the generation
//! it was scheduled for is still the channel's current one, so a newer
//! `connect` always supersedes a pending retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::channel::{Channel, ChannelEndpoints};
use super::connector::{ChannelConnector, Frame};
use super::event::ChannelEvent;

/// Lifecycle of one channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No live connection; a reconnect may be scheduled.
    Disconnected,
    Connecting,
    Open,
    /// The peer started closing; teardown follows when the stream ends.
    Closing,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closing => write!(f, "closing"),
        }
    }
}

/// Receives decoded events and state changes for a channel.
///
/// Called from transport tasks; implementations must not block.
pub trait ChannelHandler: Send + Sync {
    fn on_event(&self, channel: Channel, event: ChannelEvent);

    fn on_state(&self, _channel: Channel, _state: ChannelState) {}
}

struct Slot {
    generation: u64,
    state: ChannelState,
    handler: Arc<dyn ChannelHandler>,
    reader: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl Slot {
    fn abort(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

struct Inner {
    connector: Arc<dyn ChannelConnector>,
    endpoints: ChannelEndpoints,
    reconnect_delay: Duration,
    slots: Mutex<HashMap<Channel, Slot>>,
    generations: AtomicU64,
}

impl Inner {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<Channel, Slot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Channel table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Moves `channel` to `state` if `generation` is still current.
    fn transition(&self, channel: Channel, generation: u64, state: ChannelState) -> bool {
        let mut slots = self.lock_slots();
        match slots.get_mut(&channel) {
            Some(slot) if slot.generation == generation => {
                slot.state = state;
                true
            }
            _ => false,
        }
    }
}

/// Owns one connection per channel and keeps it alive.
///
/// Cloning is cheap; clones share the same connections. Must be used from
/// within a tokio runtime.
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<Inner>,
}

impl ChannelTransport {
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        endpoints: ChannelEndpoints,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                endpoints,
                reconnect_delay,
                slots: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Opens `channel` unless a connection for it is already open, in
    /// which case nothing changes and `handler` is not installed. Any
    /// other connection (connecting, closing or disconnected) is torn down
    /// with its pending reconnect and replaced. Returns true if a new
    /// connection was started.
    pub fn connect(&self, channel: Channel, handler: Arc<dyn ChannelHandler>) -> bool {
        let mut slots = self.inner.lock_slots();
        if let Some(slot) = slots.get_mut(&channel) {
            if slot.state == ChannelState::Open {
                debug!("Channel {} already open, reusing", channel);
                return false;
            }
            debug!("Replacing {} connection of {}", slot.state, channel);
            slot.abort();
        }
        start(&self.inner, &mut slots, channel, handler);
        true
    }

    /// Closes and forgets `channel`. No reconnect happens until the next
    /// `connect`.
    pub fn disconnect(&self, channel: Channel) -> bool {
        let removed = self.inner.lock_slots().remove(&channel);
        match removed {
            Some(mut slot) => {
                slot.abort();
                info!("Channel {} disconnected", channel);
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&self) {
        let slots: Vec<(Channel, Slot)> = self.inner.lock_slots().drain().collect();
        for (channel, mut slot) in slots {
            slot.abort();
            debug!("Channel {} disconnected", channel);
        }
    }

    /// Current state of `channel`, or `None` if it is not tracked.
    pub fn state(&self, channel: Channel) -> Option<ChannelState> {
        self.inner.lock_slots().get(&channel).map(|slot| slot.state)
    }

    pub fn url_for(&self, channel: Channel) -> String {
        self.inner.endpoints.url_for(channel)
    }
}

fn start(
    inner: &Arc<Inner>,
    slots: &mut HashMap<Channel, Slot>,
    channel: Channel,
    handler: Arc<dyn ChannelHandler>,
) {
    let generation = inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
    let span = tracing::info_span!("transport.channel", channel = %channel, generation);
    let reader = tokio::spawn(
        run_connection(Arc::clone(inner), channel, generation, Arc::clone(&handler))
            .instrument(span),
    );

    // The reader cannot observe the slot before this insert: it needs the
    // lock the caller is holding.
    slots.insert(
        channel,
        Slot {
            generation,
            state: ChannelState::Connecting,
            handler,
            reader: Some(reader),
            retry: None,
        },
    );
}

async fn run_connection(
    inner: Arc<Inner>,
    channel: Channel,
    generation: u64,
    handler: Arc<dyn ChannelHandler>,
) {
    let url = inner.endpoints.url_for(channel);
    handler.on_state(channel, ChannelState::Connecting);

    match inner.connector.connect(&url).await {
        Ok(mut stream) => {
            if !inner.transition(channel, generation, ChannelState::Open) {
                debug!("Connection to {} superseded before open", url);
                return;
            }
            info!("Channel {} open ({})", channel, url);
            handler.on_state(channel, ChannelState::Open);

            while let Some(frame) = stream.next_frame().await {
                match frame {
                    Ok(Frame::Text(text)) => match ChannelEvent::decode(&text) {
                        Ok(event) => handler.on_event(channel, event),
                        Err(e) => warn!("Dropping malformed payload on {}: {}", channel, e),
                    },
                    Ok(Frame::Close) => {
                        if inner.transition(channel, generation, ChannelState::Closing) {
                            handler.on_state(channel, ChannelState::Closing);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Channel {} error: {}", channel, e);
                        break;
                    }
                }
            }
        }
        Err(e) => warn!("Channel {} connect failed: {}", channel, e),
    }

    closed(&inner, channel, generation, &handler);
}

/// Marks the connection disconnected and schedules its reconnect, unless
/// it has been superseded or removed in the meantime.
fn closed(inner: &Arc<Inner>, channel: Channel, generation: u64, handler: &Arc<dyn ChannelHandler>) {
    let scheduled = {
        let mut slots = inner.lock_slots();
        match slots.get_mut(&channel) {
            Some(slot) if slot.generation == generation => {
                slot.state = ChannelState::Disconnected;
                slot.reader = None;
                let retry_inner = Arc::clone(inner);
                slot.retry = Some(tokio::spawn(async move {
                    tokio::time::sleep(retry_inner.reconnect_delay).await;
                    retry(&retry_inner, channel, generation);
                }));
                true
            }
            _ => false,
        }
    };

    if scheduled {
        info!(
            "Channel {} closed, reconnecting in {:?}",
            channel, inner.reconnect_delay
        );
        handler.on_state(channel, ChannelState::Disconnected);
    }
}

fn retry(inner: &Arc<Inner>, channel: Channel, generation: u64) {
    let mut slots = inner.lock_slots();
    let handler = match slots.get(&channel) {
        Some(slot) if slot.generation == generation && slot.state == ChannelState::Disconnected => {
            Arc::clone(&slot.handler)
        }
        _ => {
            debug!("Reconnect of {} superseded", channel);
            return;
        }
    };
    start(inner, &mut slots, channel, handler);
}
