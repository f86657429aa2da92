use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::Channel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub version: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ws_root")]
    pub ws_root: String,
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ws_root() -> String {
    "ws".to_string()
}

fn default_channels() -> Vec<Channel> {
    Channel::ALL.to_vec()
}

fn default_update_capacity() -> usize {
    256
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            base_url: default_base_url(),
            ws_root: default_ws_root(),
            channels: default_channels(),
            timing: TimingConfig::default(),
            http: HttpConfig::default(),
            update_capacity: default_update_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Fixed delay before a closed channel is reopened.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Delay between a live terminal status and the authoritative fetch.
    #[serde(default = "default_reconciliation_delay_ms")]
    pub reconciliation_delay_ms: u64,
    /// Re-fetch interval for a non-terminal tracked evaluation. Disabled when unset.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_reconciliation_delay_ms() -> u64 {
    1000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconciliation_delay_ms: default_reconciliation_delay_ms(),
            poll_interval_ms: None,
        }
    }
}

impl TimingConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconciliation_delay(&self) -> Duration {
        Duration::from_millis(self.reconciliation_delay_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
