//! Named push channels and their endpoint addresses.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::error::TransportError;

/// A named server-to-client push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    QcmUpdates,
    EvaluationStatus,
    ProgressUpdates,
    Notifications,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::QcmUpdates,
        Channel::EvaluationStatus,
        Channel::ProgressUpdates,
        Channel::Notifications,
    ];

    /// Path segment of the channel under the websocket root.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::QcmUpdates => "qcm-updates",
            Channel::EvaluationStatus => "evaluation-status",
            Channel::ProgressUpdates => "progress-updates",
            Channel::Notifications => "notifications",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Derives `ws(s)://host/<ws-root>/<channel>` from the backend base URL.
#[derive(Debug, Clone)]
pub struct ChannelEndpoints {
    base: Url,
    ws_root: String,
}

impl ChannelEndpoints {
    /// Builds endpoints from an `http`/`https` base URL. The socket scheme
    /// follows the base: `https` maps to `wss`, `http` to `ws`.
    pub fn new(base_url: &str, ws_root: &str) -> Result<Self, TransportError> {
        let mut base = Url::parse(base_url).map_err(|e| TransportError::InvalidEndpoint {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::InvalidEndpoint {
                    url: base_url.to_string(),
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        };
        base.set_scheme(scheme)
            .map_err(|_| TransportError::InvalidEndpoint {
                url: base_url.to_string(),
                reason: format!("cannot switch scheme to '{}'", scheme),
            })?;
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            base,
            ws_root: ws_root.trim_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, channel: Channel) -> String {
        let prefix = self.base.as_str().trim_end_matches('/');
        if self.ws_root.is_empty() {
            format!("{}/{}", prefix, channel.name())
        } else {
            format!("{}/{}/{}", prefix, self.ws_root, channel.name())
        }
    }
}
