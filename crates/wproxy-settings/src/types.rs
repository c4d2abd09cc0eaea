//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section is `#[serde(default)]`, so
//! a partial file only overrides the keys it names.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "proxy": { "targetUrl": "ws://10.0.0.5:9090/feed", "forwardQuery": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Relay behaviour.
    pub proxy: RelaySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl ProxySettings {
    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        let url = &self.proxy.target_url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "proxy.targetUrl must be a ws:// or wss:// URL, got {url:?}"
            )));
        }
        if !self.server.proxy_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.proxyPath must start with '/', got {:?}",
                self.server.proxy_path
            )));
        }
        if matches!(self.server.proxy_path.as_str(), "/health" | "/metrics") {
            return Err(SettingsError::InvalidValue(format!(
                "server.proxyPath {:?} collides with a built-in route",
                self.server.proxy_path
            )));
        }
        if let (Some(frame), Some(message)) = (self.proxy.max_frame_size, self.proxy.max_message_size) {
            if frame > message {
                return Err(SettingsError::InvalidValue(format!(
                    "proxy.maxFrameSize ({frame}) exceeds proxy.maxMessageSize ({message})"
                )));
            }
        }
        if let Some(reply) = &self.proxy.ping_reply {
            if reply.request.is_empty() {
                return Err(SettingsError::InvalidValue(
                    "proxy.pingReply.request is empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 picks a free one).
    pub port: u16,
    /// Route that upgrades to a proxied WebSocket.
    pub proxy_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            proxy_path: "/ws/proxy".to_string(),
        }
    }
}

/// Relay settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// WebSocket URL dialed for every session.
    pub target_url: String,
    /// Append the inbound request's query string to `target_url`.
    pub forward_query: bool,
    /// When one relay direction stops, stop the other and close both sides.
    pub cancel_sibling_on_exit: bool,
    /// Largest accepted message in bytes.
    pub max_message_size: Option<usize>,
    /// Largest accepted frame in bytes.
    pub max_frame_size: Option<usize>,
    /// Answer one client text message locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_reply: Option<PingReplySettings>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            target_url: "ws://127.0.0.1:9090".to_string(),
            forward_query: true,
            cancel_sibling_on_exit: true,
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            ping_reply: None,
        }
    }
}

/// Locally answered client message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReplySettings {
    /// Client text that triggers the reply.
    pub request: String,
    /// Text sent back.
    pub response: String,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
