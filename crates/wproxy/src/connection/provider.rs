//! Sources of fresh connections: inbound upgrades and outbound dials.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

use super::BoxConnection;
use super::ws::WsConnection;
use crate::error::ProxyError;

/// Creates a connection when no reusable one is available.
#[async_trait]
pub trait ConnectionProvider: Send {
    /// Establish a new connection.
    async fn acquire(&mut self) -> Result<BoxConnection, ProxyError>;
}

/// Size limits applied to upgraded and dialed WebSockets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WsLimits {
    /// Largest accepted message, in bytes.
    pub max_message_size: Option<usize>,
    /// Largest accepted frame, in bytes.
    pub max_frame_size: Option<usize>,
}

impl Default for WsLimits {
    fn default() -> Self {
        Self {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
        }
    }
}

impl WsLimits {
    /// Equivalent `tungstenite` configuration.
    pub fn to_config(self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = self.max_message_size;
        config.max_frame_size = self.max_frame_size;
        config
    }
}

/// Server-side handshake over a raw stream (typically an accepted TCP socket).
///
/// Every origin is accepted.
pub struct StreamUpgrader<S> {
    stream: Option<S>,
    endpoint: Option<String>,
    limits: WsLimits,
}

impl<S> StreamUpgrader<S> {
    /// Upgrade `stream` on first acquire.
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            endpoint: None,
            limits: WsLimits::default(),
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Override size limits.
    #[must_use]
    pub fn with_limits(mut self, limits: WsLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[async_trait]
impl<S> ConnectionProvider for StreamUpgrader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn acquire(&mut self) -> Result<BoxConnection, ProxyError> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| ProxyError::Upgrade("inbound stream already consumed".into()))?;
        let ws = tokio_tungstenite::accept_async_with_config(stream, Some(self.limits.to_config()))
            .await
            .map_err(|e| ProxyError::Upgrade(e.to_string()))?;
        debug!(endpoint = ?self.endpoint, "inbound websocket upgraded");
        let mut conn = WsConnection::new(ws);
        if let Some(endpoint) = &self.endpoint {
            conn = conn.with_endpoint(endpoint.clone());
        }
        Ok(Box::new(conn))
    }
}

/// Dials the target URL with `tokio-tungstenite`.
pub struct Dialer {
    url: String,
    limits: WsLimits,
}

impl Dialer {
    /// Dial `url` on acquire.
    pub fn new(url: impl Into<String>, limits: WsLimits) -> Self {
        Self {
            url: url.into(),
            limits,
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConnectionProvider for Dialer {
    async fn acquire(&mut self) -> Result<BoxConnection, ProxyError> {
        validate_target_url(&self.url)?;
        let request =
            self.url
                .as_str()
                .into_client_request()
                .map_err(|e| ProxyError::InvalidTarget {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
        let (ws, response) =
            tokio_tungstenite::connect_async_with_config(request, Some(self.limits.to_config()), false)
                .await
                .map_err(|e| ProxyError::Dial {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;
        debug!(url = %self.url, status = %response.status(), "target dialed");
        Ok(Box::new(WsConnection::new(ws).with_endpoint(self.url.clone())))
    }
}

/// Reject addresses that are not `ws://` or `wss://` URLs.
pub fn validate_target_url(url: &str) -> Result<(), ProxyError> {
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| ProxyError::InvalidTarget {
            url: url.to_owned(),
            reason: "scheme must be ws or wss".into(),
        })?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(ProxyError::InvalidTarget {
            url: url.to_owned(),
            reason: "missing host".into(),
        });
    }
    Ok(())
}

/// For callers that always supply established connections.
///
/// Acquire fails with [`ProxyError::Upgrade`], so a supplied connection that
/// fails its probe ends setup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProvider;

#[async_trait]
impl ConnectionProvider for NoProvider {
    async fn acquire(&mut self) -> Result<BoxConnection, ProxyError> {
        Err(ProxyError::Upgrade("no connection source available".into()))
    }
}

#[cfg(feature = "axum")]
pub use self::axum_upgrade::AxumUpgrade;

#[cfg(feature = "axum")]
mod axum_upgrade {
    use async_trait::async_trait;
    use axum::extract::ws::{WebSocket, WebSocketUpgrade};
    use axum::response::Response;
    use tokio::sync::oneshot;
    use tracing::warn;

    use super::{ConnectionProvider, WsLimits};
    use crate::connection::BoxConnection;
    use crate::connection::ws::WsConnection;
    use crate::error::ProxyError;

    /// Receives the socket produced by an axum [`WebSocketUpgrade`].
    ///
    /// The handler returns the upgrade response immediately; the session
    /// then waits in [`acquire`](ConnectionProvider::acquire) until hyper
    /// completes the upgrade.
    pub struct AxumUpgrade {
        rx: Option<oneshot::Receiver<WebSocket>>,
        endpoint: Option<String>,
    }

    impl AxumUpgrade {
        /// Start the upgrade. Return the response from the axum handler.
        pub fn new(mut ws: WebSocketUpgrade, limits: WsLimits) -> (Self, Response) {
            let (tx, rx) = oneshot::channel();
            if let Some(size) = limits.max_message_size {
                ws = ws.max_message_size(size);
            }
            if let Some(size) = limits.max_frame_size {
                ws = ws.max_frame_size(size);
            }
            let response = ws
                .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
                .on_upgrade(move |socket| async move {
                    let _ = tx.send(socket);
                });
            let upgrade = Self {
                rx: Some(rx),
                endpoint: None,
            };
            (upgrade, response)
        }

        /// Record the peer address.
        #[must_use]
        pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
            self.endpoint = Some(endpoint.into());
            self
        }
    }

    #[async_trait]
    impl ConnectionProvider for AxumUpgrade {
        async fn acquire(&mut self) -> Result<BoxConnection, ProxyError> {
            let rx = self
                .rx
                .take()
                .ok_or_else(|| ProxyError::Upgrade("upgrade already consumed".into()))?;
            let socket = rx
                .await
                .map_err(|_| ProxyError::Upgrade("client went away before upgrade".into()))?;
            let mut conn = WsConnection::new(socket);
            if let Some(endpoint) = &self.endpoint {
                conn = conn.with_endpoint(endpoint.clone());
            }
            Ok(Box::new(conn))
        }
    }
}
