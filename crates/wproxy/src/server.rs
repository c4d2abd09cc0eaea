//! Shared proxy defaults and the per-request entry point.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::connection::BoxConnection;
use crate::connection::provider::{ConnectionProvider, WsLimits};
use crate::error::ProxyError;
use crate::options::{SessionOption, SessionPolicy};
use crate::pipeline::{ClientRoleHandler, ServerRoleHandler};
use crate::session::ProxySession;

/// Live and lifetime session counts of a [`ProxyServer`].
#[derive(Debug, Default)]
pub struct SessionStats {
    active: AtomicUsize,
    total: AtomicU64,
}

impl SessionStats {
    /// Sessions in setup or relaying.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sessions started since creation.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

struct StatsGuard(Arc<SessionStats>);

impl StatsGuard {
    fn enter(stats: &Arc<SessionStats>) -> Self {
        let _ = stats.active.fetch_add(1, Ordering::Relaxed);
        let _ = stats.total.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(stats))
    }
}

impl Drop for StatsGuard {
    fn drop(&mut self) {
        let _ = self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Target address, role handlers and policy shared by every session.
///
/// Cloning is cheap and clones share [`SessionStats`].
#[derive(Clone)]
pub struct ProxyServer {
    target_url: String,
    client_handler: Arc<dyn ClientRoleHandler>,
    server_handler: Arc<dyn ServerRoleHandler>,
    policy: SessionPolicy,
    limits: WsLimits,
    stats: Arc<SessionStats>,
}

impl ProxyServer {
    /// Proxy to `target_url` through the given role handlers.
    pub fn new(
        target_url: impl Into<String>,
        client_handler: Arc<dyn ClientRoleHandler>,
        server_handler: Arc<dyn ServerRoleHandler>,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            client_handler,
            server_handler,
            policy: SessionPolicy::default(),
            limits: WsLimits::default(),
            stats: Arc::default(),
        }
    }

    /// Default policy for new sessions.
    #[must_use]
    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limits for dialed targets.
    #[must_use]
    pub fn with_limits(mut self, limits: WsLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Default target address.
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Websocket limits.
    pub fn limits(&self) -> WsLimits {
        self.limits
    }

    /// Session counts.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// A fresh session carrying this server's defaults.
    pub fn session(&self) -> ProxySession {
        ProxySession::new(
            self.target_url.clone(),
            self.client_handler.clone(),
            self.server_handler.clone(),
        )
        .with_policy(self.policy)
        .with_limits(self.limits)
    }

    /// Proxy one client until both relay directions have stopped.
    ///
    /// `client` and `target` are reused when they pass a liveness probe;
    /// otherwise the client comes from `inbound` and the target is dialed.
    /// `options` run after the client is connected and before the dial.
    pub async fn proxy<P: ConnectionProvider>(
        &self,
        inbound: P,
        client: Option<BoxConnection>,
        target: Option<BoxConnection>,
        options: Vec<SessionOption>,
    ) -> Result<(), ProxyError> {
        let _active = StatsGuard::enter(&self.stats);
        self.session()
            .run(inbound, client, target, options)
            .await
            .map(|_report| ())
    }
}
