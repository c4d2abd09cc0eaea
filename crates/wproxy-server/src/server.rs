//! `WproxyServer`: Axum front end for the relay.
//!
//! Routes:
//! - `GET {proxy_path}`: WebSocket upgrade, relayed to the configured target
//! - `GET /health`: liveness and session counts
//! - `GET /metrics`: Prometheus text, when a recorder handle is attached

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use wproxy::options::with_query;
use wproxy::{AxumUpgrade, Passthrough, PingReply, ProxyServer, SessionOption, SessionPolicy, WsLimits};
use wproxy_settings::ProxySettings;

use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay entry point shared by every session.
    pub proxy: ProxyServer,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub prometheus: Option<PrometheusHandle>,
    /// Append the upgrade request's query string to the target URL.
    pub forward_query: bool,
}

/// The wproxy HTTP server.
pub struct WproxyServer {
    settings: ProxySettings,
    proxy: ProxyServer,
    shutdown: Arc<ShutdownCoordinator>,
    prometheus: Option<PrometheusHandle>,
    start_time: Instant,
}

impl WproxyServer {
    /// Create a server relaying with [`Passthrough`] handlers built from
    /// `settings`.
    pub fn new(settings: ProxySettings) -> Self {
        let mut handler = Passthrough::new();
        if let Some(reply) = &settings.proxy.ping_reply {
            handler = handler.with_ping_reply(PingReply {
                request: reply.request.clone(),
                response: reply.response.clone(),
            });
        }
        let handler = Arc::new(handler);
        let proxy = ProxyServer::new(
            settings.proxy.target_url.clone(),
            handler.clone(),
            handler,
        );
        Self::with_proxy(settings, proxy)
    }

    /// Create a server around an already configured [`ProxyServer`].
    ///
    /// The policy and limits from `settings` replace the ones on `proxy`.
    pub fn with_proxy(settings: ProxySettings, proxy: ProxyServer) -> Self {
        let proxy = proxy
            .with_policy(SessionPolicy {
                cancel_sibling_on_exit: settings.proxy.cancel_sibling_on_exit,
            })
            .with_limits(WsLimits {
                max_message_size: settings.proxy.max_message_size,
                max_frame_size: settings.proxy.max_frame_size,
            });
        Self {
            settings,
            proxy,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            prometheus: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            proxy: self.proxy.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            prometheus: self.prometheus.clone(),
            forward_query: self.settings.proxy.forward_query,
        };

        Router::new()
            .route(&self.settings.server.proxy_path, get(proxy_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and serve until [`ShutdownCoordinator::shutdown`].
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            path = %self.settings.server.proxy_path,
            target = %self.proxy.target_url(),
            "wproxy server listening"
        );

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the relay entry point.
    pub fn proxy(&self) -> &ProxyServer {
        &self.proxy
    }

    /// Get the settings the server was built from.
    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }
}

/// GET {proxy_path}
///
/// Answers the upgrade immediately and relays on a spawned task. The task
/// is dropped, closing both sides, when shutdown starts.
async fn proxy_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
) -> Response {
    let (upgrade, response) = AxumUpgrade::new(ws, state.proxy.limits());
    let upgrade = upgrade.with_endpoint(peer.to_string());

    let mut options: Vec<SessionOption> = Vec::new();
    if state.forward_query {
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            options.push(with_query(query));
        }
    }

    let proxy = state.proxy.clone();
    state.shutdown.spawn_session(async move {
        if let Err(e) = proxy.proxy(upgrade, None, None, options).await {
            debug!(%peer, stage = e.stage(), "session ended during setup");
        }
    });
    response
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.proxy.stats();
    Json(health::health_check(
        state.start_time,
        stats.active(),
        stats.total(),
        state.proxy.target_url(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
