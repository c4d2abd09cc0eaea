//! One client–target pairing, from setup to the exit of both relay loops.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::connection::manager;
use crate::connection::provider::{ConnectionProvider, Dialer, WsLimits};
use crate::connection::{BoxConnection, Side};
use crate::error::ProxyError;
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_TOTAL, SESSION_DURATION_SECONDS, SETUP_FAILURES_TOTAL};
use crate::options::{SessionOption, SessionPolicy, SessionSetup};
use crate::pipeline::{ClientRoleHandler, ServerRoleHandler};
use crate::relay::{Relay, SessionReport};

/// Setup sequence and relay for a single session.
///
/// Built per invocation, so options applied to one session never leak into
/// another.
pub struct ProxySession {
    id: String,
    target_url: String,
    client_handler: Arc<dyn ClientRoleHandler>,
    server_handler: Arc<dyn ServerRoleHandler>,
    policy: SessionPolicy,
    limits: WsLimits,
}

impl ProxySession {
    /// New session dialing `target_url` unless a live target is supplied.
    pub fn new(
        target_url: impl Into<String>,
        client_handler: Arc<dyn ClientRoleHandler>,
        server_handler: Arc<dyn ServerRoleHandler>,
    ) -> Self {
        Self {
            id: format!("sess_{}", Uuid::now_v7()),
            target_url: target_url.into(),
            client_handler,
            server_handler,
            policy: SessionPolicy::default(),
            limits: WsLimits::default(),
        }
    }

    /// Default policy, before options run.
    #[must_use]
    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limits for the dialed target.
    #[must_use]
    pub fn with_limits(mut self, limits: WsLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Session identifier (`sess_<uuid>`), also recorded on the session span.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the session to completion.
    ///
    /// 1. resolve the client (reuse `client` or acquire from `inbound`)
    /// 2. client `connected`
    /// 3. apply `options` in order
    /// 4. resolve the target (reuse `target` or dial the target URL)
    /// 5. server `connected`
    /// 6. relay both directions until both loops exit
    ///
    /// A setup error is returned before any loop starts.
    pub async fn run<P: ConnectionProvider>(
        self,
        mut inbound: P,
        client: Option<BoxConnection>,
        target: Option<BoxConnection>,
        options: Vec<SessionOption>,
    ) -> Result<SessionReport, ProxyError> {
        let span = info_span!("session", session_id = %self.id);
        async move {
            let started = Instant::now();
            counter!(SESSIONS_TOTAL).increment(1);
            let _active = ActiveGuard::enter();

            let relay = match self.establish(&mut inbound, client, target, options).await {
                Ok(relay) => relay,
                Err(e) => {
                    counter!(SETUP_FAILURES_TOTAL, "stage" => e.stage()).increment(1);
                    warn!(error = %e, "session setup failed");
                    return Err(e);
                }
            };

            let report = relay.run().await;
            let elapsed = started.elapsed();
            histogram!(SESSION_DURATION_SECONDS).record(elapsed.as_secs_f64());
            info!(
                duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                to_target = report.client_to_target.relayed,
                to_client = report.target_to_client.relayed,
                "session ended"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn establish(
        self,
        inbound: &mut (dyn ConnectionProvider + '_),
        client: Option<BoxConnection>,
        target: Option<BoxConnection>,
        options: Vec<SessionOption>,
    ) -> Result<Relay, ProxyError> {
        let client = manager::resolve(Side::Client, client, inbound).await?;
        self.client_handler.connected(&client.info);

        let mut setup = SessionSetup::new(
            self.target_url,
            self.server_handler,
            self.policy,
            client.info,
        );
        for option in options {
            option(&mut setup);
        }

        let mut dialer = Dialer::new(setup.target_url, self.limits);
        let target = manager::resolve(Side::Target, target, &mut dialer).await?;
        setup.server_handler.connected(&target.info);
        info!(target = ?target.info.endpoint, reused = target.info.reused, "session established");

        Ok(Relay {
            client: client.connection,
            target: target.connection,
            client_handler: self.client_handler,
            server_handler: setup.server_handler,
            cancel_sibling_on_exit: setup.policy.cancel_sibling_on_exit,
        })
    }
}

struct ActiveGuard;

impl ActiveGuard {
    fn enter() -> Self {
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        gauge!(SESSIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    use super::*;
    use crate::connection::memory::{self, MemoryConnection};
    use crate::connection::provider::NoProvider;
    use crate::connection::ConnectionInfo;
    use crate::error::{BoxError, ConnectionError};
    use crate::message::{Frame, MessageType, Payload};
    use crate::options::{append_to_target, with_policy, with_target_url};
    use crate::passthrough::{Passthrough, PingReply};
    use crate::pipeline::{Converter, Filter, Handler, Parser, TaggedHandler};
    use crate::relay::LoopExit;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Records the order of lifecycle hooks across both roles.
    #[derive(Default)]
    struct Lifecycle {
        events: Mutex<Vec<String>>,
        errors: AtomicUsize,
    }

    impl Parser for Lifecycle {
        fn parse(&self, raw: Frame) -> Result<Payload, BoxError> {
            Ok(raw.into())
        }
    }
    impl Filter for Lifecycle {
        fn filter(&self, value: Payload) -> Result<Option<Payload>, BoxError> {
            Ok(Some(value))
        }
    }
    impl Handler for Lifecycle {
        fn handle(&self, value: Payload) -> Result<Payload, BoxError> {
            Ok(value)
        }
    }
    impl TaggedHandler for Lifecycle {
        fn handle(&self, value: Payload) -> Result<(Payload, MessageType), BoxError> {
            Ok((value, MessageType::Normal))
        }
    }
    impl Converter for Lifecycle {
        fn convert(&self, value: Payload) -> Result<Payload, BoxError> {
            Ok(value)
        }
    }
    impl ClientRoleHandler for Lifecycle {
        fn connected(&self, info: &ConnectionInfo) {
            self.events.lock().push(format!("client:{}", info.reused));
        }
        fn connection_error(&self, _err: &ConnectionError) -> ControlFlow<()> {
            let _ = self.errors.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Break(())
        }
    }
    impl ServerRoleHandler for Lifecycle {
        fn connected(&self, info: &ConnectionInfo) {
            self.events.lock().push(format!("target:{}", info.reused));
        }
        fn connection_error(&self, _err: &ConnectionError) -> ControlFlow<()> {
            let _ = self.errors.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Break(())
        }
    }

    fn session(handler: &Arc<Lifecycle>, url: &str) -> ProxySession {
        ProxySession::new(url, handler.clone(), handler.clone())
    }

    fn live_pair() -> (BoxConnection, MemoryConnection) {
        let (conn, peer) = memory::pair();
        (Box::new(conn), peer)
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let handler = Arc::new(Lifecycle::default());
        let a = session(&handler, "ws://x");
        let b = session(&handler, "ws://x");
        assert!(a.id().starts_with("sess_"));
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn supplied_connections_relay_until_both_close() {
        let handler = Arc::new(Lifecycle::default());
        let (client, mut client_peer) = live_pair();
        let (target, mut target_peer) = live_pair();
        let run = tokio::spawn(session(&handler, "ws://unused").run(
            NoProvider,
            Some(client),
            Some(target),
            Vec::new(),
        ));

        client_peer.send("up").await.unwrap();
        assert_eq!(target_peer.recv().await.unwrap(), Frame::from("up"));
        target_peer.send("down").await.unwrap();
        assert_eq!(client_peer.recv().await.unwrap(), Frame::from("down"));

        drop(client_peer);
        drop(target_peer);
        let report = tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
        assert_eq!(report.client_to_target.relayed, 1);
        assert_eq!(report.target_to_client.relayed, 1);
        assert_eq!(
            *handler.events.lock(),
            vec!["client:true".to_owned(), "target:true".to_owned()]
        );
    }

    #[tokio::test]
    async fn dropped_session_closes_both_peers() {
        let handler = Arc::new(Lifecycle::default());
        let (client, mut client_peer) = live_pair();
        let (target, mut target_peer) = live_pair();
        client_peer.send("up").await.unwrap();

        let run = session(&handler, "ws://unused").run(
            NoProvider,
            Some(client),
            Some(target),
            Vec::new(),
        );
        let stopped = tokio::time::timeout(Duration::from_millis(100), run).await;
        assert!(stopped.is_err());

        assert_eq!(target_peer.recv().await.unwrap(), Frame::from("up"));
        let target_end = tokio::time::timeout(TIMEOUT, target_peer.recv()).await.unwrap();
        let client_end = tokio::time::timeout(TIMEOUT, client_peer.recv()).await.unwrap();
        assert!(target_end.unwrap_err().is_closed());
        assert!(client_end.unwrap_err().is_closed());
        assert!(target_peer.send("late").await.is_err());
        assert_eq!(handler.errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dead_client_without_provider_fails_setup() {
        let handler = Arc::new(Lifecycle::default());
        let (client, client_peer) = live_pair();
        drop(client_peer);
        let (target, _target_peer) = live_pair();
        let result = session(&handler, "ws://unused")
            .run(NoProvider, Some(client), Some(target), Vec::new())
            .await;
        assert_matches!(result, Err(ProxyError::Upgrade(_)));
        assert!(handler.events.lock().is_empty());
    }

    #[tokio::test]
    async fn options_run_after_client_connected_and_shape_the_dial() {
        let handler = Arc::new(Lifecycle::default());
        let (client, _client_peer) = live_pair();
        let seen = Arc::new(Mutex::new(None));
        let record = {
            let handler = handler.clone();
            let seen = seen.clone();
            Box::new(move |setup: &mut SessionSetup| {
                handler.events.lock().push("option".into());
                *seen.lock() = Some(setup.target_url.clone());
            }) as SessionOption
        };
        let result = session(&handler, "ws://configured")
            .run(
                NoProvider,
                Some(client),
                None,
                vec![with_target_url("bogus://"), append_to_target("/x"), record],
            )
            .await;

        assert_matches!(result, Err(ProxyError::InvalidTarget { ref url, .. }) if url == "bogus:///x");
        assert_eq!(seen.lock().as_deref(), Some("bogus:///x"));
        assert_eq!(
            *handler.events.lock(),
            vec!["client:true".to_owned(), "option".to_owned()]
        );
    }

    #[tokio::test]
    async fn dead_target_is_redialed() {
        let handler = Arc::new(Lifecycle::default());
        let (client, _client_peer) = live_pair();
        let (target, target_peer) = live_pair();
        drop(target_peer);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = session(&handler, &format!("ws://{addr}"))
            .run(NoProvider, Some(client), Some(target), Vec::new())
            .await;
        assert_matches!(result, Err(ProxyError::Dial { .. }));
    }

    #[tokio::test]
    async fn policy_option_cancels_sibling() {
        let handler = Arc::new(Lifecycle::default());
        let (client, mut client_peer) = live_pair();
        let (target, mut target_peer) = live_pair();
        let run = tokio::spawn(session(&handler, "ws://unused").run(
            NoProvider,
            Some(client),
            Some(target),
            vec![with_policy(SessionPolicy {
                cancel_sibling_on_exit: true,
            })],
        ));

        client_peer.send("up").await.unwrap();
        assert_eq!(target_peer.recv().await.unwrap(), Frame::from("up"));
        drop(client_peer);
        let report = tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
        assert_matches!(report.client_to_target.exit, LoopExit::ReadFailed(_));
        assert_eq!(report.target_to_client.exit, LoopExit::Cancelled);
        assert!(target_peer.recv().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn passthrough_session_answers_ping() {
        let handler = Arc::new(Passthrough::new().with_ping_reply(PingReply {
            request: "ping".into(),
            response: "pong".into(),
        }));
        let (client, mut client_peer) = live_pair();
        let (target, mut target_peer) = live_pair();
        let run = tokio::spawn(
            ProxySession::new("ws://unused", handler.clone(), handler).run(
                NoProvider,
                Some(client),
                Some(target),
                Vec::new(),
            ),
        );
        client_peer.send("ping").await.unwrap();
        assert_eq!(client_peer.recv().await.unwrap(), Frame::from("pong"));
        drop(client_peer);
        assert!(target_peer.recv().await.unwrap_err().is_closed());
        drop(target_peer);
        let report = tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
        assert_eq!(report.client_to_target.ping_replies, 1);
        assert_eq!(report.client_to_target.relayed, 0);
    }
}
