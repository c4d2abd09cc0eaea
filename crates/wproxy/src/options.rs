//! Per-session configuration options.
//!
//! Options run once, in list order, after the client is connected and before
//! the target is dialed. They only touch the session's own [`SessionSetup`];
//! the [`ProxyServer`](crate::server::ProxyServer) defaults are never changed.

use std::sync::Arc;

use crate::connection::ConnectionInfo;
use crate::pipeline::ServerRoleHandler;

/// A configuration step applied to one session.
pub type SessionOption = Box<dyn FnOnce(&mut SessionSetup) + Send>;

/// Cross-loop behaviour of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    /// When the first relay loop exits, cancel the other one and close both
    /// connections. Off by default: each loop ends only on its own
    /// connection's failure.
    pub cancel_sibling_on_exit: bool,
}

/// Mutable per-session state visible to options.
pub struct SessionSetup {
    /// Address dialed when no live target connection was supplied.
    pub target_url: String,
    /// Target-side role handler for this session.
    pub server_handler: Arc<dyn ServerRoleHandler>,
    /// Cross-loop behaviour.
    pub policy: SessionPolicy,
    client: ConnectionInfo,
}

impl SessionSetup {
    pub(crate) fn new(
        target_url: String,
        server_handler: Arc<dyn ServerRoleHandler>,
        policy: SessionPolicy,
        client: ConnectionInfo,
    ) -> Self {
        Self {
            target_url,
            server_handler,
            policy,
            client,
        }
    }

    /// The already-connected client.
    pub fn client(&self) -> &ConnectionInfo {
        &self.client
    }

    /// Append `query` to the target URL, with `?` or `&` as needed.
    ///
    /// A leading `?` or `&` on `query` is ignored; an empty query is a no-op.
    pub fn push_query(&mut self, query: &str) {
        let query = query.trim_start_matches(['?', '&']);
        if query.is_empty() {
            return;
        }
        let url = &mut self.target_url;
        if !url.contains('?') {
            url.push('?');
        } else if !url.ends_with(['?', '&']) {
            url.push('&');
        }
        url.push_str(query);
    }
}

/// Replace the target URL.
pub fn with_target_url(url: impl Into<String>) -> SessionOption {
    let url = url.into();
    Box::new(move |setup| setup.target_url = url)
}

/// Append a raw suffix (path or query) to the target URL.
pub fn append_to_target(suffix: impl Into<String>) -> SessionOption {
    let suffix = suffix.into();
    Box::new(move |setup| setup.target_url.push_str(&suffix))
}

/// Append a query string to the target URL.
pub fn with_query(query: impl Into<String>) -> SessionOption {
    let query = query.into();
    Box::new(move |setup| setup.push_query(&query))
}

/// Override the session policy.
pub fn with_policy(policy: SessionPolicy) -> SessionOption {
    Box::new(move |setup| setup.policy = policy)
}

/// Use a different target-side role handler for this session.
pub fn with_server_handler(handler: Arc<dyn ServerRoleHandler>) -> SessionOption {
    Box::new(move |setup| setup.server_handler = handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Side;
    use crate::passthrough::Passthrough;

    fn setup(url: &str) -> SessionSetup {
        SessionSetup::new(
            url.to_owned(),
            Arc::new(Passthrough::new()),
            SessionPolicy::default(),
            ConnectionInfo {
                side: Side::Client,
                endpoint: Some("127.0.0.1:50000".into()),
                reused: false,
            },
        )
    }

    fn apply(setup: &mut SessionSetup, options: Vec<SessionOption>) {
        for option in options {
            option(setup);
        }
    }

    #[test]
    fn options_apply_in_order() {
        let mut s = setup("ws://a");
        apply(
            &mut s,
            vec![
                with_target_url("ws://b"),
                append_to_target("/feed"),
                with_query("id=1"),
                with_query("v=2"),
            ],
        );
        assert_eq!(s.target_url, "ws://b/feed?id=1&v=2");
    }

    #[test]
    fn later_replace_wins() {
        let mut s = setup("ws://a");
        apply(
            &mut s,
            vec![append_to_target("/x"), with_target_url("ws://c")],
        );
        assert_eq!(s.target_url, "ws://c");
    }

    #[test]
    fn push_query_separators() {
        let mut s = setup("ws://a/?");
        s.push_query("id=1");
        assert_eq!(s.target_url, "ws://a/?id=1");

        let mut s = setup("ws://a/?x=1&");
        s.push_query("?id=2");
        assert_eq!(s.target_url, "ws://a/?x=1&id=2");

        let mut s = setup("ws://a");
        s.push_query("");
        assert_eq!(s.target_url, "ws://a");
    }

    #[test]
    fn policy_option_overrides_default() {
        let mut s = setup("ws://a");
        assert!(!s.policy.cancel_sibling_on_exit);
        apply(
            &mut s,
            vec![with_policy(SessionPolicy {
                cancel_sibling_on_exit: true,
            })],
        );
        assert!(s.policy.cancel_sibling_on_exit);
    }

    #[test]
    fn options_see_client_info() {
        let s = setup("ws://a");
        assert_eq!(s.client().endpoint.as_deref(), Some("127.0.0.1:50000"));
    }
}
