//! Error taxonomy for proxy sessions.
//!
//! - [`ProxyError`]: setup failures, returned from the proxy entry point
//! - [`ConnectionError`]: read/write failures on a live connection, reported
//!   through role handler hooks
//! - [`PipelineError`]: a single message failing one pipeline stage, always
//!   recoverable

use std::fmt;

use thiserror::Error;

/// Boxed error returned by pipeline stages.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Setup failure. No relay loop is launched when one of these is returned.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The inbound WebSocket handshake failed or never completed.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),

    /// Dialing the target failed.
    #[error("failed to dial target {url}: {message}")]
    Dial {
        /// Target URL that was dialed.
        url: String,
        /// Underlying failure.
        message: String,
    },

    /// The target address is not a usable WebSocket URL.
    #[error("invalid target url {url:?}: {reason}")]
    InvalidTarget {
        /// Offending address.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ProxyError {
    /// Short label for the setup step that failed (used as a metric label).
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Upgrade(_) => "upgrade",
            Self::Dial { .. } => "dial",
            Self::InvalidTarget { .. } => "invalid_target",
        }
    }
}

/// Failure reading from or writing to an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The peer closed the connection (close frame or end of stream).
    #[error("connection closed{}", fmt_close(.code.as_ref(), .reason))]
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason (may be empty).
        reason: String,
    },

    /// Transport or protocol error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The loop was cancelled by its sibling.
    #[error("relay cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// A close without code or reason.
    pub fn closed() -> Self {
        Self::Closed {
            code: None,
            reason: String::new(),
        }
    }

    /// Whether this error is an orderly close rather than a failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

fn fmt_close(code: Option<&u16>, reason: &str) -> String {
    match (code, reason.is_empty()) {
        (Some(code), true) => format!(" ({code})"),
        (Some(code), false) => format!(" ({code}: {reason})"),
        (None, false) => format!(" ({reason})"),
        (None, true) => String::new(),
    }
}

/// Pipeline stage identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Raw frame to intermediate payload.
    Parse,
    /// Server-direction drop/keep decision.
    Filter,
    /// Business handling.
    Handle,
    /// Final payload for the opposite connection.
    Convert,
}

impl Stage {
    /// Lowercase stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Filter => "filter",
            Self::Handle => "handle",
            Self::Convert => "convert",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message failed one pipeline stage and was dropped.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    /// Stage that failed.
    pub stage: Stage,
    /// Error returned by the stage.
    #[source]
    pub source: BoxError,
}

impl PipelineError {
    /// Wrap a stage error.
    pub fn new(stage: Stage, source: impl Into<BoxError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_display_variants() {
        assert_eq!(ConnectionError::closed().to_string(), "connection closed");
        let err = ConnectionError::Closed {
            code: Some(1000),
            reason: String::new(),
        };
        assert_eq!(err.to_string(), "connection closed (1000)");
        let err = ConnectionError::Closed {
            code: Some(1001),
            reason: "going away".into(),
        };
        assert_eq!(err.to_string(), "connection closed (1001: going away)");
    }

    #[test]
    fn closed_is_not_transport() {
        assert!(ConnectionError::closed().is_closed());
        assert!(!ConnectionError::Transport("reset".into()).is_closed());
        assert!(!ConnectionError::Cancelled.is_closed());
    }

    #[test]
    fn pipeline_error_display_names_stage() {
        let err = PipelineError::new(Stage::Filter, "bad header");
        assert_eq!(err.to_string(), "filter stage failed: bad header");
        assert_eq!(err.stage, Stage::Filter);
    }

    #[test]
    fn proxy_error_stage_labels() {
        assert_eq!(ProxyError::Upgrade("x".into()).stage(), "upgrade");
        let dial = ProxyError::Dial {
            url: "ws://localhost:1".into(),
            message: "refused".into(),
        };
        assert_eq!(dial.stage(), "dial");
        assert!(dial.to_string().contains("ws://localhost:1"));
    }
}
