//! Connection abstraction shared by both sides of a session.
//!
//! A [`Connection`] is probed while whole, then split into a [`FrameSink`]
//! and a [`FrameStream`] once the relay starts. Adapters:
//!
//! - [`ws::WsConnection`]: any `Stream + Sink` of WebSocket messages
//!   (`tokio-tungstenite`, and `axum` with the `axum` feature)
//! - [`memory::MemoryConnection`]: in-process channel pair
//!
//! [`manager`] decides between reusing a supplied connection and creating a
//! new one through a [`provider::ConnectionProvider`].

pub mod manager;
pub mod memory;
pub mod provider;
pub mod ws;

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::message::Frame;

/// Boxed connection handed to a session.
pub type BoxConnection = Box<dyn Connection>;

/// Which side of the session a connection belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// The inbound client.
    Client,
    /// The dialed target.
    Target,
}

impl Side {
    /// Lowercase side name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Target => "target",
        }
    }
}

/// What a role handler learns about a ready connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Session side.
    pub side: Side,
    /// Peer address or URL, when known.
    pub endpoint: Option<String>,
    /// Whether a caller-supplied connection passed its probe and was reused.
    pub reused: bool,
}

/// A bidirectional message channel.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Peer address or URL, when known.
    fn endpoint(&self) -> Option<&str>;

    /// Liveness probe: write a zero-length ping.
    ///
    /// Success only proves the transport accepted a write at this instant.
    async fn probe(&mut self) -> Result<(), ConnectionError>;

    /// Split into independently owned write and read halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameStream>);
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one message.
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError>;

    /// Send a close frame. Later writes fail.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Wait for the next data message.
    ///
    /// Returns [`ConnectionError::Closed`] once the peer closes.
    async fn recv(&mut self) -> Result<Frame, ConnectionError>;
}
