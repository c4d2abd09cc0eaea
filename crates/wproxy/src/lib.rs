//! # wproxy
//!
//! Bidirectional WebSocket relay.
//!
//! A session pairs one inbound client with one target and runs two relay
//! loops:
//!
//! - **client → target**: parse, tagged handle, then convert and forward, or
//!   answer the client directly for [`MessageType::Ping`]
//! - **target → client**: parse, filter, handle, convert, forward
//!
//! The embedding application supplies a [`ClientRoleHandler`] and a
//! [`ServerRoleHandler`]; [`ProxyServer::proxy`] does the rest.
//!
//! ```ignore
//! let handler = Arc::new(Passthrough::new());
//! let server = ProxyServer::new("ws://127.0.0.1:9090", handler.clone(), handler);
//! server.proxy(StreamUpgrader::new(tcp), None, None, vec![with_query("id=1")]).await?;
//! ```

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod message;
pub mod metrics;
pub mod options;
pub mod passthrough;
pub mod pipeline;
pub mod relay;
pub mod server;
pub mod session;

pub use connection::provider::{ConnectionProvider, Dialer, NoProvider, StreamUpgrader, WsLimits};
#[cfg(feature = "axum")]
pub use connection::provider::AxumUpgrade;
pub use connection::{BoxConnection, Connection, ConnectionInfo, FrameSink, FrameStream, Side};
pub use error::{BoxError, ConnectionError, PipelineError, ProxyError, Stage};
pub use message::{Frame, MessageType, Payload};
pub use options::{SessionOption, SessionPolicy, SessionSetup};
pub use passthrough::{Passthrough, PingReply};
pub use pipeline::{
    ClientRoleHandler, Converter, Filter, Handler, Parser, ServerRoleHandler, TaggedHandler,
};
pub use relay::{Direction, DirectionReport, LoopExit, SessionReport};
pub use server::{ProxyServer, SessionStats};
pub use session::ProxySession;
