//! Pipeline capabilities and the two role handler contracts.
//!
//! Each direction of a session runs its messages through the stages of one
//! role handler:
//!
//! - client → target: [`Parser`] → [`TaggedHandler`] → [`Converter`]
//! - target → client: [`Parser`] → [`Filter`] → [`Handler`] → [`Converter`]
//!
//! Stages are synchronous. A stage error drops the current message and is
//! reported through `handle_error`; the loop keeps reading.
//!
//! Role handlers are shared by both relay loops of a session (and usually by
//! every session of a [`ProxyServer`](crate::server::ProxyServer)), so hooks
//! may run concurrently. Any internal state must be synchronized.

use std::ops::ControlFlow;

use tracing::{debug, trace, warn};

use crate::connection::ConnectionInfo;
use crate::error::{BoxError, ConnectionError, PipelineError};
use crate::message::{Frame, MessageType, Payload};

/// Raw frame to intermediate payload.
pub trait Parser: Send + Sync {
    /// Parse one raw inbound message.
    fn parse(&self, raw: Frame) -> Result<Payload, BoxError>;
}

/// Keep/drop decision for target messages.
pub trait Filter: Send + Sync {
    /// `Ok(None)` drops the message without reporting an error.
    fn filter(&self, value: Payload) -> Result<Option<Payload>, BoxError>;
}

/// Business handling for target messages.
pub trait Handler: Send + Sync {
    /// Handle one parsed (and filtered) message.
    fn handle(&self, value: Payload) -> Result<Payload, BoxError>;
}

/// Business handling for client messages; also decides where the result goes.
pub trait TaggedHandler: Send + Sync {
    /// Handle one parsed message. [`MessageType::Ping`] sends the result
    /// straight back to the client.
    fn handle(&self, value: Payload) -> Result<(Payload, MessageType), BoxError>;
}

/// Final transform before writing to the opposite connection.
pub trait Converter: Send + Sync {
    /// Convert a handled message.
    fn convert(&self, value: Payload) -> Result<Payload, BoxError>;
}

/// Contract implemented for the client side of a session.
pub trait ClientRoleHandler: Parser + TaggedHandler + Converter {
    /// Called with every raw client message before parsing.
    fn read_message(&self, raw: &Frame) {
        trace!(kind = raw.kind(), len = raw.len(), "client message");
    }

    /// Called when a client message fails a pipeline stage.
    fn handle_error(&self, err: &PipelineError) {
        warn!(stage = %err.stage, error = %err.source, "dropping client message");
    }

    /// Called when reading from or writing to the client connection fails.
    ///
    /// A read failure always ends the client → target loop. For a failed
    /// write to the client, `Break` ends the target → client loop and
    /// `Continue` keeps it running.
    fn connection_error(&self, err: &ConnectionError) -> ControlFlow<()> {
        if err.is_closed() {
            debug!(error = %err, "client connection closed");
        } else {
            warn!(error = %err, "client connection failed");
        }
        ControlFlow::Break(())
    }

    /// Called once, after the client connection is ready and before
    /// configuration options run.
    fn connected(&self, info: &ConnectionInfo) {
        debug!(endpoint = ?info.endpoint, reused = info.reused, "client connected");
    }
}

/// Contract implemented for the target side of a session.
pub trait ServerRoleHandler: Parser + Filter + Handler + Converter {
    /// Called with every raw target message before parsing.
    fn read_message(&self, raw: &Frame) {
        trace!(kind = raw.kind(), len = raw.len(), "target message");
    }

    /// Called when a target message fails a pipeline stage.
    fn handle_error(&self, err: &PipelineError) {
        warn!(stage = %err.stage, error = %err.source, "dropping target message");
    }

    /// Called when reading from or writing to the target connection fails.
    ///
    /// A read failure always ends the target → client loop. For a failed
    /// write to the target, `Break` ends the client → target loop and
    /// `Continue` keeps it running.
    fn connection_error(&self, err: &ConnectionError) -> ControlFlow<()> {
        if err.is_closed() {
            debug!(error = %err, "target connection closed");
        } else {
            warn!(error = %err, "target connection failed");
        }
        ControlFlow::Break(())
    }

    /// Called once, after the target connection is ready and before the
    /// relay starts.
    fn connected(&self, info: &ConnectionInfo) {
        debug!(endpoint = ?info.endpoint, reused = info.reused, "target connected");
    }
}
