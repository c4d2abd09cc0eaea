//! Identity role handlers.

use crate::error::BoxError;
use crate::message::{Frame, MessageType, Payload};
use crate::pipeline::{
    ClientRoleHandler, Converter, Filter, Handler, Parser, ServerRoleHandler, TaggedHandler,
};

/// Answer a client text message locally instead of forwarding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PingReply {
    /// Client text that triggers the reply.
    pub request: String,
    /// Text sent back to the client.
    pub response: String,
}

/// Relays every message unchanged in both directions.
///
/// With a [`PingReply`], client text equal to `request` is answered with
/// `response` and never reaches the target.
#[derive(Clone, Debug, Default)]
pub struct Passthrough {
    ping_reply: Option<PingReply>,
}

impl Passthrough {
    /// Forward everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `reply.request` locally.
    #[must_use]
    pub fn with_ping_reply(mut self, reply: PingReply) -> Self {
        self.ping_reply = Some(reply);
        self
    }
}

impl Parser for Passthrough {
    fn parse(&self, raw: Frame) -> Result<Payload, BoxError> {
        Ok(raw.into())
    }
}

impl Filter for Passthrough {
    fn filter(&self, value: Payload) -> Result<Option<Payload>, BoxError> {
        Ok(Some(value))
    }
}

impl Handler for Passthrough {
    fn handle(&self, value: Payload) -> Result<Payload, BoxError> {
        Ok(value)
    }
}

impl TaggedHandler for Passthrough {
    fn handle(&self, value: Payload) -> Result<(Payload, MessageType), BoxError> {
        match &self.ping_reply {
            Some(reply) if value.as_text() == Some(reply.request.as_str()) => {
                Ok((Payload::Text(reply.response.clone()), MessageType::Ping))
            }
            _ => Ok((value, MessageType::Normal)),
        }
    }
}

impl Converter for Passthrough {
    fn convert(&self, value: Payload) -> Result<Payload, BoxError> {
        Ok(value)
    }
}

impl ClientRoleHandler for Passthrough {}

impl ServerRoleHandler for Passthrough {}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn ping_pong() -> Passthrough {
        Passthrough::new().with_ping_reply(PingReply {
            request: "ping".into(),
            response: "pong".into(),
        })
    }

    #[test]
    fn binary_stays_binary() {
        let p = Passthrough::new();
        let value = p.parse(Frame::Binary(Bytes::from_static(b"\x00\x01"))).unwrap();
        assert_eq!(value, Payload::Binary(Bytes::from_static(b"\x00\x01")));
    }

    #[test]
    fn ping_request_is_answered() {
        let (value, kind) = TaggedHandler::handle(&ping_pong(), "ping".into()).unwrap();
        assert_eq!(kind, MessageType::Ping);
        assert_eq!(value, Payload::from("pong"));
    }

    #[test]
    fn other_text_is_forwarded() {
        let (value, kind) = TaggedHandler::handle(&ping_pong(), "pin".into()).unwrap();
        assert_eq!(kind, MessageType::Normal);
        assert_eq!(value, Payload::from("pin"));
    }

    #[test]
    fn without_reply_everything_is_normal() {
        let (_, kind) = TaggedHandler::handle(&Passthrough::new(), "ping".into()).unwrap();
        assert_eq!(kind, MessageType::Normal);
    }

    #[test]
    fn server_side_keeps_everything() {
        let p = Passthrough::new();
        let kept = p.filter("x".into()).unwrap();
        assert_eq!(kept, Some(Payload::from("x")));
        assert_eq!(Handler::handle(&p, "x".into()).unwrap(), Payload::from("x"));
    }
}
