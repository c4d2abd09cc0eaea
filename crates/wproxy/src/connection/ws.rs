//! WebSocket adapters over `Stream + Sink` message transports.

use std::fmt::Display;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite;

use super::{Connection, FrameSink, FrameStream};
use crate::error::ConnectionError;
use crate::message::Frame;

/// What an inbound transport message means to the relay.
#[derive(Debug)]
pub enum Inbound {
    /// A data message.
    Data(Frame),
    /// Ping/pong or a raw frame; skipped.
    Control,
    /// The peer sent a close frame.
    Close(ConnectionError),
}

/// Mapping between a library's message type and [`Frame`].
pub trait WireMessage: Sized + Send + 'static {
    /// Zero-length ping used as the liveness probe.
    fn probe() -> Self;
    /// Close frame without a status.
    fn close() -> Self;
    /// Data message carrying `frame`.
    fn from_frame(frame: Frame) -> Self;
    /// Classify an inbound message.
    fn into_inbound(self) -> Inbound;
}

impl WireMessage for tungstenite::Message {
    fn probe() -> Self {
        Self::Ping(Bytes::new())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.into()),
            Frame::Binary(data) => Self::Binary(data),
        }
    }

    fn into_inbound(self) -> Inbound {
        match self {
            Self::Text(text) => Inbound::Data(Frame::Text(text.as_str().to_owned())),
            Self::Binary(data) => Inbound::Data(Frame::Binary(data)),
            Self::Close(frame) => Inbound::Close(match frame {
                Some(frame) => ConnectionError::Closed {
                    code: Some(u16::from(frame.code)),
                    reason: frame.reason.as_str().to_owned(),
                },
                None => ConnectionError::closed(),
            }),
            Self::Ping(_) | Self::Pong(_) | Self::Frame(_) => Inbound::Control,
        }
    }
}

#[cfg(feature = "axum")]
impl WireMessage for axum::extract::ws::Message {
    fn probe() -> Self {
        Self::Ping(Bytes::new())
    }

    fn close() -> Self {
        Self::Close(None)
    }

    fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.into()),
            Frame::Binary(data) => Self::Binary(data),
        }
    }

    fn into_inbound(self) -> Inbound {
        match self {
            Self::Text(text) => Inbound::Data(Frame::Text(text.as_str().to_owned())),
            Self::Binary(data) => Inbound::Data(Frame::Binary(data)),
            Self::Close(frame) => Inbound::Close(match frame {
                Some(frame) => ConnectionError::Closed {
                    code: Some(frame.code),
                    reason: frame.reason.as_str().to_owned(),
                },
                None => ConnectionError::closed(),
            }),
            Self::Ping(_) | Self::Pong(_) => Inbound::Control,
        }
    }
}

/// A WebSocket transport as a session [`Connection`].
pub struct WsConnection<S> {
    inner: S,
    endpoint: Option<String>,
}

impl<S> WsConnection<S> {
    /// Wrap a transport.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            endpoint: None,
        }
    }

    /// Record the peer address or URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Unwrap the transport.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S, M, E> Connection for WsConnection<S>
where
    S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Unpin + Send + 'static,
    M: WireMessage,
    E: Display + Send + 'static,
{
    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn probe(&mut self) -> Result<(), ConnectionError> {
        self.inner
            .send(M::probe())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameStream>) {
        let (sink, stream) = self.inner.split();
        (Box::new(WsSink { inner: sink }), Box::new(WsStream { inner: stream }))
    }
}

struct WsSink<S, M> {
    inner: SplitSink<S, M>,
}

#[async_trait]
impl<S, M, E> FrameSink for WsSink<S, M>
where
    S: Sink<M, Error = E> + Unpin + Send + 'static,
    M: WireMessage,
    E: Display + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        self.inner
            .send(M::from_frame(frame))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.inner
            .send(M::close())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }
}

struct WsStream<S> {
    inner: SplitStream<S>,
}

#[async_trait]
impl<S, M, E> FrameStream for WsStream<S>
where
    S: Stream<Item = Result<M, E>> + Unpin + Send + 'static,
    M: WireMessage,
    E: Display + Send + 'static,
{
    async fn recv(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            match self.inner.next().await {
                None => return Err(ConnectionError::closed()),
                Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
                Some(Ok(msg)) => match msg.into_inbound() {
                    Inbound::Data(frame) => return Ok(frame),
                    Inbound::Control => {}
                    Inbound::Close(err) => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tungstenite::Message;
    use tungstenite::protocol::CloseFrame;
    use tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn tungstenite_text_is_data() {
        let inbound = Message::Text("hello".into()).into_inbound();
        assert!(matches!(inbound, Inbound::Data(Frame::Text(ref t)) if t == "hello"));
    }

    #[test]
    fn tungstenite_control_is_skipped() {
        assert!(matches!(Message::Ping(Bytes::new()).into_inbound(), Inbound::Control));
        assert!(matches!(Message::Pong(Bytes::new()).into_inbound(), Inbound::Control));
    }

    #[test]
    fn tungstenite_close_carries_code_and_reason() {
        let msg = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        }));
        let Inbound::Close(err) = msg.into_inbound() else {
            panic!("expected close");
        };
        assert_eq!(
            err,
            ConnectionError::Closed {
                code: Some(1001),
                reason: "bye".into(),
            }
        );
    }

    #[test]
    fn probe_is_empty_ping() {
        let Message::Ping(data) = <Message as WireMessage>::probe() else {
            panic!("expected ping");
        };
        assert!(data.is_empty());
    }

    #[test]
    fn frame_maps_to_matching_message() {
        let msg = Message::from_frame(Frame::Binary(Bytes::from_static(b"\x01")));
        assert_eq!(msg, Message::Binary(Bytes::from_static(b"\x01")));
        let msg = Message::from_frame(Frame::Text("t".into()));
        assert_eq!(msg, Message::Text("t".into()));
    }
}
