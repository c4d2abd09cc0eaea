//! In-process connection pair.
//!
//! Each end of [`pair`] is a [`MemoryConnection`]: usable as a session
//! connection, or driven directly with [`MemoryConnection::send`] and
//! [`MemoryConnection::recv`] to play the peer.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connection, FrameSink, FrameStream};
use crate::error::ConnectionError;
use crate::message::Frame;

/// Default per-direction buffer of [`pair`].
pub const DEFAULT_CAPACITY: usize = 64;

type Item = Result<Frame, ConnectionError>;

/// One end of an in-process connection.
pub struct MemoryConnection {
    sink: MemorySink,
    stream: MemoryStream,
    endpoint: Option<String>,
}

/// Two connected ends with [`DEFAULT_CAPACITY`] buffering.
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    pair_with_capacity(DEFAULT_CAPACITY)
}

/// Two connected ends with `capacity` messages of buffering per direction.
pub fn pair_with_capacity(capacity: usize) -> (MemoryConnection, MemoryConnection) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    let a = MemoryConnection {
        sink: MemorySink { tx: Some(a_tx) },
        stream: MemoryStream { rx: a_rx },
        endpoint: None,
    };
    let b = MemoryConnection {
        sink: MemorySink { tx: Some(b_tx) },
        stream: MemoryStream { rx: b_rx },
        endpoint: None,
    };
    (a, b)
}

impl MemoryConnection {
    /// Label the peer of this end.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Write a message to the other end.
    pub async fn send(&mut self, frame: impl Into<Frame>) -> Result<(), ConnectionError> {
        self.sink.send(frame.into()).await
    }

    /// Make the other end's next read fail with `err`.
    pub async fn fail_peer(&mut self, err: ConnectionError) -> Result<(), ConnectionError> {
        self.sink.push(Err(err)).await
    }

    /// Read the next message from the other end.
    pub async fn recv(&mut self) -> Result<Frame, ConnectionError> {
        self.stream.recv().await
    }

    /// Read without waiting; `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<Result<Frame, ConnectionError>> {
        self.stream.rx.try_recv().ok()
    }

    /// Split into halves that can be dropped independently.
    pub fn into_split(self) -> (MemorySink, MemoryStream) {
        (self.sink, self.stream)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn probe(&mut self) -> Result<(), ConnectionError> {
        match &self.sink.tx {
            Some(tx) if !tx.is_closed() => Ok(()),
            _ => Err(ConnectionError::Transport("peer dropped".into())),
        }
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameStream>) {
        let (sink, stream) = self.into_split();
        (Box::new(sink), Box::new(stream))
    }
}

/// Write half of a [`MemoryConnection`].
pub struct MemorySink {
    tx: Option<mpsc::Sender<Item>>,
}

impl MemorySink {
    async fn push(&mut self, item: Item) -> Result<(), ConnectionError> {
        let Some(tx) = &self.tx else {
            return Err(ConnectionError::Transport("sink closed".into()));
        };
        tx.send(item)
            .await
            .map_err(|_| ConnectionError::Transport("peer dropped".into()))
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        self.push(Ok(frame)).await
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let result = self.push(Err(ConnectionError::closed())).await;
        self.tx = None;
        result
    }
}

/// Read half of a [`MemoryConnection`].
pub struct MemoryStream {
    rx: mpsc::Receiver<Item>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Frame, ConnectionError> {
        self.rx.recv().await.unwrap_or_else(|| Err(ConnectionError::closed()))
    }
}
