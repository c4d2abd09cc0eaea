//! The two relay loops of a session.
//!
//! - client → target: read, `read_message`, parse, tagged handle, then
//!   either echo to the client (ping) or convert and write to the target
//! - target → client: read, `read_message`, parse, filter, handle, convert,
//!   write to the client
//!
//! A stage error drops the message and calls `handle_error`. A read error
//! calls the reading side's `connection_error` and ends the loop. A write
//! error calls the written side's `connection_error`, whose verdict decides
//! whether the loop ends. The client connection has two writers (the
//! target → client loop and ping echoes), so its sink sits behind a mutex.

use std::ops::ControlFlow;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, Span, debug, error, info};

use crate::connection::{BoxConnection, FrameSink, FrameStream};
use crate::error::{BoxError, ConnectionError, PipelineError, Stage};
use crate::message::{Frame, MessageType, Payload};
use crate::metrics::{MESSAGES_DROPPED_TOTAL, MESSAGES_RELAYED_TOTAL, PING_REPLIES_TOTAL};
use crate::pipeline::{ClientRoleHandler, ServerRoleHandler};

type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

/// Direction of a relay loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client messages forwarded to the target.
    ClientToTarget,
    /// Target messages forwarded to the client.
    TargetToClient,
}

impl Direction {
    /// Metric/log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientToTarget => "client_to_target",
            Self::TargetToClient => "target_to_client",
        }
    }
}

/// Why a relay loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// Reading the source connection failed (including an orderly close).
    ReadFailed(ConnectionError),
    /// A write failed and the role handler asked to stop.
    WriteFailed(ConnectionError),
    /// The sibling loop exited and the session cancels on first exit.
    Cancelled,
    /// The loop task panicked.
    Panicked,
}

/// Per-direction outcome of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectionReport {
    /// Messages written to the opposite connection.
    pub relayed: u64,
    /// Messages dropped by a failing stage.
    pub dropped: u64,
    /// Messages dropped by the filter stage returning nothing.
    pub filtered: u64,
    /// Ping-tagged messages echoed back to the client.
    pub ping_replies: u64,
    /// Writes that failed but did not end the loop.
    pub write_errors: u64,
    /// Exit reason.
    pub exit: LoopExit,
}

/// Outcome of both relay loops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    /// Client → target loop.
    pub client_to_target: DirectionReport,
    /// Target → client loop.
    pub target_to_client: DirectionReport,
}

#[derive(Default)]
struct Tally {
    relayed: u64,
    dropped: u64,
    filtered: u64,
    ping_replies: u64,
    write_errors: u64,
}

impl Tally {
    fn finish(self, exit: LoopExit) -> DirectionReport {
        DirectionReport {
            relayed: self.relayed,
            dropped: self.dropped,
            filtered: self.filtered,
            ping_replies: self.ping_replies,
            write_errors: self.write_errors,
            exit,
        }
    }

    fn relayed(&mut self, direction: Direction) {
        self.relayed += 1;
        counter!(MESSAGES_RELAYED_TOTAL, "direction" => direction.as_str()).increment(1);
    }

    fn dropped(&mut self, direction: Direction, stage: Stage) {
        self.dropped += 1;
        counter!(
            MESSAGES_DROPPED_TOTAL,
            "direction" => direction.as_str(),
            "stage" => stage.as_str()
        )
        .increment(1);
    }
}

fn stage_err(stage: Stage) -> impl FnOnce(BoxError) -> PipelineError {
    move |source| PipelineError { stage, source }
}

fn encode(value: Payload, stage: Stage) -> Result<Frame, PipelineError> {
    value
        .into_frame()
        .map_err(|e| PipelineError::new(stage, e))
}

/// Where a client message goes after its pipeline.
enum Route {
    Reply(Frame),
    Forward(Frame),
}

/// Both connections and handlers of a session, ready to relay.
pub(crate) struct Relay {
    pub(crate) client: BoxConnection,
    pub(crate) target: BoxConnection,
    pub(crate) client_handler: Arc<dyn ClientRoleHandler>,
    pub(crate) server_handler: Arc<dyn ServerRoleHandler>,
    pub(crate) cancel_sibling_on_exit: bool,
}

impl Relay {
    /// Run both loops concurrently and wait for both to exit.
    ///
    /// Dropping the returned future aborts both loops, which drops every
    /// sink and stream of the session.
    pub(crate) async fn run(self) -> SessionReport {
        let (client_sink, client_stream) = self.client.split();
        let (target_sink, target_stream) = self.target.split();
        let client_sink: SharedSink = Arc::new(Mutex::new(client_sink));
        let cancel = CancellationToken::new();

        let upstream = Upstream {
            stream: client_stream,
            client_sink: client_sink.clone(),
            target_sink,
            client: self.client_handler.clone(),
            server: self.server_handler.clone(),
            cancel: cancel.clone(),
            cancel_sibling_on_exit: self.cancel_sibling_on_exit,
        };
        let downstream = Downstream {
            stream: target_stream,
            client_sink,
            client: self.client_handler,
            server: self.server_handler,
            cancel,
            cancel_sibling_on_exit: self.cancel_sibling_on_exit,
        };

        let upstream = AbortOnDropHandle::new(tokio::spawn(
            upstream.run().instrument(Span::current()),
        ));
        let downstream = AbortOnDropHandle::new(tokio::spawn(
            downstream.run().instrument(Span::current()),
        ));
        let (upstream, downstream) = tokio::join!(upstream, downstream);

        SessionReport {
            client_to_target: joined(Direction::ClientToTarget, upstream),
            target_to_client: joined(Direction::TargetToClient, downstream),
        }
    }
}

fn joined(
    direction: Direction,
    result: Result<DirectionReport, tokio::task::JoinError>,
) -> DirectionReport {
    result.unwrap_or_else(|e| {
        error!(direction = direction.as_str(), error = %e, "relay loop panicked");
        Tally::default().finish(LoopExit::Panicked)
    })
}

struct Upstream {
    stream: Box<dyn FrameStream>,
    client_sink: SharedSink,
    target_sink: Box<dyn FrameSink>,
    client: Arc<dyn ClientRoleHandler>,
    server: Arc<dyn ServerRoleHandler>,
    cancel: CancellationToken,
    cancel_sibling_on_exit: bool,
}

impl Upstream {
    const DIRECTION: Direction = Direction::ClientToTarget;

    async fn run(mut self) -> DirectionReport {
        let mut tally = Tally::default();
        let exit = loop {
            let raw = tokio::select! {
                () = self.cancel.cancelled() => break LoopExit::Cancelled,
                read = self.stream.recv() => match read {
                    Ok(raw) => raw,
                    Err(err) => {
                        let _ = self.client.connection_error(&err);
                        break LoopExit::ReadFailed(err);
                    }
                },
            };
            self.client.read_message(&raw);

            match self.process(raw) {
                Err(err) => {
                    debug!(stage = %err.stage, "client message dropped");
                    tally.dropped(Self::DIRECTION, err.stage);
                    self.client.handle_error(&err);
                }
                Ok(Route::Reply(frame)) => {
                    let written = self.client_sink.lock().await.send(frame).await;
                    if let Err(err) = written {
                        let _ = self.client.connection_error(&err);
                        break LoopExit::WriteFailed(err);
                    }
                    tally.ping_replies += 1;
                    counter!(PING_REPLIES_TOTAL).increment(1);
                }
                Ok(Route::Forward(frame)) => match self.target_sink.send(frame).await {
                    Ok(()) => tally.relayed(Self::DIRECTION),
                    Err(err) => {
                        tally.write_errors += 1;
                        if let ControlFlow::Break(()) = self.server.connection_error(&err) {
                            break LoopExit::WriteFailed(err);
                        }
                    }
                },
            }
        };

        info!(direction = Self::DIRECTION.as_str(), exit = ?exit, relayed = tally.relayed, "relay loop exited");
        if self.cancel_sibling_on_exit {
            self.cancel.cancel();
            let _ = self.target_sink.close().await;
        }
        tally.finish(exit)
    }

    fn process(&self, raw: Frame) -> Result<Route, PipelineError> {
        let value = self.client.parse(raw).map_err(stage_err(Stage::Parse))?;
        let (value, kind) = self.client.handle(value).map_err(stage_err(Stage::Handle))?;
        if kind == MessageType::Ping {
            return encode(value, Stage::Handle).map(Route::Reply);
        }
        let value = self.client.convert(value).map_err(stage_err(Stage::Convert))?;
        encode(value, Stage::Convert).map(Route::Forward)
    }
}

struct Downstream {
    stream: Box<dyn FrameStream>,
    client_sink: SharedSink,
    client: Arc<dyn ClientRoleHandler>,
    server: Arc<dyn ServerRoleHandler>,
    cancel: CancellationToken,
    cancel_sibling_on_exit: bool,
}

impl Downstream {
    const DIRECTION: Direction = Direction::TargetToClient;

    async fn run(mut self) -> DirectionReport {
        let mut tally = Tally::default();
        let exit = loop {
            let raw = tokio::select! {
                () = self.cancel.cancelled() => break LoopExit::Cancelled,
                read = self.stream.recv() => match read {
                    Ok(raw) => raw,
                    Err(err) => {
                        let _ = self.server.connection_error(&err);
                        break LoopExit::ReadFailed(err);
                    }
                },
            };
            self.server.read_message(&raw);

            let frame = match self.process(raw) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tally.filtered += 1;
                    continue;
                }
                Err(err) => {
                    debug!(stage = %err.stage, "target message dropped");
                    tally.dropped(Self::DIRECTION, err.stage);
                    self.server.handle_error(&err);
                    continue;
                }
            };

            let written = self.client_sink.lock().await.send(frame).await;
            match written {
                Ok(()) => tally.relayed(Self::DIRECTION),
                Err(err) => {
                    tally.write_errors += 1;
                    if let ControlFlow::Break(()) = self.client.connection_error(&err) {
                        break LoopExit::WriteFailed(err);
                    }
                }
            }
        };

        info!(direction = Self::DIRECTION.as_str(), exit = ?exit, relayed = tally.relayed, "relay loop exited");
        if self.cancel_sibling_on_exit {
            self.cancel.cancel();
            let _ = self.client_sink.lock().await.close().await;
        }
        tally.finish(exit)
    }

    fn process(&self, raw: Frame) -> Result<Option<Frame>, PipelineError> {
        let value = self.server.parse(raw).map_err(stage_err(Stage::Parse))?;
        let Some(value) = self.server.filter(value).map_err(stage_err(Stage::Filter))? else {
            return Ok(None);
        };
        let value = self.server.handle(value).map_err(stage_err(Stage::Handle))?;
        let value = self.server.convert(value).map_err(stage_err(Stage::Convert))?;
        encode(value, Stage::Convert).map(Some)
    }
}
