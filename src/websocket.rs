//! # WebSocket Transcription Endpoint
//!
//! Accepts WebSocket connections and runs one streaming session per
//! connection. Clients connect to `/` (or `/ws`), stream raw audio as binary
//! messages and receive transcripts as JSON text messages.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: a session and its recognizer handle are created during
//!    the upgrade; if that fails the upgrade is answered with 503
//! 2. **Audio Streaming**: binary messages of 16 kHz mono 16-bit PCM
//! 3. **Transcription Results**: `{"partial": ...}` while an utterance is in
//!    progress, `{"text": ...}` when it ends
//! 4. **End of Stream**: `{"eof": 1}` or a close frame; the last utterance is
//!    flushed before the server closes
//!
//! ## Transport Policy:
//! - The server pings every `ping_interval_secs`; a client silent for longer
//!   than `ping_interval_secs + ping_timeout_secs` is dropped
//! - Frames above `max_frame_size` are rejected by the codec and the
//!   connection is closed with code 1009
//! - Fragmented messages are reassembled here, under the same size ceiling
//! - Recognition runs on a per-session thread; frames reach it in receipt
//!   order and a backlog pauses reading from the socket

use crate::error::{AppError, CloseReason};
use crate::session::{ConnectionId, InboundFrame, SessionWorker, WorkerCommand, WorkerEvent};
use crate::state::{AppState, ConnectionGauges};
use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

/// WebSocket actor connecting one socket to one session.
///
/// ## Actor Model:
/// The session runs on its own `SessionWorker` thread. The actor forwards
/// frames to it in receipt order and writes whatever it sends back, so a
/// slow decode never holds up the actix worker serving other connections.
/// When the worker falls `COMMAND_QUEUE_DEPTH` frames behind, the actor
/// stops reading the socket until it catches up.
pub struct TranscriptionSocket {
    connection: ConnectionId,
    worker: SessionWorker,
    events: Option<UnboundedReceiver<WorkerEvent>>,
    assembler: FrameAssembler,

    /// A close has been requested from the worker
    closing: bool,
    /// Close frame to answer with when the connection, not the session,
    /// decided to close
    close_frame: Option<ws::CloseReason>,

    /// Last time anything arrived from the client
    last_heartbeat: Instant,
    ping_interval: Duration,
    client_timeout: Duration,

    connections: Arc<ConnectionGauges>,
}

impl TranscriptionSocket {
    pub fn new(
        connection: ConnectionId,
        worker: SessionWorker,
        events: UnboundedReceiver<WorkerEvent>,
        state: &AppState,
    ) -> Self {
        let websocket = &state.config.websocket;
        Self {
            connection,
            worker,
            events: Some(events),
            assembler: FrameAssembler::new(websocket.max_frame_size),
            closing: false,
            close_frame: None,
            last_heartbeat: Instant::now(),
            ping_interval: websocket.ping_interval(),
            client_timeout: websocket.client_timeout(),
            connections: Arc::clone(&state.connections),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.ping_interval, |act, ctx| {
            if act.closing {
                return;
            }

            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection = %act.connection, "WebSocket keep-alive timeout, closing connection");
                act.shutdown(
                    CloseReason::TransportClosedError("keep-alive timeout".to_string()),
                    Some(ws::CloseCode::Away.into()),
                    true,
                    ctx,
                );
                return;
            }

            ctx.ping(b"");
        });
    }

    fn forward(&mut self, frame: InboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        if self.closing {
            return;
        }
        self.enqueue(WorkerCommand::Frame(frame), ctx);
    }

    /// Ask the session to close after the frames already queued.
    fn shutdown(
        &mut self,
        reason: CloseReason,
        close_frame: Option<ws::CloseReason>,
        deliver: bool,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if self.closing {
            return;
        }
        self.closing = true;
        self.close_frame = close_frame;
        self.enqueue(WorkerCommand::Close { reason, deliver }, ctx);
    }

    fn enqueue(&mut self, command: WorkerCommand, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(command) = self.worker.try_send(command) {
            debug!(connection = %self.connection, "Session worker busy, pausing reads");
            ctx.wait(self.worker.send(command).into_actor(self).map(|_, act, _| {
                // Nothing was read while waiting
                act.last_heartbeat = Instant::now();
            }));
        }
    }

    /// Transport-level failure: close the session, then the connection.
    fn abort(&mut self, cause: String, code: ws::CloseCode, ctx: &mut ws::WebsocketContext<Self>) {
        self.shutdown(
            CloseReason::TransportClosedError(cause),
            Some(code.into()),
            true,
            ctx,
        );
    }
}

impl Actor for TranscriptionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.connections.connection_opened();
        debug!(connection = %self.connection, "WebSocket connection established");

        if let Some(events) = self.events.take() {
            ctx.add_stream(UnboundedReceiverStream::new(events));
        }
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Dropping `worker` closes the session if nothing else did
        self.connections.connection_closed();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranscriptionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Binary(data)) => self.forward(InboundFrame::Audio(data), ctx),
            Ok(ws::Message::Text(text)) => self.forward(InboundFrame::Text(text.to_string()), ctx),
            Ok(ws::Message::Continuation(item)) => match self.assembler.push(item) {
                Ok(Some(Assembled::Binary(data))) => self.forward(InboundFrame::Audio(data), ctx),
                Ok(Some(Assembled::Text(text))) => self.forward(InboundFrame::Text(text), ctx),
                Ok(None) => {}
                Err(err) => {
                    let code = match err {
                        AssemblyError::TooLarge { .. } => ws::CloseCode::Size,
                        _ => ws::CloseCode::Protocol,
                    };
                    self.abort(err.to_string(), code, ctx);
                }
            },
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(connection = %self.connection, "WebSocket close frame: {:?}", reason);
                let reply = reason.unwrap_or_else(|| ws::CloseCode::Normal.into());
                self.shutdown(CloseReason::TransportClosedNormal, Some(reply), true, ctx);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                let code = match err {
                    ws::ProtocolError::Overflow => ws::CloseCode::Size,
                    _ => ws::CloseCode::Protocol,
                };
                self.abort(err.to_string(), code, ctx);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // The socket is gone; keep running until the session has closed
        self.shutdown(
            CloseReason::TransportClosedError("stream ended without close frame".to_string()),
            None,
            false,
            ctx,
        );
    }
}

impl StreamHandler<WorkerEvent> for TranscriptionSocket {
    fn handle(&mut self, event: WorkerEvent, ctx: &mut Self::Context) {
        match event {
            WorkerEvent::Text(text) => ctx.text(text),
            WorkerEvent::Closed(reason) => {
                self.closing = true;
                let frame = self.close_frame.take().unwrap_or_else(|| {
                    if reason.is_normal() {
                        ws::CloseCode::Normal.into()
                    } else {
                        ws::CloseCode::Error.into()
                    }
                });
                ctx.close(Some(frame));
                ctx.stop();
            }
        }
    }
}

/// A complete message rebuilt from continuation frames.
#[derive(Debug, PartialEq)]
enum Assembled {
    Binary(Bytes),
    Text(String),
}

#[derive(Debug, PartialEq)]
enum AssemblyError {
    /// A continuation arrived with no message in progress
    Unexpected,
    /// A new fragmented message started before the previous one finished
    Interleaved,
    TooLarge { limit: usize },
    InvalidUtf8,
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::Unexpected => write!(f, "continuation frame without a message in progress"),
            AssemblyError::Interleaved => write!(f, "fragmented message started before the previous one ended"),
            AssemblyError::TooLarge { limit } => {
                write!(f, "fragmented message exceeds {} bytes", limit)
            }
            AssemblyError::InvalidUtf8 => write!(f, "fragmented text message is not valid UTF-8"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FragmentKind {
    Binary,
    Text,
}

/// Reassembles fragmented messages, enforcing the frame size ceiling on the
/// whole message.
struct FrameAssembler {
    max_size: usize,
    kind: Option<FragmentKind>,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    fn new(max_size: usize) -> Self {
        Self {
            max_size,
            kind: None,
            buffer: Vec::new(),
        }
    }

    fn push(&mut self, item: Item) -> Result<Option<Assembled>, AssemblyError> {
        let (data, last) = match item {
            Item::FirstBinary(data) => (self.start(FragmentKind::Binary, data)?, false),
            Item::FirstText(data) => (self.start(FragmentKind::Text, data)?, false),
            Item::Continue(data) => (data, false),
            Item::Last(data) => (data, true),
        };

        if self.kind.is_none() {
            return Err(AssemblyError::Unexpected);
        }

        if self.buffer.len() + data.len() > self.max_size {
            self.reset();
            return Err(AssemblyError::TooLarge { limit: self.max_size });
        }
        self.buffer.extend_from_slice(&data);

        if !last {
            return Ok(None);
        }

        let kind = self.kind.take();
        let buffer = std::mem::take(&mut self.buffer);
        match kind {
            Some(FragmentKind::Text) => String::from_utf8(buffer)
                .map(|text| Some(Assembled::Text(text)))
                .map_err(|_| AssemblyError::InvalidUtf8),
            _ => Ok(Some(Assembled::Binary(Bytes::from(buffer)))),
        }
    }

    fn start(&mut self, kind: FragmentKind, data: Bytes) -> Result<Bytes, AssemblyError> {
        if self.kind.is_some() {
            self.reset();
            return Err(AssemblyError::Interleaved);
        }
        self.kind = Some(kind);
        Ok(data)
    }

    fn reset(&mut self) {
        self.kind = None;
        self.buffer.clear();
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// The handshake is validated first, then a session is opened for the
/// connection and started on its worker thread. A session that cannot be
/// opened or started rejects only this upgrade, with 503.
pub async fn transcription_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::handshake(&req)?;

    let connection = ConnectionId::new(req.peer_addr());
    let session = state.sessions.open(connection.clone()).map_err(|err| {
        warn!(connection = %connection, "Rejecting connection: {}", err);
        AppError::from(err)
    })?;

    let (worker, events) = SessionWorker::spawn(session).map_err(|err| {
        warn!(connection = %connection, "Rejecting connection: {}", err);
        AppError::ServiceUnavailable(format!("session worker unavailable: {}", err))
    })?;

    let actor = TranscriptionSocket::new(connection, worker, events, &state);
    ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(state.config.websocket.max_frame_size)
        .start()
}

/// Register the WebSocket routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(transcription_socket))
        .route("/ws", web::get().to(transcription_socket));
}
