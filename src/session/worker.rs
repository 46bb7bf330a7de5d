//! # Session Worker
//!
//! Runs one session on a dedicated thread. Decoding an utterance can take
//! seconds on CPU; off the actix worker, that time only delays the session
//! that asked for it.
//!
//! ## Channels:
//! - **Commands** (bounded): frames and the close request, in receipt order.
//!   A full queue is the connection's signal to stop reading from the socket
//! - **Events** (unbounded): outbound JSON text, then exactly one `Closed`
//!
//! Dropping the `SessionWorker` without asking for a close ends the session
//! as a transport error, with nothing delivered.

use crate::error::{CloseReason, SendError};
use crate::session::{EventSink, Frame, FrameOutcome, OutboundMessage, Session};
use actix_web::web::Bytes;
use std::future::Future;
use std::io;
use std::thread;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Frames that may wait for the worker before the socket stops being read.
pub const COMMAND_QUEUE_DEPTH: usize = 64;

/// An inbound frame, owned so it can cross to the worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Audio(Bytes),
    Text(String),
}

impl InboundFrame {
    fn as_frame(&self) -> Frame<'_> {
        match self {
            InboundFrame::Audio(data) => Frame::Audio(data),
            InboundFrame::Text(text) => Frame::Text(text),
        }
    }
}

#[derive(Debug)]
pub enum WorkerCommand {
    Frame(InboundFrame),
    /// End the session. Without `deliver`, the final flush is computed and
    /// reported but not sent.
    Close { reason: CloseReason, deliver: bool },
}

/// Output of a session, in the order it was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A JSON text frame for the client
    Text(String),
    /// The session is closed; nothing follows
    Closed(CloseReason),
}

/// Handle to a session running on its own thread.
pub struct SessionWorker {
    commands: mpsc::Sender<WorkerCommand>,
}

impl SessionWorker {
    /// Start the worker thread. If the thread cannot be started the session
    /// is closed here, so it still reports `Disconnected`.
    pub fn spawn(mut session: Session) -> io::Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (handoff_tx, handoff_rx) = std::sync::mpsc::channel::<Session>();

        let short = session.connection().id.simple().to_string();
        let spawned = thread::Builder::new()
            .name(format!("session-{}", &short[..8]))
            .spawn(move || {
                if let Ok(session) = handoff_rx.recv() {
                    run(session, command_rx, event_tx);
                }
            });

        match spawned {
            Ok(_) => {
                let _ = handoff_tx.send(session);
                Ok((Self { commands: command_tx }, event_rx))
            }
            Err(err) => {
                session.close(
                    CloseReason::TransportClosedError(format!("session worker unavailable: {}", err)),
                    &mut DiscardSink,
                );
                Err(err)
            }
        }
    }

    /// Queue a command without waiting. A full queue hands the command back.
    pub fn try_send(&self, command: WorkerCommand) -> Result<(), WorkerCommand> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => Err(command),
            // The session already ended; its `Closed` event is on the way
            Err(TrySendError::Closed(_)) => Ok(()),
        }
    }

    /// Queue a command, waiting for room.
    pub fn send(&self, command: WorkerCommand) -> impl Future<Output = ()> + 'static {
        let commands = self.commands.clone();
        async move {
            let _ = commands.send(command).await;
        }
    }
}

fn run(
    mut session: Session,
    mut commands: mpsc::Receiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut sink = ChannelSink { events: &events };

    while let Some(command) = commands.blocking_recv() {
        match command {
            WorkerCommand::Frame(frame) => {
                if session.on_frame(frame.as_frame(), &mut sink) == FrameOutcome::Closed {
                    break;
                }
            }
            WorkerCommand::Close { reason, deliver: true } => {
                session.close(reason, &mut sink);
                break;
            }
            WorkerCommand::Close { reason, deliver: false } => {
                session.close(reason, &mut DiscardSink);
                break;
            }
        }
    }

    // No-op unless the connection went away without asking
    session.close(
        CloseReason::TransportClosedError("connection dropped".to_string()),
        &mut DiscardSink,
    );

    debug!(
        connection = %session.connection(),
        chunks_received = session.stats().chunks_received(),
        "Session worker finished"
    );

    if let Some(reason) = session.close_reason() {
        let _ = events.send(WorkerEvent::Closed(reason.clone()));
    }
}

/// Hands encoded messages to the connection actor.
struct ChannelSink<'a> {
    events: &'a mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink for ChannelSink<'_> {
    fn send(&mut self, message: &OutboundMessage) -> Result<(), SendError> {
        let text = message.to_json()?;
        self.events
            .send(WorkerEvent::Text(text))
            .map_err(|_| SendError::ChannelClosed)
    }
}

/// Sink for a connection that can no longer carry anything.
struct DiscardSink;

impl EventSink for DiscardSink {
    fn send(&mut self, _message: &OutboundMessage) -> Result<(), SendError> {
        Err(SendError::ChannelClosed)
    }
}
