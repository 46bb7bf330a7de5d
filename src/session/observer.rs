//! # Session Observability
//!
//! Sessions report what happens to them as plain data through an injected
//! `SessionObserver`; they never log directly. `TracingObserver` is the
//! production implementation and renders every event with `tracing`.
//!
//! ## Log Levels:
//! - `info`: connect, periodic stats, final transcripts, disconnect
//! - `debug`: partial transcripts
//! - `warn`: malformed frames, failed deliveries, abnormal disconnects
//! - `error`: recognition faults

use crate::error::{CloseReason, FrameError, RecognitionError, SendError};
use crate::session::{ConnectionId, SessionStats};
use tracing::{debug, error, info, warn};

/// Something that happened to one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session was created and owns a recognizer handle
    Connected,

    /// Periodic counters snapshot
    Stats(SessionStats),

    PartialTranscript { text: String },

    FinalTranscript { text: String },

    /// A frame that was counted but not fed to the recognizer
    Anomaly(FrameError),

    /// The recognizer failed. `while_closing` faults are swallowed; the
    /// others end the session.
    Fault {
        error: RecognitionError,
        while_closing: bool,
    },

    /// An outbound message could not be handed to the transport
    DeliveryFailed {
        error: SendError,
        while_closing: bool,
    },

    /// Terminal event; the recognizer handle has been released
    Disconnected {
        reason: CloseReason,
        stats: SessionStats,
    },
}

/// Receives session lifecycle events. Shared by every session.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, connection: &ConnectionId, event: &SessionEvent);
}

/// Logs session events with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, connection: &ConnectionId, event: &SessionEvent) {
        match event {
            SessionEvent::Connected => {
                info!(connection = %connection, "Client connected");
            }
            SessionEvent::Stats(stats) => {
                info!(
                    connection = %connection,
                    chunks_received = stats.chunks_received(),
                    transcripts_sent = stats.transcripts_sent(),
                    "Session stats"
                );
            }
            SessionEvent::PartialTranscript { text } => {
                debug!(connection = %connection, partial = %text, "Partial transcript");
            }
            SessionEvent::FinalTranscript { text } => {
                info!(connection = %connection, text = %text, "Final transcript");
            }
            SessionEvent::Anomaly(err) => {
                warn!(connection = %connection, "Ignoring frame: {}", err);
            }
            SessionEvent::Fault { error: err, while_closing } => {
                error!(
                    connection = %connection,
                    while_closing = *while_closing,
                    "Recognition fault: {}",
                    err
                );
            }
            SessionEvent::DeliveryFailed { error: err, while_closing } => {
                warn!(
                    connection = %connection,
                    while_closing = *while_closing,
                    "Failed to deliver message: {}",
                    err
                );
            }
            SessionEvent::Disconnected { reason, stats } => {
                if reason.is_normal() {
                    info!(
                        connection = %connection,
                        reason = reason.as_str(),
                        chunks_received = stats.chunks_received(),
                        transcripts_sent = stats.transcripts_sent(),
                        "Client disconnected"
                    );
                } else {
                    warn!(
                        connection = %connection,
                        reason = reason.as_str(),
                        chunks_received = stats.chunks_received(),
                        transcripts_sent = stats.transcripts_sent(),
                        "Client disconnected: {}",
                        reason
                    );
                }
            }
        }
    }
}
