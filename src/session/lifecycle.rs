//! # Streaming Session
//!
//! The per-connection state machine. A session owns exactly one recognizer
//! handle, feeds it frames in receipt order, turns its results into
//! transcript events and finalizes the last utterance when the connection
//! ends.
//!
//! ## Lifecycle:
//! `Active` → `Closing` → `Closed`. Only `Active` accepts frames. `Closing`
//! lasts for the final flush; once `Closed` the recognizer handle has been
//! dropped and the terminal `Disconnected` event reported.
//!
//! ## Failure Handling:
//! - Malformed frames are counted, reported and skipped
//! - A recognizer error while processing a frame closes the session with
//!   `CloseReason::Fault`, optionally after telling the client
//! - A failed send while active closes the session as a transport error
//! - During the final flush, recognizer and send errors are reported and
//!   swallowed
//!
//! The transport is reached only through `EventSink`, so the whole state
//! machine runs without a socket in tests.

use crate::audio::pcm::decode_frame;
use crate::config::SessionConfig;
use crate::error::{CloseReason, FrameError, RecognitionError, SendError};
use crate::session::{
    ConnectionId, EventSink, OutboundMessage, SessionEvent, SessionObserver, SessionStats,
    TranscriptEvent,
};
use crate::transcription::Recognizer;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// One inbound message, as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Raw 16 kHz mono 16-bit little-endian PCM
    Audio(&'a [u8]),
    /// A text message; only the end-of-stream control message means anything
    Text(&'a str),
}

/// What the transport should do after `Session::on_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Keep reading frames
    Continue,
    /// The session is no longer active; the frame was dropped
    Ignored,
    /// The session closed while handling this frame; close the connection
    Closed,
}

pub struct Session {
    connection: ConnectionId,
    state: SessionState,
    recognizer: Option<Box<dyn Recognizer>>,
    stats: SessionStats,
    settings: SessionConfig,
    observer: Arc<dyn SessionObserver>,
    close_reason: Option<CloseReason>,
}

impl Session {
    pub fn new(
        connection: ConnectionId,
        recognizer: Box<dyn Recognizer>,
        settings: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            connection,
            state: SessionState::Active,
            recognizer: Some(recognizer),
            stats: SessionStats::default(),
            settings,
            observer,
            close_reason: None,
        }
    }

    pub fn connection(&self) -> &ConnectionId {
        &self.connection
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// A copy of the counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Why the session left `Active`, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Process one inbound frame.
    ///
    /// ## Processing Steps:
    /// 1. Drop the frame if the session is no longer active
    /// 2. Count it, whatever it is
    /// 3. Audio: feed the recognizer, then emit a final (on endpoint) or a
    ///    partial; text: close on end-of-stream, otherwise report an anomaly
    /// 4. Every `stats_interval` frames, report the counters
    pub fn on_frame(&mut self, frame: Frame<'_>, sink: &mut dyn EventSink) -> FrameOutcome {
        if !self.is_active() {
            return FrameOutcome::Ignored;
        }

        let chunks = self.stats.record_chunk();

        let outcome = match frame {
            Frame::Audio(data) => match decode_frame(data) {
                Ok(pcm) => self.process_audio(&pcm, sink),
                Err(err) => {
                    self.observe(SessionEvent::Anomaly(err));
                    FrameOutcome::Continue
                }
            },
            Frame::Text(text) if is_end_of_stream(text) => {
                self.close(CloseReason::EndOfStream, sink);
                FrameOutcome::Closed
            }
            Frame::Text(text) => {
                self.observe(SessionEvent::Anomaly(FrameError::NotBinary { len: text.len() }));
                FrameOutcome::Continue
            }
        };

        if self.is_active() && chunks % self.settings.stats_interval == 0 {
            self.observe(SessionEvent::Stats(self.stats));
        }

        outcome
    }

    fn process_audio(&mut self, pcm: &[i16], sink: &mut dyn EventSink) -> FrameOutcome {
        let Some(recognizer) = self.recognizer.as_mut() else {
            return FrameOutcome::Ignored;
        };

        match recognize(recognizer.as_mut(), pcm) {
            Ok(None) => FrameOutcome::Continue,
            Ok(Some(event)) => match self.deliver(event, sink) {
                Ok(()) => FrameOutcome::Continue,
                Err(err) => {
                    let cause = err.to_string();
                    self.observe(SessionEvent::DeliveryFailed {
                        error: err,
                        while_closing: false,
                    });
                    self.close(CloseReason::TransportClosedError(cause), sink);
                    FrameOutcome::Closed
                }
            },
            Err(err) => {
                self.fail(err, sink);
                FrameOutcome::Closed
            }
        }
    }

    /// Hand a transcript to the transport and account for it.
    fn deliver(&mut self, event: TranscriptEvent, sink: &mut dyn EventSink) -> Result<(), SendError> {
        sink.send(&OutboundMessage::Transcript(event.clone()))?;

        match event {
            TranscriptEvent::Final { text } => {
                self.stats.record_transcript();
                self.observe(SessionEvent::FinalTranscript { text });
            }
            TranscriptEvent::Partial { text } => {
                self.observe(SessionEvent::PartialTranscript { text });
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: RecognitionError, sink: &mut dyn EventSink) {
        self.observe(SessionEvent::Fault {
            error: err.clone(),
            while_closing: false,
        });

        if self.settings.notify_faults {
            if let Err(send_err) = sink.send(&OutboundMessage::FaultNotice(err.to_string())) {
                self.observe(SessionEvent::DeliveryFailed {
                    error: send_err,
                    while_closing: false,
                });
            }
        }

        self.close(CloseReason::Fault(err), sink);
    }

    /// End the session: flush the last utterance, release the recognizer and
    /// report `Disconnected`. Only the first call has any effect.
    pub fn close(&mut self, reason: CloseReason, sink: &mut dyn EventSink) {
        if !self.is_active() {
            return;
        }
        self.state = SessionState::Closing;

        if let Some(mut recognizer) = self.recognizer.take() {
            match recognizer.final_text() {
                Ok(text) if !text.is_empty() => {
                    if let Err(err) = self.deliver(TranscriptEvent::Final { text }, sink) {
                        self.observe(SessionEvent::DeliveryFailed {
                            error: err,
                            while_closing: true,
                        });
                    }
                }
                Ok(_) => {}
                Err(err) => self.observe(SessionEvent::Fault {
                    error: err,
                    while_closing: true,
                }),
            }
            drop(recognizer);
        }

        self.state = SessionState::Closed;
        self.close_reason = Some(reason.clone());
        self.observe(SessionEvent::Disconnected {
            reason,
            stats: self.stats,
        });
    }

    fn observe(&self, event: SessionEvent) {
        self.observer.on_event(&self.connection, &event);
    }
}

/// Feed one frame and collect the resulting transcript, if any.
fn recognize(
    recognizer: &mut dyn Recognizer,
    pcm: &[i16],
) -> Result<Option<TranscriptEvent>, RecognitionError> {
    let event = if recognizer.feed(pcm)? {
        let text = recognizer.final_text()?;
        (!text.is_empty()).then_some(TranscriptEvent::Final { text })
    } else {
        let text = recognizer.partial_text()?;
        (!text.is_empty()).then_some(TranscriptEvent::Partial { text })
    };
    Ok(event)
}

/// `{"eof": 1}` or `{"eof": true}` asks the server to finish the stream.
pub fn is_end_of_stream(text: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return false;
    };

    match value.get("eof") {
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}
