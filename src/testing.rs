//! Test doubles shared by the session and WebSocket tests.

use crate::error::{RecognitionError, SendError};
use crate::session::{ConnectionId, EventSink, OutboundMessage, SessionEvent, SessionObserver};
use crate::transcription::{ModelDescriptor, Recognizer, RecognizerFactory};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// What the recognizer does on one `feed` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// No endpoint; `partial_text` returns this
    Partial(&'static str),
    /// Endpoint; the next `final_text` returns this
    Endpoint(&'static str),
    /// `feed` fails
    FeedFault,
    /// `feed` succeeds, `partial_text` fails
    PartialFault,
    /// `feed` blocks for the given time, then behaves like `Partial`
    Stall(Duration, &'static str),
}

/// Calls made on a `ScriptedRecognizer`, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// Number of samples fed
    Feed(usize),
    Partial,
    Final,
}

/// Recognizer that replays a script, one step per frame.
pub struct ScriptedRecognizer {
    steps: VecDeque<Step>,
    current: Step,
    pending_final: Option<String>,
    flush: Result<String, RecognitionError>,
    calls: Arc<Mutex<Vec<Call>>>,
    released: Arc<AtomicBool>,
}

impl ScriptedRecognizer {
    /// Frames beyond the script behave like `Step::Partial("")`.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            current: Step::Partial(""),
            pending_final: None,
            flush: Ok(String::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Text returned by `final_text` when no endpoint is pending.
    pub fn with_flush(mut self, text: &str) -> Self {
        self.flush = Ok(text.to_string());
        self
    }

    pub fn with_flush_fault(mut self) -> Self {
        self.flush = Err(RecognitionError::Decode("scripted flush fault".into()));
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }

    /// Set once the recognizer has been dropped.
    pub fn released(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Recognizer for ScriptedRecognizer {
    fn feed(&mut self, pcm: &[i16]) -> Result<bool, RecognitionError> {
        self.log(Call::Feed(pcm.len()));
        self.current = self.steps.pop_front().unwrap_or(Step::Partial(""));

        match &self.current {
            Step::FeedFault => Err(RecognitionError::Inference("scripted fault".into())),
            Step::Endpoint(text) => {
                self.pending_final = Some(text.to_string());
                Ok(true)
            }
            Step::Stall(delay, _) => {
                thread::sleep(*delay);
                Ok(false)
            }
            Step::Partial(_) | Step::PartialFault => Ok(false),
        }
    }

    fn partial_text(&mut self) -> Result<String, RecognitionError> {
        self.log(Call::Partial);
        match &self.current {
            Step::PartialFault => Err(RecognitionError::Inference("scripted fault".into())),
            Step::Partial(text) | Step::Stall(_, text) => Ok(text.to_string()),
            _ => Ok(String::new()),
        }
    }

    fn final_text(&mut self) -> Result<String, RecognitionError> {
        self.log(Call::Final);
        if let Some(text) = self.pending_final.take() {
            return Ok(text);
        }
        std::mem::replace(&mut self.flush, Ok(String::new()))
    }
}

impl Drop for ScriptedRecognizer {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out scripted recognizers.
pub struct ScriptedFactory {
    scripts: Mutex<VecDeque<ScriptedRecognizer>>,
    available: bool,
    created: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    /// Every handle is a silent `ScriptedRecognizer::new(vec![])` unless
    /// queued with `push`.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            available: true,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A factory whose `create` always fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn push(self, recognizer: ScriptedRecognizer) -> Self {
        self.scripts.lock().unwrap().push_back(recognizer);
        self
    }

    pub fn created_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.created)
    }
}

impl RecognizerFactory for ScriptedFactory {
    fn create(&self, _sample_rate: u32) -> Result<Box<dyn Recognizer>, RecognitionError> {
        if !self.available {
            return Err(RecognitionError::Unavailable("scripted factory is unavailable".into()));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        let recognizer = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedRecognizer::new(vec![]));
        Ok(Box::new(recognizer))
    }

    fn describe(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "scripted".to_string(),
            source: "memory".to_string(),
            sample_rate: 16_000,
        }
    }
}

/// Sink that records what it is asked to send, optionally failing.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Messages accepted
    pub sent: Vec<OutboundMessage>,
    /// Every message offered, accepted or not
    pub attempted: Vec<OutboundMessage>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    /// Accept `accepted` messages, then fail with `ChannelClosed`.
    pub fn failing_after(accepted: usize) -> Self {
        Self {
            fail_after: Some(accepted),
            ..Self::default()
        }
    }
}

impl EventSink for RecordingSink {
    fn send(&mut self, message: &OutboundMessage) -> Result<(), SendError> {
        self.attempted.push(message.clone());
        if self.fail_after.is_some_and(|limit| self.sent.len() >= limit) {
            return Err(SendError::ChannelClosed);
        }
        self.sent.push(message.clone());
        Ok(())
    }
}

/// Observer that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, _connection: &ConnectionId, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
