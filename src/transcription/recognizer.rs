//! # Recognizer Interface
//!
//! The seam between a streaming session and whatever speech engine sits
//! behind it. A session only ever sees these two traits.
//!
//! ## Contract:
//! - `feed` is called with frames in the order they were received
//! - `partial_text` is only meaningful after at least one `feed`
//! - `final_text` may be called at any time, including before any audio;
//!   it returns an empty string when there is nothing to finalize and
//!   resets the handle for the next utterance
//!
//! Handles are stateful and not reentrant. Every operation takes `&mut self`,
//! so the compiler enforces the single-owner rule.

use crate::error::RecognitionError;
use serde::Serialize;

/// One stateful recognition stream.
pub trait Recognizer: Send {
    /// Consume one frame of 16 kHz mono PCM. Returns `true` when the engine
    /// decided the current utterance ended with this frame.
    fn feed(&mut self, pcm: &[i16]) -> Result<bool, RecognitionError>;

    /// Provisional text for the utterance in progress. May revise or shorten
    /// earlier partials.
    fn partial_text(&mut self) -> Result<String, RecognitionError>;

    /// Text of the pending utterance; clears it.
    fn final_text(&mut self) -> Result<String, RecognitionError>;
}

/// Creates independent recognizer handles from a loaded, read-only model.
pub trait RecognizerFactory: Send + Sync {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn Recognizer>, RecognitionError>;

    /// Static description of the loaded model, for logs and `/health`.
    fn describe(&self) -> ModelDescriptor;
}

/// What model is serving, and from where.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub source: String,
    pub sample_rate: u32,
}
