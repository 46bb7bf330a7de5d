//! # Transcription Module
//!
//! Speech-to-text for streaming sessions, using Whisper models run with the
//! candle framework in pure Rust.
//!
//! ## Key Components:
//! - **Recognizer traits**: the only surface a session sees
//! - **Model**: loading Whisper weights, tokenizer and mel filters once
//! - **Engine**: streaming recognizer handles and the factory that creates them
//! - **Endpointing**: energy-based detection of utterance boundaries
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest, the default for live captions
//! - **base**: ~74MB
//! - **small**: ~244MB
//! - **medium**: ~769MB
//! - **large**: ~1550MB, best accuracy but far too slow on CPU for partials

pub mod endpoint;
pub mod engine;
pub mod mel;
pub mod model;
pub mod recognizer;

pub use engine::WhisperFactory;
pub use model::WhisperAssets;
pub use recognizer::{ModelDescriptor, Recognizer, RecognizerFactory};
