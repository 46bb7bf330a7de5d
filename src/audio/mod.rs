//! # Audio Module
//!
//! Wire-format handling for the audio clients stream in.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers, no container or header
//!
//! No resampling or format conversion happens here; frames in any other shape
//! are rejected before they reach the recognizer.

pub mod pcm;
