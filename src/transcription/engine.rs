//! # Streaming Transcription Engine
//!
//! Turns the batch Whisper decoder into a streaming recognizer with the
//! feed / partial / final shape a session needs.
//!
//! ## Key Responsibilities:
//! - **Utterance buffering**: audio is collected from just before the first
//!   voiced window (pre-roll) until the endpoint detector closes the utterance
//! - **Partial results**: the buffered utterance is re-decoded at most once
//!   per `partial_interval_ms` of new audio; in between, the last partial is
//!   returned unchanged
//! - **Final results**: the whole utterance is decoded once and the buffer
//!   is cleared for the next one
//! - **Handle creation**: `WhisperFactory` hands every session its own
//!   decoder over the shared, read-only model

use crate::audio::pcm::{duration_ms, pcm_to_float};
use crate::config::{RecognizerConfig, SAMPLE_RATE};
use crate::error::RecognitionError;
use crate::transcription::endpoint::{Activity, EndpointDetector};
use crate::transcription::model::{WhisperAssets, WhisperDecoder};
use crate::transcription::recognizer::{ModelDescriptor, Recognizer, RecognizerFactory};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// Anything that can turn a complete buffer of float audio into text.
pub trait Transcriber: Send {
    fn transcribe(&mut self, pcm: &[f32]) -> Result<String, RecognitionError>;
}

impl Transcriber for WhisperDecoder {
    fn transcribe(&mut self, pcm: &[f32]) -> Result<String, RecognitionError> {
        WhisperDecoder::transcribe(self, pcm)
    }
}

/// A streaming recognizer built from a batch transcriber plus an endpoint
/// detector.
pub struct WhisperRecognizer<T: Transcriber = WhisperDecoder> {
    transcriber: T,
    detector: EndpointDetector,
    sample_rate: u32,

    /// Recent audio kept while idle, prepended when speech starts
    preroll: VecDeque<f32>,
    preroll_samples: usize,

    /// Audio of the utterance in progress
    utterance: Vec<f32>,
    in_utterance: bool,
    /// The detector closed the utterance; waiting for `final_text`
    ended: bool,

    partial: String,
    samples_since_partial: usize,
    partial_interval_samples: usize,
}

impl<T: Transcriber> WhisperRecognizer<T> {
    pub fn new(transcriber: T, config: &RecognizerConfig, sample_rate: u32) -> Self {
        let samples_per_ms = sample_rate as usize / 1000;

        Self {
            transcriber,
            detector: EndpointDetector::new(config, sample_rate),
            sample_rate,
            preroll: VecDeque::new(),
            preroll_samples: config.preroll_ms as usize * samples_per_ms,
            utterance: Vec::new(),
            in_utterance: false,
            ended: false,
            partial: String::new(),
            samples_since_partial: 0,
            partial_interval_samples: config.partial_interval_ms as usize * samples_per_ms,
        }
    }

    fn start_utterance(&mut self) {
        self.in_utterance = true;
        self.utterance.clear();
        self.utterance.extend(self.preroll.drain(..));
        self.samples_since_partial = self.utterance.len();
    }

    fn keep_preroll(&mut self, samples: &[f32]) {
        self.preroll.extend(samples.iter().copied());
        let excess = self.preroll.len().saturating_sub(self.preroll_samples);
        self.preroll.drain(..excess);
    }

    fn clear_utterance(&mut self) {
        self.utterance.clear();
        self.in_utterance = false;
        self.ended = false;
        self.partial.clear();
        self.samples_since_partial = 0;
    }

    fn decode(&mut self) -> Result<String, RecognitionError> {
        let started = Instant::now();
        let text = self.transcriber.transcribe(&self.utterance)?;
        debug!(
            audio_ms = duration_ms(self.utterance.len(), self.sample_rate),
            decode_ms = started.elapsed().as_millis() as u64,
            "Decoded utterance buffer"
        );
        Ok(text)
    }
}

impl<T: Transcriber> Recognizer for WhisperRecognizer<T> {
    fn feed(&mut self, pcm: &[i16]) -> Result<bool, RecognitionError> {
        let samples = pcm_to_float(pcm);
        let activity = self.detector.push(&samples);

        if self.ended {
            // Caller has not collected the previous final yet; keep the audio
            self.utterance.extend_from_slice(&samples);
            return Ok(false);
        }

        if !self.in_utterance {
            if activity == Activity::Idle {
                self.keep_preroll(&samples);
                return Ok(false);
            }
            self.start_utterance();
        } else if activity == Activity::Idle {
            // Voiced blip too short to be speech; back to waiting
            self.clear_utterance();
            self.keep_preroll(&samples);
            return Ok(false);
        }

        self.utterance.extend_from_slice(&samples);
        self.samples_since_partial += samples.len();

        if activity == Activity::Endpoint {
            self.ended = true;
            return Ok(true);
        }

        Ok(false)
    }

    fn partial_text(&mut self) -> Result<String, RecognitionError> {
        if !self.in_utterance || self.ended {
            return Ok(self.partial.clone());
        }

        if self.samples_since_partial >= self.partial_interval_samples {
            self.partial = self.decode()?;
            self.samples_since_partial = 0;
        }

        Ok(self.partial.clone())
    }

    fn final_text(&mut self) -> Result<String, RecognitionError> {
        let has_speech = self.ended || (self.in_utterance && self.detector.has_speech());

        let text = if has_speech { self.decode()? } else { String::new() };

        self.clear_utterance();
        self.detector.reset();
        Ok(text)
    }
}

/// Creates `WhisperRecognizer` handles that share one loaded model.
pub struct WhisperFactory {
    assets: Arc<WhisperAssets>,
    config: RecognizerConfig,
    /// Handles created so far; the lock is the factory's critical section
    created: Mutex<u64>,
}

impl WhisperFactory {
    pub fn new(assets: WhisperAssets, config: RecognizerConfig) -> Self {
        Self {
            assets: Arc::new(assets),
            config,
            created: Mutex::new(0),
        }
    }
}

impl RecognizerFactory for WhisperFactory {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn Recognizer>, RecognitionError> {
        if sample_rate != SAMPLE_RATE {
            return Err(RecognitionError::InvalidAudio(format!(
                "model only supports {} Hz audio, got {} Hz",
                SAMPLE_RATE, sample_rate
            )));
        }

        let mut created = self
            .created
            .lock()
            .map_err(|_| RecognitionError::Unavailable("recognizer factory lock poisoned".into()))?;

        let decoder = WhisperDecoder::new(Arc::clone(&self.assets));
        *created += 1;
        debug!(handles_created = *created, "Created recognizer handle");

        Ok(Box::new(WhisperRecognizer::new(decoder, &self.config, sample_rate)))
    }

    fn describe(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: self.assets.name().to_string(),
            source: self.assets.source().to_string(),
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Returns "words(N)" where N is the number of samples decoded.
    #[derive(Clone, Default)]
    struct CountingTranscriber {
        calls: Arc<StdMutex<Vec<usize>>>,
        fail: bool,
    }

    impl Transcriber for CountingTranscriber {
        fn transcribe(&mut self, pcm: &[f32]) -> Result<String, RecognitionError> {
            if self.fail {
                return Err(RecognitionError::Inference("device lost".into()));
            }
            self.calls.lock().unwrap().push(pcm.len());
            Ok(format!("words({})", pcm.len()))
        }
    }

    const RATE: u32 = 16_000;

    fn config() -> RecognizerConfig {
        RecognizerConfig {
            speech_threshold: 0.1,
            endpoint_silence_ms: 90,
            min_speech_ms: 60,
            partial_interval_ms: 300,
            max_utterance_secs: 5,
            preroll_ms: 60,
        }
    }

    fn tone(ms: u32) -> Vec<i16> {
        vec![16_000; (RATE * ms / 1000) as usize]
    }

    fn silence(ms: u32) -> Vec<i16> {
        vec![0; (RATE * ms / 1000) as usize]
    }

    fn recognizer() -> (WhisperRecognizer<CountingTranscriber>, Arc<StdMutex<Vec<usize>>>) {
        let transcriber = CountingTranscriber::default();
        let calls = transcriber.calls.clone();
        (WhisperRecognizer::new(transcriber, &config(), RATE), calls)
    }

    #[test]
    fn test_silence_never_decodes() {
        let (mut rec, calls) = recognizer();
        for _ in 0..10 {
            assert!(!rec.feed(&silence(100)).unwrap());
            assert_eq!(rec.partial_text().unwrap(), "");
        }
        assert_eq!(rec.final_text().unwrap(), "");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_final_without_audio_is_empty() {
        let (mut rec, calls) = recognizer();
        assert_eq!(rec.final_text().unwrap(), "");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_utterance_includes_preroll_and_endpoints() {
        let (mut rec, calls) = recognizer();
        assert!(!rec.feed(&silence(120)).unwrap());
        assert!(!rec.feed(&tone(150)).unwrap());
        assert!(rec.feed(&silence(120)).unwrap());

        // 60 ms pre-roll + 150 ms speech + 120 ms trailing silence
        let expected = (RATE as usize / 1000) * (60 + 150 + 120);
        assert_eq!(rec.final_text().unwrap(), format!("words({})", expected));
        assert_eq!(*calls.lock().unwrap(), vec![expected]);

        // The buffer was cleared
        assert_eq!(rec.final_text().unwrap(), "");
    }

    #[test]
    fn test_partials_are_throttled() {
        let (mut rec, calls) = recognizer();
        rec.feed(&tone(300)).unwrap();
        let first = rec.partial_text().unwrap();
        assert!(first.starts_with("words("));

        // Less than the partial interval of new audio: cached value, no decode
        rec.feed(&tone(100)).unwrap();
        assert_eq!(rec.partial_text().unwrap(), first);
        assert_eq!(calls.lock().unwrap().len(), 1);

        rec.feed(&tone(200)).unwrap();
        assert_ne!(rec.partial_text().unwrap(), first);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_close_flushes_unfinished_utterance() {
        let (mut rec, _) = recognizer();
        rec.feed(&tone(200)).unwrap();
        let text = rec.final_text().unwrap();
        assert!(text.starts_with("words("));
    }

    #[test]
    fn test_short_blip_is_not_finalized() {
        let (mut rec, calls) = recognizer();
        rec.feed(&tone(30)).unwrap();
        rec.feed(&silence(120)).unwrap();
        assert_eq!(rec.final_text().unwrap(), "");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_decode_errors_propagate() {
        let transcriber = CountingTranscriber { fail: true, ..Default::default() };
        let mut rec = WhisperRecognizer::new(transcriber, &config(), RATE);
        rec.feed(&tone(400)).unwrap();
        assert!(matches!(rec.partial_text(), Err(RecognitionError::Inference(_))));
        assert!(matches!(rec.final_text(), Err(RecognitionError::Inference(_))));
    }
}
