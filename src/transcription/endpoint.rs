//! # Utterance Endpoint Detection
//!
//! Energy-based voice activity tracking that decides when an utterance is
//! over. Audio is cut into fixed 30 ms windows; each window is voiced when
//! its RMS level is above the configured threshold.
//!
//! ## Endpoint Rules:
//! - Silence before any speech never ends an utterance
//! - After enough voiced audio (`min_speech_ms`), a run of trailing silence
//!   of `endpoint_silence_ms` ends it
//! - An utterance reaching `max_utterance_secs` ends regardless of silence

use crate::config::RecognizerConfig;
use tracing::debug;

/// Analysis window length.
pub const WINDOW_MS: u32 = 30;

/// Result of pushing one window through the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Nothing voiced yet in this utterance
    Idle,
    /// Inside an utterance
    Speaking,
    /// The utterance just ended on this window
    Endpoint,
}

pub struct EndpointDetector {
    window_samples: usize,
    threshold: f32,
    endpoint_silence_windows: u32,
    min_speech_windows: u32,
    max_windows: u32,

    /// Samples carried over until a full window is available
    pending: Vec<f32>,
    speech_windows: u32,
    silence_windows: u32,
    total_windows: u32,
}

impl EndpointDetector {
    pub fn new(config: &RecognizerConfig, sample_rate: u32) -> Self {
        let windows = |ms: u32| (ms as f32 / WINDOW_MS as f32).ceil().max(1.0) as u32;

        Self {
            window_samples: (sample_rate * WINDOW_MS / 1000) as usize,
            threshold: config.speech_threshold,
            endpoint_silence_windows: windows(config.endpoint_silence_ms),
            min_speech_windows: windows(config.min_speech_ms),
            max_windows: windows(config.max_utterance_secs * 1000),
            pending: Vec::new(),
            speech_windows: 0,
            silence_windows: 0,
            total_windows: 0,
        }
    }

    /// Push samples; returns `Endpoint` if any complete window ended the
    /// utterance, otherwise the activity after the last complete window.
    ///
    /// Windows after an endpoint inside the same call start the next
    /// utterance's accounting; the caller decides what to do with that audio.
    pub fn push(&mut self, samples: &[f32]) -> Activity {
        self.pending.extend_from_slice(samples);

        let mut activity = self.activity();
        let mut offset = 0;
        while self.pending.len() - offset >= self.window_samples {
            let window = &self.pending[offset..offset + self.window_samples];
            offset += self.window_samples;

            if self.push_window(rms(window)) == Activity::Endpoint {
                activity = Activity::Endpoint;
            } else if activity != Activity::Endpoint {
                activity = self.activity();
            }
        }
        self.pending.drain(..offset);

        activity
    }

    fn push_window(&mut self, level: f32) -> Activity {
        let voiced = level >= self.threshold;

        if self.speech_windows == 0 && !voiced {
            return Activity::Idle;
        }

        self.total_windows += 1;
        if voiced {
            self.speech_windows += 1;
            self.silence_windows = 0;
        } else {
            self.silence_windows += 1;
        }

        let ended_by_silence = self.speech_windows >= self.min_speech_windows
            && self.silence_windows >= self.endpoint_silence_windows;
        let ended_by_length = self.total_windows >= self.max_windows;

        if ended_by_silence || ended_by_length {
            debug!(
                speech_ms = self.speech_windows * WINDOW_MS,
                silence_ms = self.silence_windows * WINDOW_MS,
                forced = ended_by_length && !ended_by_silence,
                "Utterance endpoint detected"
            );
            self.reset_utterance();
            return Activity::Endpoint;
        }

        // A blip too short to be speech followed by a full silence run
        if self.silence_windows >= self.endpoint_silence_windows {
            self.reset_utterance();
            return Activity::Idle;
        }

        Activity::Speaking
    }

    fn activity(&self) -> Activity {
        if self.speech_windows > 0 {
            Activity::Speaking
        } else {
            Activity::Idle
        }
    }

    /// Whether the current utterance holds enough voiced audio to decode.
    pub fn has_speech(&self) -> bool {
        self.speech_windows >= self.min_speech_windows
    }

    fn reset_utterance(&mut self) {
        self.speech_windows = 0;
        self.silence_windows = 0;
        self.total_windows = 0;
    }

    /// Forget everything, including partial windows.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.reset_utterance();
    }
}

/// Root-mean-square level of a window.
pub fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let energy: f32 = window.iter().map(|s| s * s).sum();
    (energy / window.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn config() -> RecognizerConfig {
        RecognizerConfig {
            speech_threshold: 0.1,
            endpoint_silence_ms: 90,
            min_speech_ms: 60,
            partial_interval_ms: 1000,
            max_utterance_secs: 1,
            preroll_ms: 0,
        }
    }

    fn tone(ms: u32) -> Vec<f32> {
        vec![0.5; (RATE * ms / 1000) as usize]
    }

    fn silence(ms: u32) -> Vec<f32> {
        vec![0.0; (RATE * ms / 1000) as usize]
    }

    #[test]
    fn test_leading_silence_is_idle() {
        let mut detector = EndpointDetector::new(&config(), RATE);
        assert_eq!(detector.push(&silence(600)), Activity::Idle);
        assert!(!detector.has_speech());
    }

    #[test]
    fn test_speech_then_silence_endpoints_once() {
        let mut detector = EndpointDetector::new(&config(), RATE);
        assert_eq!(detector.push(&tone(120)), Activity::Speaking);
        assert!(detector.has_speech());
        assert_eq!(detector.push(&silence(90)), Activity::Endpoint);
        // Further silence does not produce a second endpoint
        assert_eq!(detector.push(&silence(300)), Activity::Idle);
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut detector = EndpointDetector::new(&config(), RATE);
        assert_eq!(detector.push(&tone(30)), Activity::Speaking);
        assert_eq!(detector.push(&silence(90)), Activity::Idle);
        assert!(!detector.has_speech());
    }

    #[test]
    fn test_partial_windows_carry_over() {
        let mut detector = EndpointDetector::new(&config(), RATE);
        // 20 ms is less than one window, nothing is decided yet
        assert_eq!(detector.push(&tone(20)), Activity::Idle);
        assert_eq!(detector.push(&tone(20)), Activity::Speaking);
    }

    #[test]
    fn test_max_length_forces_endpoint() {
        let mut detector = EndpointDetector::new(&config(), RATE);
        assert_eq!(detector.push(&tone(1020)), Activity::Endpoint);
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
