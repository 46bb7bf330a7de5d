//! # PCM Frame Decoding
//!
//! Validates and decodes raw binary WebSocket payloads into 16-bit samples.

use crate::error::FrameError;
use byteorder::{ByteOrder, LittleEndian};

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Check that a binary payload is a whole, non-empty run of 16-bit samples.
///
/// ## Validation Checks:
/// 1. **Data length**: must not be empty
/// 2. **Alignment**: must be even (two bytes per sample)
pub fn validate_frame(data: &[u8]) -> Result<(), FrameError> {
    if data.is_empty() {
        return Err(FrameError::Empty);
    }

    if data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(FrameError::Misaligned { len: data.len() });
    }

    Ok(())
}

/// Decode a validated payload into little-endian `i16` samples.
pub fn decode_frame(data: &[u8]) -> Result<Vec<i16>, FrameError> {
    validate_frame(data)?;

    let mut samples = vec![0i16; data.len() / BYTES_PER_SAMPLE];
    LittleEndian::read_i16_into(data, &mut samples);
    Ok(samples)
}

/// Scale 16-bit samples into the `[-1.0, 1.0]` float range models expect.
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Duration of `samples` at `sample_rate`, in milliseconds.
pub fn duration_ms(samples: usize, sample_rate: u32) -> u64 {
    samples as u64 * 1000 / sample_rate as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_validation() {
        assert!(validate_frame(&[0u8; 16]).is_ok());
        assert_eq!(validate_frame(&[]), Err(FrameError::Empty));
        assert_eq!(
            validate_frame(&[0u8; 15]),
            Err(FrameError::Misaligned { len: 15 })
        );
    }

    #[test]
    fn test_decode_little_endian() {
        let mut data = Vec::new();
        for sample in [0i16, 1, -1, i16::MAX, i16::MIN] {
            data.extend_from_slice(&sample.to_le_bytes());
        }

        let samples = decode_frame(&data).unwrap();
        assert_eq!(samples, vec![0, 1, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_pcm_to_float_range() {
        let floats = pcm_to_float(&[0, 16384, -16384, i16::MIN]);
        assert_eq!(floats[0], 0.0);
        assert!((floats[1] - 0.5).abs() < 1e-6);
        assert!((floats[2] + 0.5).abs() < 1e-6);
        assert_eq!(floats[3], -1.0);
    }

    #[test]
    fn test_duration() {
        assert_eq!(duration_ms(16_000, 16_000), 1000);
        assert_eq!(duration_ms(480, 16_000), 30);
    }
}
