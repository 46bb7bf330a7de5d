//! Slaney-scale mel filter bank matching the one Whisper was trained with
//! (`librosa.filters.mel(sr=16000, n_fft=400, n_mels=N)`).
//!
//! candle's `pcm_to_mel` takes the filters as a flat row-major
//! `n_mels x (n_fft / 2 + 1)` slice; this module builds that slice so no
//! precomputed filter file has to ship with the model.

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = 15.0;
// ln(6.4) / 27
const LOGSTEP: f64 = 0.068_751_777_420_949_12;

fn hz_to_mel(freq: f64) -> f64 {
    if freq < MIN_LOG_HZ {
        freq / F_SP
    } else {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / LOGSTEP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel < MIN_LOG_MEL {
        mel * F_SP
    } else {
        MIN_LOG_HZ * ((mel - MIN_LOG_MEL) * LOGSTEP).exp()
    }
}

/// Build the flattened filter bank covering 0 Hz up to Nyquist.
pub fn filter_bank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let f_max = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_max = hz_to_mel(f_max);
    let freq_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for m in 0..n_mels {
        let (lower, center, upper) = (freq_points[m], freq_points[m + 1], freq_points[m + 2]);
        let enorm = 2.0 / (upper - lower);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let weight = if freq >= lower && freq <= center {
                (freq - lower) / (center - lower)
            } else if freq > center && freq <= upper {
                (upper - freq) / (upper - center)
            } else {
                0.0
            };
            filters[m * n_freqs + k] = (enorm * weight) as f32;
        }
    }

    filters
}
