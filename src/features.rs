/// Acoustic embedding extraction
///
/// Turns a raw mono 16kHz float buffer into a fixed-length, L2-normalized
/// embedding: Hann-windowed real FFT per frame, triangular mel filterbank
/// projection, natural-log compression, then mean+std aggregation over time.
/// The result is 128 dims (64 mel means + 64 mel stds).

use crate::audio_buffer::SAMPLE_RATE;
use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::debug;

/// Analysis frame length in samples (64 ms at 16kHz)
pub const FFT_SIZE: usize = 1024;

/// Hop between analysis frames (16 ms, 75% overlap)
pub const FRAME_HOP: usize = 256;

/// Number of mel filterbank bands
pub const N_MELS: usize = 64;

/// Mel filterbank frequency range (Hz)
pub const F_MIN: f32 = 50.0;
pub const F_MAX: f32 = 8000.0;

/// Embedding dimensionality: mean + std per mel band
pub const EMBEDDING_DIM: usize = 2 * N_MELS;

/// Added to mel energies before taking the log
const LOG_EPS: f32 = 1e-6;

/// Added to the L2 norm before dividing
const NORM_EPS: f32 = 1e-9;

/// Embedding extractor with precomputed window, FFT plan, and filterbank
///
/// `embed` is deterministic and has no side effects; all state here is
/// read-only after construction.
pub struct FeatureExtractor {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    filterbank: Vec<Vec<f32>>,
    n_fft_bins: usize,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();

        let filterbank = build_mel_filterbank(
            SAMPLE_RATE as f32,
            FFT_SIZE,
            N_MELS,
            F_MIN,
            F_MAX,
        );

        debug!(
            "Feature extractor ready: fft_size={}, hop={}, mels={}",
            FFT_SIZE, FRAME_HOP, N_MELS
        );

        Self {
            fft,
            window,
            filterbank,
            n_fft_bins: FFT_SIZE / 2 + 1,
        }
    }

    /// Compute the embedding for a raw sample buffer.
    ///
    /// Buffers shorter than one frame are zero-padded on the right, so at
    /// least one frame is always analyzed and empty input is not an error.
    /// Output is L2-normalized to unit length (plus a tiny epsilon).
    pub fn embed(&self, samples: &[f32]) -> Vec<f32> {
        let padded;
        let pcm: &[f32] = if samples.len() < FFT_SIZE {
            let mut tmp = samples.to_vec();
            tmp.resize(FFT_SIZE, 0.0);
            padded = tmp;
            &padded
        } else {
            samples
        };

        // Running per-band sums over frames; single pass, no frame history
        let mut sum = vec![0.0f32; N_MELS];
        let mut sum_sq = vec![0.0f32; N_MELS];
        let mut n_frames = 0usize;

        let mut frame = vec![0.0f32; FFT_SIZE];
        let mut spectrum = self.fft.make_output_vec();
        let mut power = vec![0.0f32; self.n_fft_bins];

        let mut start = 0;
        while start + FFT_SIZE <= pcm.len() {
            for (i, (&s, &w)) in pcm[start..start + FFT_SIZE]
                .iter()
                .zip(self.window.iter())
                .enumerate()
            {
                frame[i] = s * w;
            }

            self.fft
                .process(&mut frame, &mut spectrum)
                .expect("FFT buffers are planner-sized");

            // One-sided power spectrum. DC and Nyquist carry no imaginary
            // part and reduce to a plain square of the real component.
            power[0] = spectrum[0].re * spectrum[0].re;
            for k in 1..self.n_fft_bins - 1 {
                power[k] = spectrum[k].norm_sqr();
            }
            let nyq = spectrum[self.n_fft_bins - 1].re;
            power[self.n_fft_bins - 1] = nyq * nyq;

            for (m, row) in self.filterbank.iter().enumerate() {
                let energy: f32 = row
                    .iter()
                    .zip(power.iter())
                    .map(|(&f, &p)| f * p)
                    .sum();
                let log_energy = (energy + LOG_EPS).ln();
                sum[m] += log_energy;
                sum_sq[m] += log_energy * log_energy;
            }

            n_frames += 1;
            start += FRAME_HOP;
        }

        // Aggregate across time: mean + std per band
        let inv_t = 1.0 / n_frames as f32;
        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);
        for m in 0..N_MELS {
            embedding.push(sum[m] * inv_t);
        }
        for m in 0..N_MELS {
            let mean = sum[m] * inv_t;
            // Clamp tiny float negatives before the square root
            let var = (sum_sq[m] * inv_t - mean * mean).max(0.0);
            embedding.push(var.sqrt());
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|&x| x * x).sum::<f32>().sqrt() + NORM_EPS;
        for x in embedding.iter_mut() {
            *x /= norm;
        }

        embedding
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a triangular mel filterbank, shape `[n_mels][n_fft/2 + 1]`.
///
/// Break points are equally spaced on the mel scale between `f_min` and
/// `f_max` (clamped to Nyquist), then mapped to FFT bin indices. Filters
/// whose bin range collapses to fewer than three distinct bins stay all-zero.
pub fn build_mel_filterbank(
    sample_rate: f32,
    n_fft: usize,
    n_mels: usize,
    f_min: f32,
    f_max: f32,
) -> Vec<Vec<f32>> {
    let n_fft_bins = n_fft / 2 + 1;
    let f_min = f_min.max(0.0);
    let f_max = f_max.min(sample_rate / 2.0);

    let hz_to_mel = |f: f32| 2595.0 * (1.0 + f / 700.0).log10();
    let mel_to_hz = |m: f32| 700.0 * (10.0f32.powf(m / 2595.0) - 1.0);

    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);

    let bins: Vec<i64> = (0..n_mels + 2)
        .map(|i| {
            let mel = mel_min + i as f32 * (mel_max - mel_min) / (n_mels + 1) as f32;
            let hz = mel_to_hz(mel);
            (n_fft as f32 * hz / sample_rate).round() as i64
        })
        .collect();

    let mut filters = vec![vec![0.0f32; n_fft_bins]; n_mels];
    for m in 1..=n_mels {
        let left = bins[m - 1];
        let center = bins[m];
        let right = bins[m + 1];

        if left < center && center < right {
            for k in left..center {
                filters[m - 1][k as usize] = (k - left) as f32 / (center - left) as f32;
            }
            for k in center..right.min(n_fft_bins as i64) {
                filters[m - 1][k as usize] = (right - k) as f32 / (right - center) as f32;
            }
        }
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn generate_tone(frequency: f32, num_samples: usize, amplitude: f32) -> Vec<f32> {
        (0..num_samples)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                amplitude * (2.0 * PI * frequency * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_embedding_dimension() {
        let extractor = FeatureExtractor::new();
        let tone = generate_tone(440.0, 12800, 0.5);
        let emb = extractor.embed(&tone);
        assert_eq!(emb.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let extractor = FeatureExtractor::new();
        let tone = generate_tone(440.0, 12800, 0.5);

        let a = extractor.embed(&tone);
        let b = extractor.embed(&tone);
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedding_is_unit_norm() {
        let extractor = FeatureExtractor::new();
        let tone = generate_tone(880.0, 12800, 0.3);

        let emb = extractor.embed(&tone);
        let norm: f32 = emb.iter().map(|&x| x * x).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_short_input_zero_pads() {
        let extractor = FeatureExtractor::new();
        let short = generate_tone(440.0, FFT_SIZE - 1, 0.5);

        let mut padded = short.clone();
        padded.push(0.0);

        let a = extractor.embed(&short);
        let b = extractor.embed(&padded);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_empty_input_produces_embedding() {
        let extractor = FeatureExtractor::new();
        let emb = extractor.embed(&[]);
        assert_eq!(emb.len(), EMBEDDING_DIM);
        assert!(emb.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_distinct_tones_differ() {
        let extractor = FeatureExtractor::new();
        let low = extractor.embed(&generate_tone(200.0, 12800, 0.5));
        let high = extractor.embed(&generate_tone(4000.0, 12800, 0.5));

        let dot: f32 = low.iter().zip(high.iter()).map(|(a, b)| a * b).sum();
        assert!(dot < 0.999, "spectrally distinct tones should not align");
    }

    #[test]
    fn test_filterbank_shape_and_weights() {
        let fb = build_mel_filterbank(16000.0, 1024, 64, 50.0, 8000.0);
        assert_eq!(fb.len(), 64);
        for row in &fb {
            assert_eq!(row.len(), 513);
            assert!(row.iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
        // Most bands must carry energy somewhere
        let active = fb.iter().filter(|row| row.iter().any(|&w| w > 0.0)).count();
        assert!(active > 48);
    }

    #[test]
    fn test_filterbank_clamps_fmax_to_nyquist() {
        let fb = build_mel_filterbank(16000.0, 1024, 64, 50.0, 20000.0);
        // No filter may extend past the one-sided spectrum
        for row in &fb {
            assert_eq!(row.len(), 513);
        }
        assert!(fb.iter().any(|row| row.iter().any(|&w| w > 0.0)));
    }
}
