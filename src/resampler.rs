/// Audio resampling module
///
/// Converts arbitrary input audio to the engine's canonical format:
/// mono, 16kHz, 32-bit float PCM. Sources already in that format pass
/// through untouched; everything else goes through channel downmix and
/// sinc resampling.

use thiserror::Error;
use tracing::{debug, trace, warn};

/// Canonical sample rate expected by the detection engine (16kHz)
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Audio sample format (f32 normalized to -1.0 to 1.0)
pub type AudioSample = f32;

#[derive(Error, Debug)]
pub enum ResamplerError {
    #[error("Invalid sample rate: {0} Hz (must be > 0)")]
    InvalidSampleRate(u32),

    #[error("Invalid channel count: {0} (must be 1 or 2)")]
    InvalidChannelCount(u16),

    #[error("Resampling failed: {0}")]
    ResamplingError(String),

    #[error("Empty audio buffer")]
    EmptyBuffer,
}

/// Audio format specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// The engine's expected format (16kHz, mono)
    pub fn target() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Validate format parameters
    pub fn validate(&self) -> Result<(), ResamplerError> {
        if self.sample_rate == 0 {
            return Err(ResamplerError::InvalidSampleRate(self.sample_rate));
        }

        if self.channels == 0 || self.channels > 2 {
            return Err(ResamplerError::InvalidChannelCount(self.channels));
        }

        Ok(())
    }
}

/// Converter from a known input format to mono 16kHz float
pub struct AudioResampler {
    input_format: AudioFormat,
}

impl AudioResampler {
    pub fn new(input_format: AudioFormat) -> Result<Self, ResamplerError> {
        input_format.validate()?;

        debug!(
            "Creating resampler: {}Hz, {} channels -> {}Hz mono",
            input_format.sample_rate, input_format.channels, TARGET_SAMPLE_RATE
        );

        Ok(Self { input_format })
    }

    /// Convert interleaved input samples to mono 16kHz.
    pub fn to_mono_16k(&self, samples: &[AudioSample]) -> Result<Vec<AudioSample>, ResamplerError> {
        if samples.is_empty() {
            return Err(ResamplerError::EmptyBuffer);
        }

        trace!("Converting {} input samples", samples.len());

        let mono = if self.input_format.channels == 2 {
            self.stereo_to_mono(samples)
        } else {
            samples.to_vec()
        };

        if self.input_format.sample_rate == TARGET_SAMPLE_RATE {
            return Ok(mono);
        }

        self.resample(&mono)
    }

    /// Convert interleaved stereo to mono by averaging channels
    fn stereo_to_mono(&self, stereo: &[AudioSample]) -> Vec<AudioSample> {
        if stereo.len() % 2 != 0 {
            warn!("Stereo buffer has odd length, truncating last sample");
        }

        stereo
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect()
    }

    /// Resample mono audio to the target rate
    fn resample(&self, samples: &[AudioSample]) -> Result<Vec<AudioSample>, ResamplerError> {
        use rubato::{
            Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
            WindowFunction,
        };

        let input_rate = self.input_format.sample_rate as usize;
        let output_rate = TARGET_SAMPLE_RATE as usize;

        debug!("Resampling: {} Hz -> {} Hz", input_rate, output_rate);

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut resampler = SincFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            2.0,
            params,
            samples.len(),
            1, // mono
        )
        .map_err(|e| ResamplerError::ResamplingError(e.to_string()))?;

        let input_waves = vec![samples.to_vec()];

        let output_waves = resampler
            .process(&input_waves, None)
            .map_err(|e| ResamplerError::ResamplingError(e.to_string()))?;

        Ok(output_waves[0].clone())
    }

    /// Expected output length for a given input length
    pub fn calculate_output_length(&self, input_length: usize) -> usize {
        let frames = input_length / self.input_format.channels as usize;
        let ratio = TARGET_SAMPLE_RATE as f64 / self.input_format.sample_rate as f64;

        ((frames as f64 * ratio) as usize).max(1)
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input_format
    }
}

/// Convert i16 PCM samples to f32
pub fn i16_to_f32(samples: &[i16]) -> Vec<AudioSample> {
    samples
        .iter()
        .map(|&s| s as f32 / i16::MAX as f32)
        .collect()
}

/// Convert f32 samples to i16 PCM
pub fn f32_to_i16(samples: &[AudioSample]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            (clamped * i16::MAX as f32) as i16
        })
        .collect()
}
