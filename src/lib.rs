/// User-taught sound detection library
///
/// This library learns ad-hoc acoustic events from short user-recorded
/// clips and matches them against a live audio stream: log-mel embedding
/// extraction, online per-label prototype statistics, and a streaming
/// detection engine with confidence thresholding and cooldown.

pub mod audio_buffer;
pub mod detector;
pub mod features;
pub mod resampler;
pub mod stats;
pub mod store;

// Re-export main types
pub use audio_buffer::{AudioBuffer, AudioSample, SAMPLE_RATE};
pub use detector::{DetectorConfig, DetectorError, DetectorStats, SoundDetector, SoundEvent, SoundHint};
pub use features::{FeatureExtractor, EMBEDDING_DIM, FFT_SIZE, N_MELS};
pub use resampler::{AudioFormat, AudioResampler, ResamplerError};
pub use stats::SPREAD_FLOOR;
pub use store::{EmbeddingLog, SoundPrototype, SoundStore};
