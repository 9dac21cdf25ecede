/// Sound detection service binary
///
/// Demo driver for the detection engine working off WAV files:
///   sound-detector-service teach <label> <clip.wav>
///   sound-detector-service listen <audio.wav>

use anyhow::{bail, Context, Result};
use sound_detector::resampler::i16_to_f32;
use sound_detector::{
    AudioFormat, AudioResampler, DetectorConfig, SoundDetector, SoundEvent,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sound_detector=debug".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = load_config()?;
    let detector = SoundDetector::new(config)?;

    match args.as_slice() {
        [cmd, label, path] if cmd == "teach" => teach(&detector, label, Path::new(path)).await,
        [cmd, path] if cmd == "listen" => listen(&detector, Path::new(path)).await,
        _ => {
            eprintln!("Usage: sound-detector-service teach <label> <clip.wav>");
            eprintln!("       sound-detector-service listen <audio.wav>");
            std::process::exit(2);
        }
    }
}

/// Load configuration from the environment
fn load_config() -> Result<DetectorConfig> {
    let store_path = std::env::var("SOUND_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("custom_sounds.json"));

    let embedding_log_dir = std::env::var("EMBEDDING_LOG_DIR").ok().map(PathBuf::from);

    let similarity_threshold = std::env::var("SIMILARITY_THRESHOLD")
        .unwrap_or_else(|_| "0.95".to_string())
        .parse::<f32>()
        .context("SIMILARITY_THRESHOLD must be a float")?;

    Ok(DetectorConfig {
        store_path,
        embedding_log_dir,
        similarity_threshold,
        ..Default::default()
    })
}

/// Enroll one WAV clip under a label
async fn teach(detector: &SoundDetector, label: &str, path: &Path) -> Result<()> {
    let samples = read_wav_mono_16k(path)?;
    info!("Teaching '{}' from {:?} ({} samples)", label, path, samples.len());

    let proto = detector.enroll(label, &samples).await?;
    println!(
        "Enrolled '{}': count={}, spread={:.6}",
        proto.label, proto.count, proto.spread
    );

    Ok(())
}

/// Stream one WAV file through the live detection path
async fn listen(detector: &SoundDetector, path: &Path) -> Result<()> {
    let samples = read_wav_mono_16k(path)?;
    info!("Listening through {:?} ({} samples)", path, samples.len());

    detector.start().await?;

    // Feed in mic-sized chunks to mimic live capture
    for chunk in samples.chunks(1024) {
        detector.ingest(chunk, None).await;
    }

    let mut windows = 0usize;
    while let Some(event) = detector.try_recv_event().await {
        match event {
            SoundEvent::EmbeddingProduced { .. } => windows += 1,
            SoundEvent::MatchFound { label, similarity } => {
                println!("MATCH: '{}' (similarity {:.2})", label, similarity);
            }
        }
    }
    println!("Processed {} analysis windows", windows);

    detector.stop().await?;
    Ok(())
}

/// Decode a WAV file and convert it to mono 16kHz float
fn read_wav_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {:?}", path))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.channels > 2 {
        bail!("unsupported channel count: {}", spec.channels);
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("failed to decode float samples")?,
        hound::SampleFormat::Int => {
            let ints: Vec<i16> = reader
                .samples::<i16>()
                .collect::<Result<_, _>>()
                .context("failed to decode integer samples")?;
            i16_to_f32(&ints)
        }
    };

    let format = AudioFormat::new(spec.sample_rate, spec.channels);
    if format == AudioFormat::target() {
        return Ok(samples);
    }

    warn!(
        "Input is {}Hz/{}ch, converting to mono 16kHz",
        spec.sample_rate, spec.channels
    );
    let resampler = AudioResampler::new(format)?;
    Ok(resampler.to_mono_16k(&samples)?)
}
