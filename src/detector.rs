/// Streaming sound detection engine
///
/// Owns the sample ring buffer, slices fixed-size windows out of the
/// incoming stream, embeds each window, and matches it against the learned
/// prototypes with confidence thresholding and a per-label cooldown.
/// Also drives enrollment: one embedding per taught clip, folded into the
/// label's prototype with the online statistics update.

use crate::audio_buffer::{AudioBuffer, AudioSample, BUFFER_SIZE};
use crate::features::FeatureExtractor;
use crate::stats;
use crate::store::{epoch_seconds, EmbeddingLog, SoundPrototype, SoundStore};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// Analysis window: 0.8 s at 16kHz
pub const WINDOW_SIZE: usize = 12_800;

/// Outer hop equals the window: consecutive analysis windows do not
/// overlap, unlike the 75% frame overlap inside the extractor
pub const WINDOW_HOP: usize = 12_800;

/// Minimum cosine similarity for an accepted match
pub const SIMILARITY_THRESHOLD: f32 = 0.95;

/// Minimum interval between accepted matches for the same label (seconds)
pub const MIN_COOLDOWN_SECS: f64 = 2.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Enrollment requires a non-empty audio clip")]
    EmptyClip,

    #[error("Enrollment requires a non-empty label")]
    EmptyLabel,
}

/// Configuration for the detection engine
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Samples per analysis window
    pub window_size: usize,

    /// Samples removed from the buffer front per processed window
    pub window_hop: usize,

    /// Cosine similarity a best candidate must reach to match
    pub similarity_threshold: f32,

    /// Per-label suppression interval after an accepted match
    pub min_cooldown_secs: f64,

    /// Path of the JSON prototype collection
    pub store_path: PathBuf,

    /// Directory for the diagnostic embedding log; disabled when None
    pub embedding_log_dir: Option<PathBuf>,

    /// Ring buffer capacity in samples
    pub buffer_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            window_hop: WINDOW_HOP,
            similarity_threshold: SIMILARITY_THRESHOLD,
            min_cooldown_secs: MIN_COOLDOWN_SECS,
            store_path: PathBuf::from("custom_sounds.json"),
            embedding_log_dir: None,
            buffer_capacity: BUFFER_SIZE,
        }
    }
}

impl DetectorConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.window_size == 0 {
            return Err(DetectorError::InvalidConfig(
                "window_size must be greater than 0".to_string(),
            ));
        }

        if self.window_hop == 0 || self.window_hop > self.window_size {
            return Err(DetectorError::InvalidConfig(
                "window_hop must be between 1 and window_size".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DetectorError::InvalidConfig(
                "similarity_threshold must be between -1.0 and 1.0".to_string(),
            ));
        }

        if self.min_cooldown_secs < 0.0 {
            return Err(DetectorError::InvalidConfig(
                "min_cooldown_secs must not be negative".to_string(),
            ));
        }

        if self.buffer_capacity < self.window_size {
            return Err(DetectorError::InvalidConfig(
                "buffer_capacity must hold at least one window".to_string(),
            ));
        }

        Ok(())
    }
}

/// Optional label hint from an external general-purpose classifier
///
/// Used only to narrow the candidate set; confidence is informational and
/// never enters scoring or threshold decisions.
#[derive(Debug, Clone)]
pub struct SoundHint {
    pub label: String,
    pub confidence: f32,
}

/// Events emitted by the engine, in window-processing order
#[derive(Debug, Clone)]
pub enum SoundEvent {
    /// One embedding was computed for an analysis window
    EmbeddingProduced { embedding: Vec<f32> },

    /// A prototype matched above the confidence threshold
    MatchFound { label: String, similarity: f32 },
}

/// Engine statistics snapshot
#[derive(Debug, Clone)]
pub struct DetectorStats {
    pub windows_processed: u64,
    pub matches_found: u64,
    pub buffered_samples: usize,
    pub is_running: bool,
}

struct DetectorState {
    buffer: AudioBuffer,
    store: SoundStore,
    is_running: bool,
    windows_processed: u64,
    matches_found: u64,
}

/// Main detection engine
pub struct SoundDetector {
    config: DetectorConfig,
    extractor: FeatureExtractor,
    embedding_log: Option<EmbeddingLog>,
    state: Arc<RwLock<DetectorState>>,
    event_tx: mpsc::UnboundedSender<SoundEvent>,
    event_rx: Arc<RwLock<mpsc::UnboundedReceiver<SoundEvent>>>,
}

impl SoundDetector {
    /// Create a new engine in the disabled state
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorError> {
        config.validate()?;

        info!("Initializing sound detector");
        info!("Store: {:?}", config.store_path);
        info!("Similarity threshold: {}", config.similarity_threshold);
        info!("Cooldown: {}s", config.min_cooldown_secs);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let state = DetectorState {
            buffer: AudioBuffer::with_capacity(config.buffer_capacity),
            store: SoundStore::open(&config.store_path),
            is_running: false,
            windows_processed: 0,
            matches_found: 0,
        };

        let embedding_log = config
            .embedding_log_dir
            .as_ref()
            .map(EmbeddingLog::new);

        Ok(Self {
            config,
            extractor: FeatureExtractor::new(),
            embedding_log,
            state: Arc::new(RwLock::new(state)),
            event_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
        })
    }

    /// Enable detection; clears the ring buffer and window counters
    pub async fn start(&self) -> Result<(), DetectorError> {
        let mut state = self.state.write().await;

        if state.is_running {
            warn!("Detector already running");
            return Ok(());
        }

        state.buffer.clear();
        state.windows_processed = 0;
        state.matches_found = 0;
        state.is_running = true;
        info!("Sound detector started");

        Ok(())
    }

    /// Disable detection; clears the ring buffer
    pub async fn stop(&self) -> Result<(), DetectorError> {
        let mut state = self.state.write().await;

        if !state.is_running {
            warn!("Detector not running");
            return Ok(());
        }

        state.buffer.clear();
        state.is_running = false;
        info!("Sound detector stopped");

        Ok(())
    }

    /// Feed mono 16kHz float samples into the engine.
    ///
    /// A no-op while disabled. Processes as many full analysis windows as
    /// the buffered stream allows, emitting one `EmbeddingProduced` per
    /// window and a `MatchFound` for every accepted match.
    pub async fn ingest(&self, samples: &[AudioSample], hint: Option<&SoundHint>) {
        let mut state = self.state.write().await;

        if !state.is_running {
            return;
        }

        state.buffer.write(samples);

        while state.buffer.len() >= self.config.window_size {
            let chunk = state.buffer.peek(self.config.window_size);
            // hop <= window <= buffered, so this cannot underflow
            state.buffer.consume(self.config.window_hop).ok();

            let embedding = self.extractor.embed(&chunk);
            state.windows_processed += 1;
            self.send_event(SoundEvent::EmbeddingProduced {
                embedding: embedding.clone(),
            });

            if state.store.is_empty() {
                continue;
            }

            let prototypes = state.store.prototypes();
            let candidates: Vec<usize> = match hint {
                Some(h) if !h.label.trim().is_empty() => {
                    let filtered: Vec<usize> = prototypes
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| labels_related(&p.label, &h.label))
                        .map(|(i, _)| i)
                        .collect();

                    if filtered.is_empty() {
                        debug!(
                            "No prototypes relate to hint '{}' (confidence {:.2}) - skipping window",
                            h.label, h.confidence
                        );
                        continue;
                    }
                    filtered
                }
                _ => (0..prototypes.len()).collect(),
            };

            // Best candidate by cosine; strict > keeps the first on ties
            let mut best_index = None;
            let mut best_similarity = -1.0f32;
            for &i in &candidates {
                let similarity = stats::cosine(&embedding, &prototypes[i].centroid);
                if similarity > best_similarity {
                    best_similarity = similarity;
                    best_index = Some(i);
                }
            }

            let Some(best_index) = best_index else {
                continue;
            };

            if best_similarity < self.config.similarity_threshold {
                debug!(
                    "Best match '{}' only {:.2} - not confident enough",
                    prototypes[best_index].label, best_similarity
                );
                continue;
            }

            let mut matched = prototypes[best_index].clone();
            let now = epoch_seconds();
            if let Some(last) = matched.last_triggered_at {
                if now - last < self.config.min_cooldown_secs {
                    debug!("Match '{}' suppressed by cooldown", matched.label);
                    continue;
                }
            }

            matched.last_triggered_at = Some(now);
            let label = matched.label.clone();
            state.store.upsert(matched);
            state.matches_found += 1;

            info!("Matched '{}' (similarity {:.2})", label, best_similarity);
            self.send_event(SoundEvent::MatchFound {
                label,
                similarity: best_similarity,
            });
        }
    }

    /// Teach one clip for `label`, creating or updating its prototype.
    ///
    /// The whole clip becomes a single embedding; enrollment works whether
    /// or not live detection is running. Returns the updated prototype.
    pub async fn enroll(
        &self,
        label: &str,
        samples: &[AudioSample],
    ) -> Result<SoundPrototype, DetectorError> {
        if samples.is_empty() {
            return Err(DetectorError::EmptyClip);
        }

        let label = label.trim();
        if label.is_empty() {
            return Err(DetectorError::EmptyLabel);
        }

        let embedding = self.extractor.embed(samples);

        let mut state = self.state.write().await;
        let mut prototype = state
            .store
            .by_label(label)
            .cloned()
            .unwrap_or_else(|| SoundPrototype::new(label));

        if !prototype.centroid.is_empty() && prototype.centroid.len() != embedding.len() {
            warn!(
                "Stored centroid for '{}' has dimension {}, extractor produces {} - resetting statistics",
                prototype.label,
                prototype.centroid.len(),
                embedding.len()
            );
        }

        let (centroid, spread, count) = stats::update(
            &prototype.centroid,
            prototype.spread,
            prototype.count,
            &embedding,
        );
        prototype.centroid = centroid;
        prototype.spread = spread;
        prototype.count = count;

        state.store.upsert(prototype.clone());

        if let Some(log) = &self.embedding_log {
            log.append(&prototype.label, &embedding);
        }

        info!(
            "Enrolled '{}' (count={}, dim={})",
            prototype.label,
            prototype.count,
            prototype.centroid.len()
        );

        Ok(prototype)
    }

    /// Get the next engine event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<SoundEvent> {
        let mut rx = self.event_rx.write().await;
        rx.try_recv().ok()
    }

    /// Get the next engine event (blocking)
    pub async fn recv_event(&self) -> Option<SoundEvent> {
        let mut rx = self.event_rx.write().await;
        rx.recv().await
    }

    /// Get current statistics
    pub async fn stats(&self) -> DetectorStats {
        let state = self.state.read().await;

        DetectorStats {
            windows_processed: state.windows_processed,
            matches_found: state.matches_found,
            buffered_samples: state.buffer.len(),
            is_running: state.is_running,
        }
    }

    /// Snapshot of the enrolled prototypes
    pub async fn prototypes(&self) -> Vec<SoundPrototype> {
        let state = self.state.read().await;
        state.store.prototypes().to_vec()
    }

    fn send_event(&self, event: SoundEvent) {
        if let Err(e) = self.event_tx.send(event) {
            error!("Failed to send engine event: {}", e);
        }
    }
}

/// Lexical relation between an enrolled label and an external hint label.
///
/// Checks, in order: case-insensitive equality, substring containment in
/// either direction, then token overlap after splitting both on space,
/// underscore, and hyphen (tokens match by equality or containment).
fn labels_related(custom: &str, hint: &str) -> bool {
    let c = custom.trim().to_lowercase();
    let h = hint.trim().to_lowercase();

    if c.is_empty() || h.is_empty() {
        return false;
    }

    if c == h {
        return true;
    }

    if c.contains(&h) || h.contains(&c) {
        return true;
    }

    for cw in c.split([' ', '_', '-']) {
        for hw in h.split([' ', '_', '-']) {
            if !cw.is_empty() && !hw.is_empty() && (cw == hw || cw.contains(hw) || hw.contains(cw))
            {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::SPREAD_FLOOR;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;
    use tempfile::tempdir;
    use test_case::test_case;

    fn test_config(dir: &std::path::Path) -> DetectorConfig {
        DetectorConfig {
            store_path: dir.join("sounds.json"),
            embedding_log_dir: Some(dir.join("embeddings")),
            ..Default::default()
        }
    }

    fn generate_tone(frequency: f32, num_samples: usize, amplitude: f32) -> Vec<f32> {
        (0..num_samples)
            .map(|i| {
                let t = i as f32 / 16000.0;
                amplitude * (2.0 * PI * frequency * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_config_validation() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        assert!(config.validate().is_ok());

        config.window_hop = config.window_size + 1;
        assert!(config.validate().is_err());

        config.window_hop = WINDOW_HOP;
        config.similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        config.similarity_threshold = 0.95;
        config.window_size = 0;
        assert!(config.validate().is_err());
    }

    #[test_case("dog_bark", "dog" => true ; "token prefix matches")]
    #[test_case("dog_bark", "Dog Bark" => true ; "case and separator insensitive")]
    #[test_case("kettle", "kettle" => true ; "exact")]
    #[test_case("kettle_whistle", "whistling kettle" => true ; "token overlap")]
    #[test_case("door-bell", "bell" => true ; "hyphen token")]
    #[test_case("kettle", "xyz" => false ; "unrelated")]
    #[test_case("kettle", "" => false ; "empty hint")]
    #[test_case("kettle", "   " => false ; "blank hint")]
    fn test_labels_related(custom: &str, hint: &str) -> bool {
        labels_related(custom, hint)
    }

    #[tokio::test]
    async fn test_detector_starts_disabled() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();

        let stats = detector.stats().await;
        assert!(!stats.is_running);
        assert_eq!(stats.windows_processed, 0);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();

        detector.start().await.unwrap();
        detector.start().await.unwrap();
        assert!(detector.stats().await.is_running);

        detector.stop().await.unwrap();
        detector.stop().await.unwrap();
        assert!(!detector.stats().await.is_running);
    }

    #[tokio::test]
    async fn test_ingest_while_disabled_is_noop() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();

        let tone = generate_tone(440.0, WINDOW_SIZE, 0.5);
        detector.ingest(&tone, None).await;

        let stats = detector.stats().await;
        assert_eq!(stats.windows_processed, 0);
        assert_eq!(stats.buffered_samples, 0);
        assert!(detector.try_recv_event().await.is_none());
    }

    #[tokio::test]
    async fn test_enroll_rejects_empty_input() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();

        assert!(matches!(
            detector.enroll("kettle", &[]).await,
            Err(DetectorError::EmptyClip)
        ));
        assert!(matches!(
            detector.enroll("  ", &[0.1, 0.2]).await,
            Err(DetectorError::EmptyLabel)
        ));
        assert!(detector.prototypes().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_enrollment_initializes_prototype() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();

        let clip = generate_tone(440.0, 8000, 0.5);
        let proto = detector.enroll("kettle", &clip).await.unwrap();

        assert_eq!(proto.count, 1);
        assert_relative_eq!(proto.spread, SPREAD_FLOOR);
        assert_eq!(proto.centroid, FeatureExtractor::new().embed(&clip));
    }

    #[tokio::test]
    async fn test_repeated_enrollment_keeps_centroid() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();

        let clip = generate_tone(440.0, 8000, 0.5);
        let first = detector.enroll("kettle", &clip).await.unwrap();
        let second = detector.enroll("kettle", &clip).await.unwrap();
        let third = detector.enroll("KETTLE", &clip).await.unwrap();

        assert_eq!(third.count, 3);
        assert_eq!(third.id, first.id);
        assert_relative_eq!(third.spread, SPREAD_FLOOR);
        for (a, b) in first.centroid.iter().zip(third.centroid.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        assert_eq!(second.label, "kettle");
        assert_eq!(detector.prototypes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_enrollment_dimension_mismatch_resets() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        // Simulate history recorded by an extractor with another dimension
        {
            let mut store = SoundStore::open(&config.store_path);
            let mut stale = SoundPrototype::new("kettle");
            stale.centroid = vec![0.5; 32];
            stale.count = 9;
            stale.spread = 0.4;
            store.upsert(stale);
        }

        let detector = SoundDetector::new(config).unwrap();
        let clip = generate_tone(440.0, 8000, 0.5);
        let proto = detector.enroll("kettle", &clip).await.unwrap();

        assert_eq!(proto.count, 1);
        assert_relative_eq!(proto.spread, SPREAD_FLOOR);
        assert_eq!(proto.centroid.len(), crate::features::EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn test_enrollment_writes_embedding_log() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();

        let clip = generate_tone(440.0, 8000, 0.5);
        detector.enroll("kettle", &clip).await.unwrap();

        let log_file = dir.path().join("embeddings/kettle.jsonl");
        let content = std::fs::read_to_string(log_file).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_window_accounting() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();
        detector.start().await.unwrap();

        // Two and a half windows: expect exactly two processed
        let tone = generate_tone(440.0, WINDOW_SIZE * 5 / 2, 0.5);
        detector.ingest(&tone, None).await;

        let stats = detector.stats().await;
        assert_eq!(stats.windows_processed, 2);
        assert_eq!(stats.buffered_samples, WINDOW_SIZE / 2);
    }

    #[tokio::test]
    async fn test_start_clears_buffer_and_counters() {
        let dir = tempdir().unwrap();
        let detector = SoundDetector::new(test_config(dir.path())).unwrap();
        detector.start().await.unwrap();

        detector
            .ingest(&generate_tone(440.0, WINDOW_SIZE + 100, 0.5), None)
            .await;
        assert_eq!(detector.stats().await.windows_processed, 1);

        detector.stop().await.unwrap();
        detector.start().await.unwrap();

        let stats = detector.stats().await;
        assert_eq!(stats.windows_processed, 0);
        assert_eq!(stats.buffered_samples, 0);
    }
}
