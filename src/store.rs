/// Prototype persistence and diagnostic embedding log
///
/// Prototypes live in memory for the session and are mirrored to a single
/// JSON file: every mutation rewrites the whole collection. Loading is
/// best effort; a missing or unreadable file just starts empty. The
/// embedding log is an append-only JSONL side channel, one file per label,
/// never read back by the matching logic.

use crate::stats::SPREAD_FLOOR;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Seconds since the Unix epoch, as used for trigger and log timestamps
pub(crate) fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

/// A learned acoustic fingerprint for one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundPrototype {
    pub id: Uuid,

    /// User-chosen label; unique case-insensitively within a store
    pub label: String,

    /// Running mean embedding; empty until the first enrollment
    pub centroid: Vec<f32>,

    /// Number of clips folded into the centroid
    pub count: u32,

    /// Pooled scalar variance proxy, never below the floor
    pub spread: f32,

    /// Epoch seconds of the last accepted match, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<f64>,
}

impl SoundPrototype {
    /// Fresh prototype with no learned statistics
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            centroid: Vec::new(),
            count: 0,
            spread: SPREAD_FLOOR,
            last_triggered_at: None,
        }
    }
}

/// Durable label → prototype collection
///
/// In-memory state is authoritative; persistence failures are logged and
/// the next mutation acts as the retry.
pub struct SoundStore {
    path: PathBuf,
    items: Vec<SoundPrototype>,
}

impl SoundStore {
    /// Open a store backed by `path`, loading whatever is readable there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<Vec<SoundPrototype>>(&data) {
                Ok(items) => {
                    info!("Loaded {} sound prototypes from {:?}", items.len(), path);
                    items
                }
                Err(e) => {
                    warn!("Unparsable prototype file {:?}: {} - starting empty", path, e);
                    Vec::new()
                }
            },
            Err(_) => {
                debug!("No prototype file at {:?} - starting empty", path);
                Vec::new()
            }
        };

        Self { path, items }
    }

    /// Rewrite the entire collection to disk.
    ///
    /// Bounded by total store size, not by the size of the change; fine
    /// for small enrolled sets.
    pub fn save(&self) {
        let data = match serde_json::to_vec(&self.items) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialize prototypes: {}", e);
                return;
            }
        };

        if let Err(e) = fs::write(&self.path, data) {
            warn!("Failed to write prototypes to {:?}: {}", self.path, e);
        }
    }

    /// Insert or replace by id, then persist.
    pub fn upsert(&mut self, prototype: SoundPrototype) {
        if let Some(existing) = self.items.iter_mut().find(|p| p.id == prototype.id) {
            *existing = prototype;
        } else {
            self.items.push(prototype);
        }
        self.save();
    }

    /// First prototype whose label matches case-insensitively.
    pub fn by_label(&self, label: &str) -> Option<&SoundPrototype> {
        self.items.iter().find(|p| p.label.eq_ignore_ascii_case(label))
    }

    /// All prototypes, in insertion order.
    pub fn prototypes(&self) -> &[SoundPrototype] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One diagnostic embedding record
#[derive(Debug, Serialize)]
struct LabeledEmbedding<'a> {
    label: &'a str,
    vector: &'a [f32],
    ts: f64,
}

/// Append-only per-label embedding log (diagnostics only)
pub struct EmbeddingLog {
    dir: PathBuf,
}

impl EmbeddingLog {
    /// Create a log rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create embedding log dir {:?}: {}", dir, e);
        }
        Self { dir }
    }

    /// Append one record to `<label>.jsonl`. Failures are logged and ignored.
    pub fn append(&self, label: &str, vector: &[f32]) {
        let record = LabeledEmbedding {
            label,
            vector,
            ts: epoch_seconds(),
        };

        if let Err(e) = self.try_append(label, &record) {
            warn!("Embedding log write failed for '{}': {}", label, e);
        }
    }

    fn try_append(&self, label: &str, record: &LabeledEmbedding<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = self.path_for(label);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&line)
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", label))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
