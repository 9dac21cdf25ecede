/// Online prototype statistics
///
/// Single-pass (Welford-style) update of a per-label centroid and a pooled
/// scalar spread, plus cosine similarity. Both are pure functions: the
/// update returns fresh values instead of mutating in place, because the
/// centroid must be advanced before the second delta is taken and aliasing
/// would silently break that ordering.

/// Smallest permitted spread; keeps downstream ratios well-defined
pub const SPREAD_FLOOR: f32 = 1e-6;

/// Fold one new embedding into `(centroid, spread, count)`.
///
/// An empty centroid means no prior samples: the new embedding becomes the
/// centroid with `count = 1` and floor spread. A dimension mismatch against
/// stored history resets the statistics the same way, discarding the old
/// centroid; the caller is expected to log that event.
///
/// Computation order is a correctness requirement: the centroid moves by
/// `delta / n` first, and the variance increment uses the *updated*
/// centroid (`inc = dot(sample - old_centroid, sample - new_centroid)`).
pub fn update(
    centroid: &[f32],
    spread: f32,
    count: u32,
    sample: &[f32],
) -> (Vec<f32>, f32, u32) {
    if centroid.is_empty() || centroid.len() != sample.len() {
        return (sample.to_vec(), SPREAD_FLOOR, 1);
    }

    let count = count + 1;
    let n = count as f32;

    let delta: Vec<f32> = sample
        .iter()
        .zip(centroid.iter())
        .map(|(&v, &c)| v - c)
        .collect();

    let new_centroid: Vec<f32> = centroid
        .iter()
        .zip(delta.iter())
        .map(|(&c, &d)| c + d / n)
        .collect();

    let inc: f32 = sample
        .iter()
        .zip(new_centroid.iter())
        .zip(delta.iter())
        .map(|((&v, &c), &d)| (v - c) * d)
        .sum();

    let spread = ((spread * (n - 1.0) + inc) / n).max(SPREAD_FLOOR);

    (new_centroid, spread, count)
}

/// Cosine similarity between two vectors.
///
/// Returns -1.0 for degenerate input: empty vectors, mismatched dimensions,
/// or an exactly zero norm.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return -1.0;
    }

    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }

    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        return -1.0;
    }
    dot / denom
}
