//! Batch-level aggregation of per-image fused estimates.

use crate::types::FusedEstimate;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("No images processed")]
    Empty,
}

/// Aggregate over all images in one request.
///
/// Scalar fields are arithmetic means of the per-image values, rounded to
/// 2 decimals.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub fused_age: f32,
    pub deepface_age: f32,
    pub insightface_age: f32,
    pub deepface_conf: f32,
    pub insightface_conf: f32,
    /// Most frequent emotion label across the batch; the first-seen label
    /// wins ties.
    pub dominant_emotion: String,
}

/// Collapse an ordered sequence of per-image estimates into one summary.
pub fn summarize(estimates: &[FusedEstimate]) -> Result<BatchSummary, BatchError> {
    if estimates.is_empty() {
        return Err(BatchError::Empty);
    }

    let count = estimates.len() as f32;
    let mean = |field: fn(&FusedEstimate) -> f32| {
        round2(estimates.iter().map(field).sum::<f32>() / count)
    };

    Ok(BatchSummary {
        fused_age: mean(|e| e.fused_age),
        deepface_age: mean(|e| e.deepface_age),
        insightface_age: mean(|e| e.insightface_age),
        deepface_conf: mean(|e| e.deepface_conf),
        insightface_conf: mean(|e| e.insightface_conf),
        dominant_emotion: dominant_emotion(estimates),
    })
}

/// Most frequent label; counts keep insertion order so the first-seen label
/// wins ties.
fn dominant_emotion(estimates: &[FusedEstimate]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for estimate in estimates {
        match counts.iter_mut().find(|(label, _)| *label == estimate.emotion) {
            Some((_, count)) => *count += 1,
            None => counts.push((estimate.emotion.as_str(), 1)),
        }
    }

    let mut best: (&str, usize) = ("", 0);
    for &(label, count) in &counts {
        if count > best.1 {
            best = (label, count);
        }
    }
    best.0.to_string()
}

fn round2(x: f32) -> f32 {
    (x * 100.0).round() / 100.0
}
