//! Confidence-weighted age fusion with threshold-biased re-weighting.
//!
//! The stack whose age band matches the provisional estimate (DeepFace below
//! the threshold, InsightFace at or above it) gets its weight amplified,
//! capped so the other stack is never fully discarded.

/// Age in years below which the DeepFace estimate is treated as the more
/// reliable of the two stacks.
pub const DEFAULT_AGE_THRESHOLD: f32 = 40.0;

const BOOST_FACTOR: f32 = 1.5;
const WEIGHT_CAP: f32 = 0.8;

/// Outcome of fusing two age estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fusion {
    /// Fused age, rounded to 1 decimal.
    pub age: f32,
    /// Final DeepFace weight after re-weighting (1.0 on the fallback path).
    pub deepface_weight: f32,
    /// Final InsightFace weight after re-weighting.
    pub insightface_weight: f32,
}

/// Fuse two age estimates using confidence weights rebalanced around
/// `age_threshold`.
///
/// Never fails: a non-positive confidence total or any non-finite
/// intermediate resolves to the single-model fallback, which picks whichever
/// age sits below the threshold (DeepFace's when both or neither do).
pub fn fuse(
    deepface_age: f32,
    deepface_conf: f32,
    insightface_age: f32,
    insightface_conf: f32,
    age_threshold: f32,
) -> Fusion {
    weighted(
        deepface_age,
        deepface_conf,
        insightface_age,
        insightface_conf,
        age_threshold,
    )
    .unwrap_or_else(|| fallback(deepface_age, insightface_age, age_threshold))
}

fn weighted(
    deepface_age: f32,
    deepface_conf: f32,
    insightface_age: f32,
    insightface_conf: f32,
    age_threshold: f32,
) -> Option<Fusion> {
    let total = deepface_conf + insightface_conf;
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let mut deepface_weight = deepface_conf / total;
    let mut insightface_weight = insightface_conf / total;

    let first_pass = round1(deepface_age * deepface_weight + insightface_age * insightface_weight);
    if !first_pass.is_finite() {
        return None;
    }

    // The boosted weight is capped at 0.8 and the other side is set to one
    // minus the boosted value, whether or not it was itself boosted.
    if first_pass < age_threshold {
        deepface_weight = (deepface_weight * BOOST_FACTOR).min(WEIGHT_CAP);
        insightface_weight = 1.0 - deepface_weight;
    } else {
        insightface_weight = (insightface_weight * BOOST_FACTOR).min(WEIGHT_CAP);
        deepface_weight = 1.0 - insightface_weight;
    }

    let age = round1(deepface_age * deepface_weight + insightface_age * insightface_weight);
    if !age.is_finite() {
        return None;
    }

    Some(Fusion {
        age,
        deepface_weight,
        insightface_weight,
    })
}

/// Single-model result used when the weighted path cannot be computed.
fn fallback(deepface_age: f32, insightface_age: f32, age_threshold: f32) -> Fusion {
    if deepface_age < age_threshold {
        Fusion {
            age: deepface_age,
            deepface_weight: 1.0,
            insightface_weight: 0.0,
        }
    } else {
        Fusion {
            age: insightface_age,
            deepface_weight: 0.0,
            insightface_weight: 1.0,
        }
    }
}

fn round1(x: f32) -> f32 {
    (x * 10.0).round() / 10.0
}
