//! Per-image orchestration: both stacks in fixed order, then fusion.

use crate::fusion::fuse;
use crate::types::{FaceAnalyzer, FusedEstimate};
use image::RgbImage;
use thiserror::Error;

/// Request-level failure taxonomy. Every variant is terminal for the whole
/// batch; there are no retries. The display strings are part of the wire
/// contract with existing clients.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("DeepFace analyze failed: {0}")]
    DeepFace(String),
    #[error("No face detected with InsightFace")]
    InsightFaceNoFace,
    #[error("InsightFace failed: {0}")]
    InsightFace(String),
}

/// Run the DeepFace stack, then the InsightFace stack, over one decoded
/// image and fuse the two age estimates.
///
/// The first stack that yields no usable result fails the image; the second
/// stack is not consulted after a DeepFace failure.
pub fn analyze_image(
    deepface: &mut dyn FaceAnalyzer,
    insightface: &mut dyn FaceAnalyzer,
    image: &RgbImage,
    age_threshold: f32,
) -> Result<FusedEstimate, AnalysisError> {
    let attributes = match deepface.detect(image) {
        Ok(Some(reading)) => reading,
        Ok(None) => return Err(AnalysisError::DeepFace("no face detected".into())),
        Err(e) => return Err(AnalysisError::DeepFace(e.to_string())),
    };

    let face = match insightface.detect(image) {
        Ok(Some(reading)) => reading,
        Ok(None) => return Err(AnalysisError::InsightFaceNoFace),
        Err(e) => return Err(AnalysisError::InsightFace(e.to_string())),
    };

    let fusion = fuse(
        attributes.age,
        attributes.confidence,
        face.age,
        face.confidence,
        age_threshold,
    );
    tracing::debug!(
        fused_age = fusion.age,
        deepface_weight = fusion.deepface_weight,
        insightface_weight = fusion.insightface_weight,
        "image analyzed"
    );

    Ok(FusedEstimate {
        fused_age: fusion.age,
        deepface_age: attributes.age,
        insightface_age: face.age,
        deepface_conf: attributes.confidence,
        insightface_conf: face.confidence,
        emotion: attributes.emotion.unwrap_or_else(|| "unknown".to_string()),
    })
}
