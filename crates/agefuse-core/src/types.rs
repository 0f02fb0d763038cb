use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors shared by both model stacks.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model file not found: {0} — place the ONNX export in models/")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One model stack's opinion about a single image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceReading {
    /// Estimated age in years.
    pub age: f32,
    /// Detection confidence in [0, 1]: certainty that a face was located,
    /// not certainty about the age value itself.
    pub confidence: f32,
    /// Dominant emotion label. Only the DeepFace stack produces one.
    pub emotion: Option<String>,
}

/// Common capability shape for the two model stacks.
///
/// `Ok(None)` means the stack ran but found no face; `Err` means the stack
/// itself failed. The per-image pipeline depends only on this trait.
pub trait FaceAnalyzer: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, image: &RgbImage) -> Result<Option<FaceReading>, AnalyzerError>;
}

/// Per-image result: both raw estimates plus their fused age.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedEstimate {
    /// Confidence-weighted, threshold-rebiased combination of the two ages,
    /// rounded to 1 decimal.
    pub fused_age: f32,
    pub deepface_age: f32,
    pub insightface_age: f32,
    pub deepface_conf: f32,
    pub insightface_conf: f32,
    pub emotion: String,
}
