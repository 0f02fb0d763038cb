//! agefuse-core — Face age estimation and fusion engine.
//!
//! Runs the DeepFace attribute stack (SSD face locator plus age and emotion
//! heads) and the InsightFace stack (SCRFD detector plus genderage head) via
//! ONNX Runtime, and fuses their age estimates with a confidence-weighted,
//! threshold-rebiased average.

pub mod batch;
pub mod deepface;
pub mod fusion;
pub mod insightface;
pub mod pipeline;
pub mod types;

pub use batch::{summarize, BatchError, BatchSummary};
pub use deepface::DeepFaceAnalyzer;
pub use fusion::{fuse, Fusion, DEFAULT_AGE_THRESHOLD};
pub use insightface::InsightFaceAnalyzer;
pub use pipeline::{analyze_image, AnalysisError};
pub use types::{AnalyzerError, FaceAnalyzer, FaceReading, FusedEstimate};

use std::path::PathBuf;

/// Default directory searched for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

/// File names of the ONNX models, resolved against the model directory.
pub mod model_files {
    /// SCRFD face detector (InsightFace stack).
    pub const SCRFD: &str = "det_10g.onnx";
    /// genderage attribute head (InsightFace stack).
    pub const GENDERAGE: &str = "genderage.onnx";
    /// ResNet-10 SSD face locator (DeepFace stack).
    pub const FACE_SSD: &str = "face_ssd.onnx";
    /// 101-bucket age head (DeepFace stack).
    pub const AGE_NET: &str = "age_net.onnx";
    /// 7-class emotion head (DeepFace stack).
    pub const EMOTION_NET: &str = "emotion_net.onnx";
}
