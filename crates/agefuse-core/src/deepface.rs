//! DeepFace stack: SSD face locator plus VGG-Face age and FER emotion heads.
//!
//! The locator is lenient. When nothing scores above the SSD threshold the
//! heads run over the full frame with a default face confidence, so this
//! stack produces a reading for every decodable image.

use crate::types::{AnalyzerError, FaceAnalyzer, FaceReading};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- SSD locator constants (ResNet-10, 300×300) ---
const SSD_INPUT_SIZE: usize = 300;
/// Caffe-era channel means, BGR order.
const SSD_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
const SSD_CONFIDENCE_THRESHOLD: f32 = 0.9;
/// Each detection row: [image_id, label, score, x1, y1, x2, y2].
const SSD_ROW_LEN: usize = 7;
/// Reported when the locator finds nothing and the heads run full-frame.
const DEFAULT_FACE_CONFIDENCE: f32 = 0.5;

// --- age head constants (VGG-Face, 101 buckets) ---
const AGE_INPUT_SIZE: usize = 224;
const AGE_BUCKETS: usize = 101;

// --- emotion head constants (FER, 48×48 grayscale) ---
const EMOTION_INPUT_SIZE: usize = 48;
const EMOTION_LABELS: [&str; 7] = [
    "angry", "disgust", "fear", "happy", "sad", "surprise", "neutral",
];

/// SSD locator plus age and emotion heads, all via ONNX Runtime.
pub struct DeepFaceAnalyzer {
    locator: Session,
    age_head: Session,
    emotion_head: Session,
}

impl DeepFaceAnalyzer {
    /// Load all three ONNX models from the given paths.
    pub fn load(
        locator_path: &str,
        age_path: &str,
        emotion_path: &str,
    ) -> Result<Self, AnalyzerError> {
        Ok(Self {
            locator: load_session(locator_path)?,
            age_head: load_session(age_path)?,
            emotion_head: load_session(emotion_path)?,
        })
    }

    /// Best face crop and its score, or `None` when the locator finds nothing.
    fn locate(&mut self, image: &RgbImage) -> Result<Option<(RgbImage, f32)>, AnalyzerError> {
        let input = preprocess_ssd(image);

        let outputs = self
            .locator
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, rows) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalyzerError::InferenceFailed(format!("face locator: {e}")))?;

        Ok(best_ssd_row(rows).map(|(score, corners)| (crop_to_box(image, corners), score)))
    }

    /// Expected value of the age bucket distribution, in whole years.
    fn estimate_age(&mut self, face: &RgbImage) -> Result<f32, AnalyzerError> {
        let input = preprocess_age(face);

        let outputs = self
            .age_head
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, dist) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalyzerError::InferenceFailed(format!("age head: {e}")))?;

        if dist.len() != AGE_BUCKETS {
            return Err(AnalyzerError::InferenceFailed(format!(
                "expected {AGE_BUCKETS} age buckets, got {}",
                dist.len()
            )));
        }

        Ok(apparent_age(dist))
    }

    /// Label of the strongest emotion class.
    fn classify_emotion(&mut self, face: &RgbImage) -> Result<String, AnalyzerError> {
        let input = preprocess_emotion(face);

        let outputs = self
            .emotion_head
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalyzerError::InferenceFailed(format!("emotion head: {e}")))?;

        let label = dominant_label(scores).ok_or_else(|| {
            AnalyzerError::InferenceFailed(format!(
                "expected {} emotion scores, got {}",
                EMOTION_LABELS.len(),
                scores.len()
            ))
        })?;

        Ok(label.to_string())
    }
}

impl FaceAnalyzer for DeepFaceAnalyzer {
    fn name(&self) -> &'static str {
        "DeepFace"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Option<FaceReading>, AnalyzerError> {
        let (crop, confidence) = match self.locate(image)? {
            Some((crop, score)) => (crop, score),
            None => (image.clone(), DEFAULT_FACE_CONFIDENCE),
        };

        let age = self.estimate_age(&crop)?;
        let emotion = self.classify_emotion(&crop)?;
        tracing::debug!(age, confidence, %emotion, "DeepFace reading");

        Ok(Some(FaceReading {
            age,
            confidence,
            emotion: Some(emotion),
        }))
    }
}

fn load_session(model_path: &str) -> Result<Session, AnalyzerError> {
    if !Path::new(model_path).exists() {
        return Err(AnalyzerError::ModelNotFound(model_path.to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = model_path,
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}

/// Best detection row at or above the SSD threshold: (score, corners) with
/// corners normalized to [0, 1].
fn best_ssd_row(rows: &[f32]) -> Option<(f32, [f32; 4])> {
    let mut best: Option<(f32, [f32; 4])> = None;
    for row in rows.chunks_exact(SSD_ROW_LEN) {
        let score = row[2];
        if score < SSD_CONFIDENCE_THRESHOLD {
            continue;
        }
        if best.as_ref().is_some_and(|(s, _)| score <= *s) {
            continue;
        }
        best = Some((score, [row[3], row[4], row[5], row[6]]));
    }
    best
}

/// Map normalized SSD corners to a pixel crop clamped inside the image.
fn crop_to_box(image: &RgbImage, corners: [f32; 4]) -> RgbImage {
    let (width, height) = image.dimensions();
    let x1 = ((corners[0].clamp(0.0, 1.0) * width as f32) as u32).min(width - 1);
    let y1 = ((corners[1].clamp(0.0, 1.0) * height as f32) as u32).min(height - 1);
    let x2 = ((corners[2].clamp(0.0, 1.0) * width as f32) as u32).clamp(x1 + 1, width);
    let y2 = ((corners[3].clamp(0.0, 1.0) * height as f32) as u32).clamp(y1 + 1, height);

    imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image()
}

/// Resize to the SSD input and mean-subtract in BGR channel order, matching
/// the Caffe export.
fn preprocess_ssd(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
        image,
        SSD_INPUT_SIZE as u32,
        SSD_INPUT_SIZE as u32,
        FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, 3, SSD_INPUT_SIZE, SSD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for (c, &mean) in SSD_MEAN_BGR.iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] = pixel[2 - c] as f32 - mean;
        }
    }
    tensor
}

/// Resize to the age head input, scaled to [0, 1].
fn preprocess_age(face: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
        face,
        AGE_INPUT_SIZE as u32,
        AGE_INPUT_SIZE as u32,
        FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, 3, AGE_INPUT_SIZE, AGE_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Single-channel luma input for the emotion head, scaled to [0, 1].
fn preprocess_emotion(face: &RgbImage) -> Array4<f32> {
    let gray = imageops::grayscale(face);
    let resized = imageops::resize(
        &gray,
        EMOTION_INPUT_SIZE as u32,
        EMOTION_INPUT_SIZE as u32,
        FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, 1, EMOTION_INPUT_SIZE, EMOTION_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
    }
    tensor
}

/// Expected value of the bucket distribution, in whole years. The division
/// by the total keeps the result stable for unnormalized outputs.
fn apparent_age(dist: &[f32]) -> f32 {
    let total: f32 = dist.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let expected: f32 = dist
        .iter()
        .enumerate()
        .map(|(bucket, p)| bucket as f32 * p)
        .sum::<f32>()
        / total;
    expected.round()
}

/// Label of the highest score; ties keep the earliest label.
fn dominant_label(scores: &[f32]) -> Option<&'static str> {
    if scores.len() < EMOTION_LABELS.len() {
        return None;
    }
    let mut best = 0;
    for i in 1..EMOTION_LABELS.len() {
        if scores[i] > scores[best] {
            best = i;
        }
    }
    Some(EMOTION_LABELS[best])
}
