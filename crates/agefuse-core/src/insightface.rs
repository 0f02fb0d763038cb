//! InsightFace stack: SCRFD face detection plus the genderage attribute head.
//!
//! Detection reduces to the single best-scoring box: this stack only has to
//! answer where the face is and how sure it is; the age comes from the
//! genderage head run over the face crop. No face above threshold means no
//! result, which callers treat as "no face detected".

use crate::types::{AnalyzerError, FaceAnalyzer, FaceReading};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- SCRFD detection constants ---
const DET_INPUT_SIZE: usize = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;
/// Output tensor layout: [0-2] = scores, [3-5] = bboxes per stride 8/16/32.
/// The landmark tensors that follow are unused here.
const DET_MIN_OUTPUTS: usize = 6;

// --- genderage attribute head constants ---
const ATTR_INPUT_SIZE: usize = 96;
/// genderage emits [gender_f, gender_m, age/100]; age is the third value.
const ATTR_AGE_INDEX: usize = 2;
const ATTR_AGE_SCALE: f32 = 100.0;
/// Margin applied around the detected box before the attribute crop.
const ATTR_CROP_MARGIN: f32 = 1.25;

/// Best-scoring detection, corners in original image coordinates.
#[derive(Debug, Clone, PartialEq)]
struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// SCRFD detector plus genderage head, both via ONNX Runtime.
pub struct InsightFaceAnalyzer {
    detector: Session,
    genderage: Session,
}

impl InsightFaceAnalyzer {
    /// Load both ONNX models from the given paths.
    pub fn load(detector_path: &str, genderage_path: &str) -> Result<Self, AnalyzerError> {
        let detector = load_session(detector_path)?;

        let num_outputs = detector.outputs().len();
        if num_outputs < DET_MIN_OUTPUTS {
            return Err(AnalyzerError::InferenceFailed(format!(
                "SCRFD model requires at least {DET_MIN_OUTPUTS} outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        let genderage = load_session(genderage_path)?;

        Ok(Self {
            detector,
            genderage,
        })
    }

    /// Highest-scoring face across all stride levels, if any.
    fn best_face(&mut self, image: &RgbImage) -> Result<Option<Detection>, AnalyzerError> {
        let (input, letterbox) = preprocess_letterbox(image);

        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut best: Option<Detection> = None;
        for (stride_pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[stride_pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    AnalyzerError::InferenceFailed(format!("scores stride {stride}: {e}"))
                })?;
            let (_, bboxes) = outputs[stride_pos + DET_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    AnalyzerError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
                })?;

            if let Some(det) = best_at_stride(scores, bboxes, stride, &letterbox) {
                if best.as_ref().map_or(true, |b| det.score > b.score) {
                    best = Some(det);
                }
            }
        }

        Ok(best)
    }

    /// Run the genderage head over the face crop and scale its age output.
    fn estimate_age(&mut self, image: &RgbImage, face: &Detection) -> Result<f32, AnalyzerError> {
        let crop = square_crop(image, face);
        let resized = imageops::resize(
            &crop,
            ATTR_INPUT_SIZE as u32,
            ATTR_INPUT_SIZE as u32,
            FilterType::Triangle,
        );

        // genderage takes raw pixel values, no normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, ATTR_INPUT_SIZE, ATTR_INPUT_SIZE));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32;
            }
        }

        let outputs = self
            .genderage
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let (_, pred) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalyzerError::InferenceFailed(format!("genderage: {e}")))?;

        let age = pred.get(ATTR_AGE_INDEX).copied().ok_or_else(|| {
            AnalyzerError::InferenceFailed(format!(
                "genderage output too short: {} values",
                pred.len()
            ))
        })?;

        Ok((age * ATTR_AGE_SCALE).round())
    }
}

impl FaceAnalyzer for InsightFaceAnalyzer {
    fn name(&self) -> &'static str {
        "InsightFace"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Option<FaceReading>, AnalyzerError> {
        let Some(face) = self.best_face(image)? else {
            return Ok(None);
        };

        let age = self.estimate_age(image, &face)?;
        tracing::debug!(age, score = face.score, "InsightFace reading");

        Ok(Some(FaceReading {
            age,
            confidence: face.score,
            emotion: None,
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

/// Resize into the detector input with aspect-preserving padding, normalized
/// to the SCRFD input distribution. Zeroed tensor cells equal the normalized
/// mean, so the padding needs no separate fill.
fn preprocess_letterbox(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (DET_INPUT_SIZE as f32 / width as f32).min(DET_INPUT_SIZE as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, DET_INPUT_SIZE as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, DET_INPUT_SIZE as u32);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (DET_INPUT_SIZE as u32 - new_w) / 2;
    let pad_y = (DET_INPUT_SIZE as u32 - new_h) / 2;

    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - DET_MEAN) / DET_STD;
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Scan one stride's anchors for the best box above threshold, mapped back to
/// original image coordinates.
fn best_at_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Option<Detection> {
    let grid = DET_INPUT_SIZE / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    let mut best: Option<Detection> = None;
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_CONFIDENCE_THRESHOLD {
            continue;
        }
        if best.as_ref().is_some_and(|b| score <= b.score) {
            continue;
        }

        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }

        let anchor_idx = idx / DET_ANCHORS_PER_CELL;
        let cx = ((anchor_idx % grid) * stride) as f32;
        let cy = ((anchor_idx / grid) * stride) as f32;

        // Offsets are in stride units: [left, top, right, bottom] from the
        // anchor center.
        let x1 = cx - bboxes[bbox_off] * stride as f32;
        let y1 = cy - bboxes[bbox_off + 1] * stride as f32;
        let x2 = cx + bboxes[bbox_off + 2] * stride as f32;
        let y2 = cy + bboxes[bbox_off + 3] * stride as f32;

        best = Some(Detection {
            x1: (x1 - letterbox.pad_x) / letterbox.scale,
            y1: (y1 - letterbox.pad_y) / letterbox.scale,
            x2: (x2 - letterbox.pad_x) / letterbox.scale,
            y2: (y2 - letterbox.pad_y) / letterbox.scale,
            score,
        });
    }

    best
}

/// Square crop around the detection center, side scaled by the attribute
/// margin and clamped to the image bounds.
fn square_crop(image: &RgbImage, face: &Detection) -> RgbImage {
    let (width, height) = image.dimensions();
    let cx = (face.x1 + face.x2) / 2.0;
    let cy = (face.y1 + face.y2) / 2.0;
    let side = ((face.x2 - face.x1).max(face.y2 - face.y1) * ATTR_CROP_MARGIN).max(1.0);

    let x0 = (cx - side / 2.0).floor().clamp(0.0, (width - 1) as f32) as u32;
    let y0 = (cy - side / 2.0).floor().clamp(0.0, (height - 1) as f32) as u32;
    let w = (side as u32).max(1).min(width - x0);
    let h = (side as u32).max(1).min(height - y0);

    imageops::crop_imm(image, x0, y0, w, h).to_image()
}
