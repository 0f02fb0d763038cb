//! Inference engine: both model stacks on one dedicated OS thread behind an
//! mpsc request loop. HTTP handlers hold a clonable [`EngineHandle`] and
//! await replies over oneshot channels, so requests serialize through the
//! models without any shared mutable state.

use agefuse_core::{
    analyze_image, AnalysisError, AnalyzerError, DeepFaceAnalyzer, FaceAnalyzer, FusedEstimate,
    InsightFaceAnalyzer,
};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Analyze {
        image: RgbImage,
        reply: oneshot::Sender<Result<FusedEstimate, AnalysisError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run both model stacks over one decoded image and fuse the results.
    pub async fn analyze(&self, image: RgbImage) -> Result<FusedEstimate, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Load both model stacks and spawn the inference thread. Fails fast at
/// startup when a model file is missing or malformed.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, AnalyzerError> {
    let deepface = DeepFaceAnalyzer::load(
        &config.face_ssd_model_path(),
        &config.age_model_path(),
        &config.emotion_model_path(),
    )?;
    tracing::info!("DeepFace stack loaded");

    let insightface =
        InsightFaceAnalyzer::load(&config.scrfd_model_path(), &config.genderage_model_path())?;
    tracing::info!("InsightFace stack loaded");

    Ok(spawn_with_analyzers(
        Box::new(deepface),
        Box::new(insightface),
        config.age_threshold,
    ))
}

/// Spawn the inference thread over any pair of analyzers.
pub fn spawn_with_analyzers(
    mut deepface: Box<dyn FaceAnalyzer>,
    mut insightface: Box<dyn FaceAnalyzer>,
    age_threshold: f32,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("agefuse-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { image, reply } => {
                        let result = analyze_image(
                            deepface.as_mut(),
                            insightface.as_mut(),
                            &image,
                            age_threshold,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}
