//! HTTP server setup, routing, and request handlers.

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use agefuse_core::{summarize, BatchError, BatchSummary};

/// Largest accepted multipart body.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub engine: EngineHandle,
}

/// Batch-level response for a fully successful analysis.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    final_insightface_age: f32,
    final_insightface_conf: f32,
    final_deepface_age: f32,
    final_deepface_conf: f32,
    final_fused_age: f32,
    dominant_emotion: String,
}

impl From<BatchSummary> for AnalyzeResponse {
    fn from(summary: BatchSummary) -> Self {
        Self {
            final_insightface_age: summary.insightface_age,
            final_insightface_conf: summary.insightface_conf,
            final_deepface_age: summary.deepface_age,
            final_deepface_conf: summary.deepface_conf,
            final_fused_age: summary.fused_age,
            dominant_emotion: summary.dominant_emotion,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Error, Debug)]
enum ApiError {
    #[error("Image decode failed: {0}")]
    ImageDecode(String),
    #[error("invalid multipart upload: {0}")]
    Upload(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Engine(EngineError::ChannelClosed) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(error = %self, "analyze request failed");
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "agefused".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /analyze - run both model stacks over every uploaded image and
/// return the batch aggregate. The first failing image aborts the batch;
/// no partial results are returned.
async fn analyze(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut estimates = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Upload(e.to_string()))?
    {
        if field.name() != Some("files") {
            continue;
        }

        let file_name = field.file_name().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Upload(e.to_string()))?;

        let image = image::load_from_memory(&bytes)
            .map_err(|e| {
                ApiError::ImageDecode(format!(
                    "{}: {e}",
                    file_name.as_deref().unwrap_or("upload")
                ))
            })?
            .to_rgb8();

        let estimate = ctx.engine.analyze(image).await?;
        estimates.push(estimate);
    }

    let summary = summarize(&estimates)?;
    Ok(Json(AnalyzeResponse::from(summary)))
}

/// Build the application router with the fixed CORS policy: one allowed
/// origin, mirrored methods and headers, credentials permitted.
pub fn build_router(ctx: AppContext, allowed_origin: &str) -> anyhow::Result<Router> {
    let origin: HeaderValue = allowed_origin.parse()?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

/// Bind and serve until the process is terminated.
pub async fn run(config: &Config, engine: EngineHandle) -> anyhow::Result<()> {
    let app = build_router(AppContext { engine }, &config.allowed_origin)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
