use agefuse_core::model_files;
use std::path::PathBuf;

/// Daemon configuration, loaded once at startup from environment variables.
/// Everything here is a process-start-time constant.
pub struct Config {
    /// TCP port for the HTTP listener.
    pub port: u16,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Single origin allowed by the CORS policy.
    pub allowed_origin: String,
    /// Age in years below which the DeepFace estimate is weighted up during
    /// fusion.
    pub age_threshold: f32,
}

impl Config {
    /// Load configuration from `AGEFUSE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("AGEFUSE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| agefuse_core::default_model_dir());

        Self {
            port: env_u16("AGEFUSE_PORT", 8000),
            model_dir,
            allowed_origin: std::env::var("AGEFUSE_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            age_threshold: env_f32(
                "AGEFUSE_AGE_THRESHOLD",
                agefuse_core::DEFAULT_AGE_THRESHOLD,
            ),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path(model_files::SCRFD)
    }

    /// Path to the genderage attribute model.
    pub fn genderage_model_path(&self) -> String {
        self.model_path(model_files::GENDERAGE)
    }

    /// Path to the SSD face locator model.
    pub fn face_ssd_model_path(&self) -> String {
        self.model_path(model_files::FACE_SSD)
    }

    /// Path to the age head model.
    pub fn age_model_path(&self) -> String {
        self.model_path(model_files::AGE_NET)
    }

    /// Path to the emotion head model.
    pub fn emotion_model_path(&self) -> String {
        self.model_path(model_files::EMOTION_NET)
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(dir: &str) -> Config {
        Config {
            port: 8000,
            model_dir: PathBuf::from(dir),
            allowed_origin: "http://localhost:3000".to_string(),
            age_threshold: 40.0,
        }
    }

    #[test]
    fn test_model_paths_join_model_dir() {
        let config = config_at("/opt/agefuse/models");
        assert_eq!(
            config.scrfd_model_path(),
            "/opt/agefuse/models/det_10g.onnx"
        );
        assert_eq!(
            config.genderage_model_path(),
            "/opt/agefuse/models/genderage.onnx"
        );
        assert_eq!(
            config.emotion_model_path(),
            "/opt/agefuse/models/emotion_net.onnx"
        );
    }
}
