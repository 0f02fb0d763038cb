use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use agefuse_core::{
    analyze_image, model_files, summarize, DeepFaceAnalyzer, InsightFaceAnalyzer,
    DEFAULT_AGE_THRESHOLD,
};

#[derive(Parser)]
#[command(name = "agefuse", about = "Fused age estimation over local images")]
struct Cli {
    /// Directory containing the ONNX model files
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one or more images and print the batch summary as JSON
    Analyze {
        /// Image files to analyze
        files: Vec<PathBuf>,
        /// Age threshold steering the fusion re-weighting
        #[arg(long, default_value_t = DEFAULT_AGE_THRESHOLD)]
        age_threshold: f32,
        /// Also print one JSON line per image
        #[arg(long)]
        per_image: bool,
    },
    /// Check that all required model files are present
    Check,
}

const MODEL_FILES: [&str; 5] = [
    model_files::SCRFD,
    model_files::GENDERAGE,
    model_files::FACE_SSD,
    model_files::AGE_NET,
    model_files::EMOTION_NET,
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let model_dir = cli.model_dir.unwrap_or_else(agefuse_core::default_model_dir);

    match cli.command {
        Commands::Analyze {
            files,
            age_threshold,
            per_image,
        } => analyze(&model_dir, &files, age_threshold, per_image),
        Commands::Check => check(&model_dir),
    }
}

fn analyze(model_dir: &Path, files: &[PathBuf], age_threshold: f32, per_image: bool) -> Result<()> {
    if files.is_empty() {
        bail!("no image files given");
    }

    let path = |file: &str| model_dir.join(file).to_string_lossy().into_owned();

    let mut deepface = DeepFaceAnalyzer::load(
        &path(model_files::FACE_SSD),
        &path(model_files::AGE_NET),
        &path(model_files::EMOTION_NET),
    )?;
    let mut insightface =
        InsightFaceAnalyzer::load(&path(model_files::SCRFD), &path(model_files::GENDERAGE))?;

    let mut estimates = Vec::new();
    for file in files {
        let image = image::open(file)
            .with_context(|| format!("failed to open {}", file.display()))?
            .to_rgb8();

        let estimate = analyze_image(&mut deepface, &mut insightface, &image, age_threshold)
            .with_context(|| format!("analysis failed for {}", file.display()))?;

        if per_image {
            println!("{}", serde_json::to_string(&estimate)?);
        }
        estimates.push(estimate);
    }

    let summary = summarize(&estimates)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn check(model_dir: &Path) -> Result<()> {
    let mut missing = Vec::new();
    for file in MODEL_FILES {
        let path = model_dir.join(file);
        if path.exists() {
            println!("ok      {}", path.display());
        } else {
            println!("missing {}", path.display());
            missing.push(file);
        }
    }

    if !missing.is_empty() {
        bail!(
            "{} of {} model files missing from {}",
            missing.len(),
            MODEL_FILES.len(),
            model_dir.display()
        );
    }
    Ok(())
}
