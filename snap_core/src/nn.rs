//! Model loading and inference.
//!
//! The classifier artifact is an ONNX graph fetched once from the configured
//! base URL and cached on disk. Preprocessing matches the upstream pipeline:
//! resize to the configured square, scale raw channel values to [0, 1] by
//! dividing by 255 (no mean/std normalization), NCHW with a leading batch
//! dimension of 1. The output is an arbitrary per-class score vector; higher
//! means more confident, with no sum-to-one guarantee.

use std::path::{Path, PathBuf};

use image::RgbImage;
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use thiserror::Error;
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[TValue; 4]>;

const MODEL_FILE: &str = "model.onnx";

/// Failure to produce a usable model. Single attempt, never retried; the
/// application stays in a "no model" state and predictions refuse.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model download failed from {url}: {message}")]
    Download { url: String, message: String },
    #[error("model file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model deserialization failed: {0}")]
    Deserialize(String),
}

/// The inference seam: one frame in, one per-class score vector out.
pub trait InferModel: Send + Sync {
    fn run(&self, frame: &RgbImage) -> anyhow::Result<Vec<f32>>;
}

/// Image classifier backed by a tract-onnx plan.
pub struct OnnxClassifier {
    model: NnModel,
    image_size: u32,
}

impl OnnxClassifier {
    /// Fetch `{model_url}model.onnx` (reusing a cached copy when present)
    /// and build a runnable plan for square inputs of `image_size`.
    pub async fn load(model_url: &str, image_size: u32) -> Result<Self, ModelLoadError> {
        let path = fetch_model_file(model_url).await?;
        let model = build_plan(&path, image_size)?;
        Ok(Self { model, image_size })
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let side = self.image_size;
        let resized: RgbImage = image::imageops::resize(
            frame,
            side,
            side,
            image::imageops::FilterType::Triangle,
        );

        let side = side as usize;
        let tensor: Tensor =
            tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
                resized[(x as _, y as _)][c] as f32 / 255.0
            })
            .into();

        tensor
    }
}

impl InferModel for OnnxClassifier {
    fn run(&self, frame: &RgbImage) -> anyhow::Result<Vec<f32>> {
        let input = tvec!(self.preproc(frame).into());
        let raw_nn_out: NnOut = self.model.run(input)?;
        let scores = raw_nn_out[0]
            .to_array_view::<f32>()?
            .iter()
            .copied()
            .collect();
        // Input and output tensors are dropped here; nothing is retained
        // across predictions.
        Ok(scores)
    }
}

fn build_plan(path: &Path, image_size: u32) -> Result<NnModel, ModelLoadError> {
    let side = image_size as usize;
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side));
    tract_onnx::onnx()
        .model_for_path(path)
        .and_then(|model| model.with_input_fact(0, input_fact))
        .and_then(|model| model.into_optimized())
        .and_then(|model| model.into_runnable())
        .map_err(|e| ModelLoadError::Deserialize(e.to_string()))
}

/// Download the artifact into the cache directory, keyed by the URL digest.
async fn fetch_model_file(model_url: &str) -> Result<PathBuf, ModelLoadError> {
    let url = format!("{model_url}{MODEL_FILE}");

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("snapclass");
    std::fs::create_dir_all(&cache_dir)?;

    let digest = Sha256::digest(url.as_bytes());
    let path = cache_dir.join(format!("{}-{MODEL_FILE}", hex::encode(&digest[..8])));

    if path.exists() {
        log::info!("using cached model at {}", path.display());
        return Ok(path);
    }

    log::info!("downloading model from {url}");
    let resp = reqwest::get(&url)
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|e| ModelLoadError::Download {
            url: url.clone(),
            message: e.to_string(),
        })?;
    let content = resp.bytes().await.map_err(|e| ModelLoadError::Download {
        url: url.clone(),
        message: e.to_string(),
    })?;

    persist_artifact(&path, &content)?;
    log::info!("model stored at {}", path.display());

    Ok(path)
}

/// Write through a temp file and rename into place, so an interrupted
/// download never leaves a truncated artifact at the cache path for later
/// startups to reuse.
fn persist_artifact(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("part");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}
