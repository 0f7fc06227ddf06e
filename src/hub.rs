//! HuggingFace Hub download of codec weights.
//!
//! Enable with the `hub` feature.
//!
//! # Example
//!
//! ```rust,ignore
//! use valle::hub::ModelPaths;
//!
//! let paths = ModelPaths::download(None)?;
//! let codec = valle::EncodecCodec::new(&paths.encodec_weights, 6.0, &device)?;
//! ```

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use std::path::PathBuf;

/// Default HuggingFace model IDs.
pub mod model_ids {
    /// 24 kHz EnCodec
    pub const ENCODEC_24KHZ: &str = "facebook/encodec_24khz";
}

/// Weights file inside the EnCodec repo.
pub const ENCODEC_WEIGHTS_FILE: &str = "model.safetensors";

/// Paths to downloaded model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    /// EnCodec `model.safetensors`
    pub encodec_weights: PathBuf,
}

impl ModelPaths {
    /// Download the codec weights into the HuggingFace cache.
    ///
    /// # Arguments
    ///
    /// * `model_id` - Optional repo overriding [`model_ids::ENCODEC_24KHZ`]
    pub fn download(model_id: Option<&str>) -> Result<Self> {
        let api = Api::new().context("Failed to create HuggingFace API")?;
        let model_id = model_id.unwrap_or(model_ids::ENCODEC_24KHZ);

        tracing::info!(model_id, "downloading EnCodec weights");
        let encodec_weights = api
            .model(model_id.to_string())
            .get(ENCODEC_WEIGHTS_FILE)
            .with_context(|| format!("Failed to download {ENCODEC_WEIGHTS_FILE} from {model_id}"))?;
        tracing::info!(path = %encodec_weights.display(), "download complete");

        Ok(Self { encodec_weights })
    }

    /// Download with a specific revision/branch.
    pub fn download_revision(model_id: &str, revision: &str) -> Result<Self> {
        let api = Api::new().context("Failed to create HuggingFace API")?;

        tracing::info!(model_id, revision, "downloading EnCodec weights");
        let repo = api.repo(hf_hub::Repo::with_revision(
            model_id.to_string(),
            hf_hub::RepoType::Model,
            revision.to_string(),
        ));
        let encodec_weights = repo
            .get(ENCODEC_WEIGHTS_FILE)
            .with_context(|| format!("Failed to download {ENCODEC_WEIGHTS_FILE} from {model_id}@{revision}"))?;

        Ok(Self { encodec_weights })
    }
}
