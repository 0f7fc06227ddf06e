//! # valle
//!
//! Building blocks for VALL-E style text-to-speech on top of
//! [candle](https://github.com/huggingface/candle): a decoder-only language
//! model predicts neural codec tokens from text tokens, and a codec turns
//! those tokens back into audio.
//!
//! ## Features
//!
//! - **Masks** for the prefix-LM attention pattern and padded batches
//! - **Sampling** with temperature, top-k and nucleus filtering plus the
//!   log-probability of every draw
//! - **Beam selection** by length-normalized log-probability
//! - **Decode loop** over any [`generation::AutoregressiveModel`]
//! - **Data pipeline**: audio normalization, EnCodec encoding, BOS/EOS
//!   collation and a seeded batch loader
//! - **CUDA** / **Metal** / MKL / Accelerate through candle feature flags
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use valle::generation::{generate, SamplingContext};
//! use valle::ValleConfig;
//!
//! let config = ValleConfig::from_file("valle.json")?;
//! let mut ctx = SamplingContext::new(config.seed);
//! let codes = generate(&mut model, &text_tokens, &config.to_gen_config(), &mut ctx)?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Text prefix**: text tokens attend to each other bidirectionally.
//! 2. **Audio suffix**: first-codebook tokens attend to the whole text and
//!    causally to earlier audio ([`masks::build_attn_mask`]).
//! 3. **Codec**: 24 kHz EnCodec ([`codec::EncodecCodec`]) maps waveforms to
//!    `[n_q, frames]` grids at 75 frames per second.
//!
//! ## Conventions
//!
//! Masks are `U8` tensors where `1` marks a masked position. Token tensors
//! are `U32`, lengths `I64`, logits and log-probabilities `F32`.

pub mod audio;
pub mod codec;
pub mod config;
pub mod data;
pub mod error;
pub mod generation;
#[cfg(feature = "hub")]
pub mod hub;
pub mod masks;
pub mod profiling;

use anyhow::Result as AnyResult;
use candle_core::{DType, Device};

pub use audio::AudioBuffer;
pub use codec::{AudioCodec, EncodecCodec};
pub use config::ValleConfig;
pub use data::{DataLoader, Split, ValleArCollate, ValleBatch, ValleDataset, ValleItem};
pub use error::{Result, ValleError};
pub use generation::{
    generate, get_best_beam, topk_sampling, AutoregressiveModel, GenerationConfig,
    SamplingContext, SamplingParams,
};
#[cfg(feature = "hub")]
pub use hub::ModelPaths;
pub use masks::{build_attn_mask, build_pad_mask};

/// Beginning-of-audio token (one past the 1024-entry EnCodec codebook).
pub const BOS_TOKEN: u32 = 1024;

/// End-of-audio token.
pub const EOS_TOKEN: u32 = 1025;

/// Padding token for collated batches.
pub const PAD_TOKEN: u32 = 0;

/// Select the best available compute device.
///
/// Checks for available hardware in order: CUDA → Metal → CPU.
///
/// # Feature Flags
///
/// - `cuda`: Enables NVIDIA GPU support
/// - `metal`: Enables Apple Silicon GPU support
pub fn auto_device() -> AnyResult<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse a device string into a [`Device`].
///
/// Supported formats:
/// - `"auto"`: best available via [`auto_device`]
/// - `"cpu"`
/// - `"cuda"` / `"cuda:N"`
/// - `"metal"`
///
/// # Errors
///
/// Returns an error if the string is unrecognized, the backend wasn't
/// compiled in, or hardware initialization fails.
pub fn parse_device(device_str: &str) -> AnyResult<Device> {
    match device_str.to_lowercase().as_str() {
        "auto" => auto_device(),
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = match s.strip_prefix("cuda:") {
                    Some(idx) => idx
                        .parse()
                        .map_err(|e| anyhow::anyhow!("invalid CUDA device index: {e}"))?,
                    None if s == "cuda" => 0,
                    None => anyhow::bail!("unknown device '{s}'"),
                };
                Device::cuda_if_available(ordinal)
                    .map_err(|e| anyhow::anyhow!("failed to init CUDA device {ordinal}: {e}"))
            }
            #[cfg(not(feature = "cuda"))]
            anyhow::bail!("CUDA support not compiled in. Rebuild with: cargo build --features cuda")
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0)
                    .map_err(|e| anyhow::anyhow!("failed to init Metal device: {e}"))
            }
            #[cfg(not(feature = "metal"))]
            anyhow::bail!(
                "Metal support not compiled in. Rebuild with: cargo build --features metal"
            )
        }
        other => {
            anyhow::bail!("unknown device '{other}'. Supported: auto, cpu, cuda, cuda:N, metal")
        }
    }
}

/// Human-readable label for a [`Device`].
pub fn device_info(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA".to_string(),
        Device::Metal(_) => "Metal".to_string(),
    }
}

/// Recommended dtype for model weights and activations on `device`.
///
/// `BF16` on CUDA/Metal, `F32` on CPU. Sampling and masks always work in
/// their own fixed dtypes regardless of this choice.
pub fn compute_dtype_for_device(device: &Device) -> DType {
    if device.is_cuda() || device.is_metal() {
        DType::BF16
    } else {
        DType::F32
    }
}
