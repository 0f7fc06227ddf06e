//! 24 kHz EnCodec on top of `candle_transformers`.

use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::encodec::{Config, Model};

use super::{expect_rank, AudioCodec};
use crate::error::{Result, ValleError};

/// Bandwidths (kbps) the 24 kHz checkpoint was trained for.
pub const SUPPORTED_BANDWIDTHS: [f64; 5] = [1.5, 3.0, 6.0, 12.0, 24.0];

/// 6 kbps, i.e. 8 codebooks.
pub const DEFAULT_BANDWIDTH: f64 = 6.0;

/// Code frames per second at 24 kHz (hop of 320 samples).
pub const FRAME_RATE: usize = 75;

/// EnCodec restricted to the codebooks of one target bandwidth.
pub struct EncodecCodec {
    model: Model,
    device: Device,
    bandwidth: f64,
    num_quantizers: usize,
}

impl EncodecCodec {
    /// Load `model.safetensors` of `facebook/encodec_24khz`.
    ///
    /// Only the first `bandwidth * 1000 / (75 * 10)` quantizer layers are
    /// built, so codes always have that many rows.
    pub fn new<P: AsRef<Path>>(weights: P, bandwidth: f64, device: &Device) -> AnyResult<Self> {
        let weights = weights.as_ref();
        let num_quantizers = quantizers_for_bandwidth(bandwidth)?;

        let tensors = candle_core::safetensors::load(weights, device)
            .with_context(|| format!("Failed to load EnCodec weights: {}", weights.display()))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);

        let config = Config {
            target_bandwidths: vec![bandwidth],
            ..Config::default()
        };
        let model = Model::new(&config, vb).context("Failed to build EnCodec model")?;

        tracing::info!(
            bandwidth,
            num_quantizers,
            device = %crate::device_info(device),
            "loaded EnCodec"
        );
        Ok(Self {
            model,
            device: device.clone(),
            bandwidth,
            num_quantizers,
        })
    }

    /// Target bandwidth in kbps.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }
}

impl AudioCodec for EncodecCodec {
    fn sample_rate(&self) -> u32 {
        crate::audio::SAMPLE_RATE
    }

    fn num_quantizers(&self) -> usize {
        self.num_quantizers
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn batch_encode(&self, audios: &Tensor) -> Result<Tensor> {
        expect_rank(audios, 2, "audios [batch, samples]")?;
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("encodec_encode").entered();

        let xs = audios
            .to_device(&self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(1)?;
        let codes = self.model.encode(&xs)?.to_dtype(DType::U32)?;
        tracing::debug!(input = ?audios.dims(), codes = ?codes.dims(), "encoded");
        Ok(codes)
    }

    fn decode(&self, codes: &Tensor) -> Result<Tensor> {
        expect_rank(codes, 2, "codes [n_q, frames]")?;
        let n_q = codes.dim(0)?;
        if n_q != self.num_quantizers {
            return Err(ValleError::invalid_shape(format!(
                "expected {} codebooks, got {n_q}",
                self.num_quantizers
            )));
        }
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("encodec_decode").entered();

        let codes = codes
            .to_device(&self.device)?
            .to_dtype(DType::U32)?
            .unsqueeze(0)?;
        let audio = self.model.decode(&codes)?.flatten_all()?;
        tracing::debug!(codes = ?codes.dims(), samples = audio.dim(0)?, "decoded");
        Ok(audio)
    }
}

/// Codebooks used at `bandwidth` kbps.
pub(crate) fn quantizers_for_bandwidth(bandwidth: f64) -> Result<usize> {
    if !SUPPORTED_BANDWIDTHS.contains(&bandwidth) {
        return Err(ValleError::invalid_config(format!(
            "unsupported EnCodec bandwidth {bandwidth} kbps, expected one of {SUPPORTED_BANDWIDTHS:?}"
        )));
    }
    Ok((bandwidth * 1000.0) as usize / (FRAME_RATE * 10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantizers_for_bandwidth() {
        assert_eq!(quantizers_for_bandwidth(1.5).unwrap(), 2);
        assert_eq!(quantizers_for_bandwidth(DEFAULT_BANDWIDTH).unwrap(), 8);
        assert_eq!(quantizers_for_bandwidth(24.0).unwrap(), 32);
        assert!(matches!(
            quantizers_for_bandwidth(5.0),
            Err(ValleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_weights_fail() {
        let result = EncodecCodec::new("/nonexistent/encodec.safetensors", 6.0, &Device::Cpu);
        assert!(result.is_err());
    }
}
