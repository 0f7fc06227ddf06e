//! Neural audio codec seam
//!
//! [`AudioCodec`] turns waveforms into `(n_q, frames)` token grids and
//! back. [`EncodecCodec`] is the 24 kHz EnCodec implementation.

mod encodec;

pub use encodec::{EncodecCodec, DEFAULT_BANDWIDTH, FRAME_RATE, SUPPORTED_BANDWIDTHS};

use candle_core::{Device, Tensor};

use crate::error::{Result, ValleError};

/// Waveform ⇄ discrete code grid.
///
/// Encoding and decoding are lossy but shape-stable: decoding the codes of
/// `T` samples yields roughly `T` samples again.
pub trait AudioCodec {
    /// Sample rate expected by [`AudioCodec::encode`] and produced by
    /// [`AudioCodec::decode`].
    fn sample_rate(&self) -> u32;

    /// Number of residual codebooks per frame.
    fn num_quantizers(&self) -> usize;

    fn device(&self) -> &Device;

    /// Encode a batch of waveforms `[batch, samples]` into
    /// `[batch, n_q, frames]` `U32` codes.
    fn batch_encode(&self, audios: &Tensor) -> Result<Tensor>;

    /// Decode `[n_q, frames]` codes into a `[samples]` waveform.
    fn decode(&self, codes: &Tensor) -> Result<Tensor>;

    /// Encode one waveform `[samples]` into `[n_q, frames]` codes.
    fn encode(&self, audio: &Tensor) -> Result<Tensor> {
        expect_rank(audio, 1, "audio [samples]")?;
        Ok(self.batch_encode(&audio.unsqueeze(0)?)?.squeeze(0)?)
    }

    /// Encode then decode, for listening to codec artifacts.
    fn encode_decode(&self, audio: &Tensor) -> Result<Tensor> {
        let codes = self.encode(audio)?;
        self.decode(&codes)
    }
}

/// `InvalidShape` unless `tensor` has exactly `rank` dimensions.
pub fn expect_rank(tensor: &Tensor, rank: usize, what: &str) -> Result<()> {
    if tensor.rank() != rank {
        return Err(ValleError::invalid_shape(format!(
            "expected {what}, got shape {:?}",
            tensor.dims()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    /// Fixed-hop codec: frame `t` of codebook `q` is `q * 100 + t`.
    struct CountingCodec {
        device: Device,
    }

    impl AudioCodec for CountingCodec {
        fn sample_rate(&self) -> u32 {
            8
        }

        fn num_quantizers(&self) -> usize {
            2
        }

        fn device(&self) -> &Device {
            &self.device
        }

        fn batch_encode(&self, audios: &Tensor) -> Result<Tensor> {
            expect_rank(audios, 2, "audios [batch, samples]")?;
            let (batch, samples) = audios.dims2()?;
            let frames = samples / 4;
            let row: Vec<u32> = (0..2u32)
                .flat_map(|q| (0..frames as u32).map(move |t| q * 100 + t))
                .collect();
            let data = row.repeat(batch);
            Ok(Tensor::from_vec(data, (batch, 2, frames), &self.device)?)
        }

        fn decode(&self, codes: &Tensor) -> Result<Tensor> {
            expect_rank(codes, 2, "codes [n_q, frames]")?;
            let frames = codes.dim(1)?;
            Ok(Tensor::zeros(frames * 4, DType::F32, &self.device)?)
        }
    }

    #[test]
    fn test_provided_encode_checks_rank() {
        let codec = CountingCodec { device: Device::Cpu };
        let audio = Tensor::zeros(16, DType::F32, &Device::Cpu).unwrap();
        let codes = codec.encode(&audio).unwrap();
        assert_eq!(codes.dims(), &[2, 4]);
        assert_eq!(codes.to_vec2::<u32>().unwrap()[1], vec![100, 101, 102, 103]);

        let batch = audio.unsqueeze(0).unwrap();
        let err = codec.encode(&batch).unwrap_err();
        assert!(matches!(err, ValleError::InvalidShape(_)));
    }

    #[test]
    fn test_encode_decode_is_shape_stable() {
        let codec = CountingCodec { device: Device::Cpu };
        let audio = Tensor::zeros(16, DType::F32, &Device::Cpu).unwrap();
        let out = codec.encode_decode(&audio).unwrap();
        assert_eq!(out.dims(), &[16]);
    }

    #[test]
    fn test_expect_rank() {
        let t = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(expect_rank(&t, 2, "grid").is_ok());
        let err = expect_rank(&t, 1, "vector").unwrap_err();
        assert!(err.to_string().contains("vector"));
    }
}
