//! Autoregressive decode loop over the first codebook.
//!
//! The model sees the text prompt followed by the audio tokens generated so
//! far, under the prefix-LM mask from [`crate::masks::build_attn_mask`]. Each
//! step samples one token per beam; beams that emitted the stop token keep
//! emitting it and stop accumulating log-probability.

use candle_core::{DType, Tensor};

use super::beam::get_best_beam;
use super::sampling::{topk_sampling, SamplingContext, SamplingParams};
use crate::error::{Result, ValleError};
use crate::masks::build_attn_mask;

/// Next-token model driven by [`generate`].
pub trait AutoregressiveModel {
    /// Logits for the position after the last audio token.
    ///
    /// * `tokens` - Text prompt `[batch, x_len]` (`U32`)
    /// * `codes` - Audio tokens so far `[batch, y_len]` (`U32`), BOS first
    /// * `attn_mask` - `[x_len + y_len, x_len + y_len]` `U8` mask, `1` = masked
    ///
    /// Must return `[batch, vocab]` logits.
    fn forward(&mut self, tokens: &Tensor, codes: &Tensor, attn_mask: &Tensor) -> Result<Tensor>;
}

/// Configuration for [`generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub sampling: SamplingParams,
    /// Number of sampled beams (rows) decoded in parallel
    pub num_beams: usize,
    /// Upper bound on generated tokens per beam
    pub max_new_tokens: usize,
    /// Token that opens the audio span
    pub bos_token: u32,
    /// Token that terminates a beam
    pub stop_token: u32,
    /// Exponent on the beam length when ranking finished beams
    pub length_penalty: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingParams::default(),
            num_beams: 1,
            max_new_tokens: 1000,
            bos_token: crate::BOS_TOKEN,
            stop_token: crate::EOS_TOKEN,
            length_penalty: 1.0,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        if self.num_beams == 0 {
            return Err(ValleError::invalid_config("num_beams must be at least 1"));
        }
        if self.max_new_tokens == 0 {
            return Err(ValleError::invalid_config(
                "max_new_tokens must be at least 1",
            ));
        }
        if !self.length_penalty.is_finite() || self.length_penalty < 0.0 {
            return Err(ValleError::invalid_config(format!(
                "length_penalty must be a non-negative finite number, got {}",
                self.length_penalty
            )));
        }
        Ok(())
    }
}

/// Sample `num_beams` continuations of a text prompt and return the best one.
///
/// # Arguments
/// * `model` - Next-token model
/// * `text_tokens` - Prompt of shape `[x_len]` or `[1, x_len]`
/// * `config` - Sampling, beam and stopping parameters
/// * `ctx` - Sampling context (owns RNG state)
///
/// # Returns
/// The best beam as a 1-D `U32` tensor, without BOS and stop tokens.
pub fn generate<M: AutoregressiveModel + ?Sized>(
    model: &mut M,
    text_tokens: &Tensor,
    config: &GenerationConfig,
    ctx: &mut SamplingContext,
) -> Result<Tensor> {
    config.validate()?;

    let prompt = match text_tokens.rank() {
        1 => text_tokens.clone(),
        2 if text_tokens.dim(0)? == 1 => text_tokens.squeeze(0)?,
        _ => {
            return Err(ValleError::invalid_shape(format!(
                "expected a single prompt [x_len] or [1, x_len], got {:?}",
                text_tokens.dims()
            )))
        }
    };
    let device = prompt.device().clone();
    let x_len = prompt.dim(0)?;
    let beams = config.num_beams;

    let tokens = prompt
        .to_dtype(DType::U32)?
        .unsqueeze(0)?
        .repeat((beams, 1))?;
    let mut codes = Tensor::full(config.bos_token, (beams, 1), &device)?;

    let mut finished = vec![false; beams];
    let mut cumulative = vec![0f32; beams];
    let stop = config.stop_token;

    #[cfg(feature = "profiling")]
    let _gen_span = tracing::info_span!("generate", beams, x_len).entered();

    for step in 0..config.max_new_tokens {
        let y_len = codes.dim(1)?;
        let attn_mask = build_attn_mask(x_len, y_len, &device)?;

        #[cfg(feature = "profiling")]
        let _step_span = tracing::info_span!("decode_step", step).entered();

        let logits = model.forward(&tokens, &codes, &attn_mask)?;
        match logits.dims() {
            [b, _] if *b == beams => {}
            dims => {
                return Err(ValleError::invalid_shape(format!(
                    "model returned logits {dims:?}, expected [{beams}, vocab]"
                )))
            }
        }

        let (sampled, logprobs) = topk_sampling(
            &logits,
            config.sampling.top_k,
            config.sampling.top_p,
            config.sampling.temperature,
            ctx,
        )?;
        let mut sampled: Vec<u32> = sampled.flatten_all()?.to_vec1()?;
        let logprobs: Vec<f32> = logprobs.flatten_all()?.to_vec1()?;

        for (row, token) in sampled.iter_mut().enumerate() {
            if finished[row] {
                *token = stop;
                continue;
            }
            cumulative[row] += logprobs[row];
            if *token == stop {
                finished[row] = true;
            }
        }

        let column = Tensor::from_vec(sampled, (beams, 1), &device)?;
        codes = Tensor::cat(&[&codes, &column], 1)?;

        if finished.iter().all(|&f| f) {
            tracing::debug!(step, "all beams finished");
            break;
        }
    }

    let generated = codes.dim(1)? - 1;
    tracing::debug!(
        generated,
        finished = finished.iter().filter(|&&f| f).count(),
        beams,
        "decode loop done"
    );

    let sequences = codes.narrow(1, 1, generated)?;
    let cumulative = Tensor::from_vec(cumulative, beams, &device)?;
    get_best_beam(&sequences, &cumulative, stop, config.length_penalty)
}
