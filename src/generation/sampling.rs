//! Token sampling for autoregressive codec generation
//!
//! Temperature scaling, combined top-k / nucleus filtering and multinomial
//! sampling with the log-probability of each drawn token. Randomness comes
//! from an explicit [`SamplingContext`] so that independent sessions never
//! share generator state.

use candle_core::{DType, Tensor, D};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Result, ValleError};

/// Temperatures below this are rejected instead of dividing by ~0.
pub const MIN_TEMPERATURE: f64 = 1e-5;

/// RNG state for a single generation session.
///
/// # Determinism
///
/// With a seed, the same seed produces identical draws across runs and
/// threads. Without one, the generator is seeded from system entropy.
#[derive(Debug, Clone)]
pub struct SamplingContext {
    rng: StdRng,
}

impl SamplingContext {
    /// Create a new sampling context with an optional seed.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Re-seed the generator, restarting its sequence.
    pub fn reset(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Default for SamplingContext {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Sampling parameters for one decode step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Keep the k highest logits (`None` = disabled)
    pub top_k: Option<usize>,
    /// Nucleus threshold in (0, 1] (1.0 = disabled)
    pub top_p: f64,
    /// Logit temperature (`None` = no scaling)
    pub temperature: Option<f64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_k: Some(50),
            top_p: 1.0,
            temperature: Some(1.0),
        }
    }
}

impl SamplingParams {
    /// Greedy decoding expressed as sampling: only the argmax survives.
    pub fn greedy() -> Self {
        Self {
            top_k: Some(1),
            top_p: 1.0,
            temperature: None,
        }
    }

    /// Reject parameters that cannot produce a valid distribution.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == Some(0) {
            return Err(ValleError::invalid_config("top_k must be positive"));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ValleError::invalid_config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() || t < MIN_TEMPERATURE {
                return Err(ValleError::invalid_config(format!(
                    "temperature must be >= {MIN_TEMPERATURE}, got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// Sample the next token for every row of `logits`.
///
/// # Arguments
/// * `logits` - Logits tensor of shape `[batch, vocab_size]`
/// * `top_k` - Top-k cardinality bound (`None` disables it)
/// * `top_p` - Nucleus threshold in (0, 1]
/// * `temperature` - Logit temperature (`None` disables scaling)
/// * `ctx` - Sampling context (owns RNG state)
///
/// # Returns
/// Sampled token indices `[batch, 1]` (`U32`) and their log-probabilities
/// `[batch, 1]` (`F32`) under the filtered distribution.
pub fn topk_sampling(
    logits: &Tensor,
    top_k: Option<usize>,
    top_p: f64,
    temperature: Option<f64>,
    ctx: &mut SamplingContext,
) -> Result<(Tensor, Tensor)> {
    #[cfg(feature = "profiling")]
    let _span = tracing::info_span!("topk_sampling").entered();

    let params = SamplingParams {
        top_k,
        top_p,
        temperature,
    };
    params.validate()?;

    let (batch, vocab) = logits.dims2().map_err(|_| {
        ValleError::invalid_shape(format!(
            "expected [batch, vocab] logits, got {:?}",
            logits.dims()
        ))
    })?;

    let logits = logits.to_dtype(DType::F32)?;
    let logits = match temperature {
        Some(t) if (t - 1.0).abs() > f64::EPSILON => (logits / t)?,
        _ => logits,
    };

    let filtered = top_k_top_p_filter(&logits, top_k, top_p)?;
    let probs = candle_nn::ops::softmax_last_dim(&filtered)?;

    let rows: Vec<Vec<f32>> = probs.to_vec2()?;
    let mut sampled = Vec::with_capacity(batch);
    for (b, row) in rows.iter().enumerate() {
        let dist = WeightedIndex::new(row).map_err(|e| {
            ValleError::invalid_input(format!("row {b} has no samplable token: {e}"))
        })?;
        sampled.push(dist.sample(ctx.rng()) as u32);
    }
    let sampled = Tensor::from_vec(sampled, (batch, 1), logits.device())?;

    let logprobs = candle_nn::ops::log_softmax(&filtered, D::Minus1)?;
    let current_logprobs = logprobs.gather(&sampled, 1)?;

    tracing::trace!(batch, vocab, "sampled next tokens");
    Ok((sampled, current_logprobs))
}

/// Apply combined top-k and top-p filtering, setting removed logits to `-inf`.
///
/// Top-k keeps every logit at least as large as the k-th largest. Top-p then
/// drops the low-probability tail whose cumulative mass is at most
/// `1 - top_p`, always keeping the most likely token.
pub fn top_k_top_p_filter(logits: &Tensor, top_k: Option<usize>, top_p: f64) -> Result<Tensor> {
    let (batch, vocab) = logits.dims2()?;
    if vocab == 0 {
        return Err(ValleError::invalid_shape("logits have an empty vocabulary"));
    }
    let rows: Vec<Vec<f32>> = logits.to_dtype(DType::F32)?.to_vec2()?;

    let mut result_data = Vec::with_capacity(batch * vocab);
    for (b, mut row) in rows.into_iter().enumerate() {
        if let Some(k) = top_k {
            top_k_row(&mut row, k);
        }
        if top_p < 1.0 {
            top_p_row(&mut row, top_p);
        }
        if !row.iter().any(|v| v.is_finite()) {
            return Err(ValleError::invalid_input(format!(
                "all logits in row {b} were filtered out"
            )));
        }
        result_data.extend(row);
    }

    Ok(Tensor::from_vec(result_data, (batch, vocab), logits.device())?)
}

fn top_k_row(row: &mut [f32], k: usize) {
    let k = k.max(1).min(row.len());
    let mut sorted = row.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for v in row.iter_mut() {
        if *v < threshold {
            *v = f32::NEG_INFINITY;
        }
    }
}

fn top_p_row(row: &mut [f32], p: f64) {
    let mut indices: Vec<usize> = (0..row.len()).collect();
    indices.sort_by(|&a, &b| row[a].total_cmp(&row[b]));

    let max_val = row[indices[row.len() - 1]];
    if !max_val.is_finite() {
        return;
    }
    let exp: Vec<f64> = indices
        .iter()
        .map(|&i| ((row[i] - max_val) as f64).exp())
        .collect();
    let sum: f64 = exp.iter().sum();

    // Ascending order: the tail is everything whose cumulative mass stays
    // within 1 - p. The last (largest) entry is never removed.
    let mut cumsum = 0.0f64;
    let last = indices.len() - 1;
    for (pos, (&idx, &e)) in indices.iter().zip(exp.iter()).enumerate() {
        cumsum += e / sum;
        if pos < last && cumsum <= 1.0 - p {
            row[idx] = f32::NEG_INFINITY;
        }
    }
}

/// Greedy sampling (argmax), returning `[batch]` indices.
pub fn greedy_sample(logits: &Tensor) -> Result<Tensor> {
    Ok(logits.argmax(D::Minus1)?)
}
