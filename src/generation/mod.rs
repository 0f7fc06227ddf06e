//! Generation utilities for the AR codec language model
//!
//! This module provides:
//! - Temperature / top-k / top-p sampling with log-probabilities
//! - Length-normalized beam selection
//! - The autoregressive decode loop behind the [`AutoregressiveModel`] seam
//! - Per-session RNG via [`SamplingContext`] for reproducible generation

mod beam;
mod decode;
mod sampling;

pub use beam::{beam_scores, get_best_beam};
pub use decode::{generate, AutoregressiveModel, GenerationConfig};
pub use sampling::{
    greedy_sample, top_k_top_p_filter, topk_sampling, SamplingContext, SamplingParams,
    MIN_TEMPERATURE,
};
