//! Attention and padding masks for the AR codec language model.
//!
//! All masks are `U8` tensors where `1` marks a masked (disallowed or
//! invalid) position and `0` a visible one. Use [`mask_to_bias`] when the
//! attention implementation wants an additive bias instead.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, ValleError};

/// Build a padding mask for a batch of variable-length sequences.
///
/// `lens` is a 1-D integer tensor of valid lengths. Returns a
/// `[batch, max_len]` tensor where entry `(i, j)` is `1` iff `j >= lens[i]`.
pub fn build_pad_mask(lens: &Tensor, device: &Device) -> Result<Tensor> {
    if lens.rank() != 1 {
        return Err(ValleError::invalid_shape(format!(
            "expected 1D lengths tensor, got {}D",
            lens.rank()
        )));
    }
    let lens: Vec<i64> = lens.to_dtype(DType::I64)?.to_vec1()?;
    build_pad_mask_from_lens(&lens, device)
}

/// Slice variant of [`build_pad_mask`].
pub fn build_pad_mask_from_lens(lens: &[i64], device: &Device) -> Result<Tensor> {
    if lens.is_empty() {
        return Err(ValleError::invalid_input("lengths must not be empty"));
    }
    if let Some((i, &len)) = lens.iter().enumerate().find(|&(_, &l)| l <= 0) {
        return Err(ValleError::invalid_input(format!(
            "lengths must be positive, got {len} at index {i}"
        )));
    }

    let batch = lens.len();
    let max_len = lens.iter().copied().max().unwrap_or(0) as usize;
    let mask: Vec<u8> = lens
        .iter()
        .flat_map(|&len| (0..max_len).map(move |j| u8::from(j as i64 >= len)))
        .collect();

    Ok(Tensor::from_vec(mask, (batch, max_len), device)?)
}

/// Build the prefix-LM attention mask over a `[text, audio]` sequence.
///
/// Returns a `[x_len + y_len, x_len + y_len]` tensor. Text queries see every
/// text key and no audio key. Audio queries see every text key and the audio
/// keys at or before their own position.
pub fn build_attn_mask(x_len: usize, y_len: usize, device: &Device) -> Result<Tensor> {
    let total = x_len + y_len;
    let mask: Vec<u8> = (0..total)
        .flat_map(|i| {
            (0..total).map(move |j| {
                let masked = if i < x_len {
                    j >= x_len
                } else {
                    j >= x_len && j > i
                };
                u8::from(masked)
            })
        })
        .collect();

    Ok(Tensor::from_vec(mask, (total, total), device)?)
}

/// Convert a boolean mask into an additive attention bias.
///
/// Masked positions become `-inf`, visible ones `0.0`.
pub fn mask_to_bias(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    if !dtype.is_float() {
        return Err(ValleError::invalid_config(format!(
            "attention bias needs a float dtype, got {dtype:?}"
        )));
    }
    let zeros = Tensor::zeros(mask.shape(), dtype, mask.device())?;
    let neg_inf = Tensor::new(&[f32::NEG_INFINITY], mask.device())?
        .to_dtype(dtype)?
        .broadcast_as(mask.shape())?;
    Ok(mask.to_dtype(DType::U8)?.where_cond(&neg_inf, &zeros)?)
}
