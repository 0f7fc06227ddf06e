//! Batch collation for AR training.

use candle_core::Tensor;

use crate::error::{Result, ValleError};

/// One encoded utterance.
#[derive(Debug, Clone)]
pub struct ValleItem {
    /// Codec tokens `[n_q, frames]` (`U32`)
    pub codes: Tensor,
    /// Text tokens `[len]` (`U32`)
    pub tokens: Tensor,
}

/// A padded training batch.
#[derive(Debug, Clone)]
pub struct ValleBatch {
    /// Decoder inputs `[batch, n_q, frames + 1]`, BOS first
    pub codes: Tensor,
    /// Unpadded time length of each `codes` row (BOS included), `I64`
    pub codes_lens: Tensor,
    /// Decoder targets `[batch, n_q, frames + 1]`, EOS last
    pub targets: Tensor,
    /// Text tokens `[batch, max_len]`
    pub tokens: Tensor,
    /// Unpadded length of each `tokens` row, `I64`
    pub tokens_lens: Tensor,
}

impl ValleBatch {
    pub fn batch_size(&self) -> usize {
        self.codes.dims().first().copied().unwrap_or(0)
    }
}

/// Right-pad tensors along their last axis and stack them on a new batch axis.
///
/// All tensors must share rank and every dimension except the last. Returns
/// the padded `[batch, ..., max_len]` tensor and the original last-axis
/// lengths as a `[batch]` `I64` tensor.
pub fn collate_list(tensors: &[Tensor], pad_value: u32) -> Result<(Tensor, Tensor)> {
    let first = tensors
        .first()
        .ok_or_else(|| ValleError::invalid_input("cannot collate an empty list"))?;
    if first.rank() == 0 {
        return Err(ValleError::invalid_shape("cannot collate scalars"));
    }
    let lead = &first.dims()[..first.rank() - 1];
    for (i, t) in tensors.iter().enumerate() {
        if t.rank() != first.rank() || &t.dims()[..t.rank() - 1] != lead {
            return Err(ValleError::invalid_shape(format!(
                "tensor {i} has shape {:?}, expected [{lead:?}.., len]",
                t.dims()
            )));
        }
    }

    let axis = first.rank() - 1;
    let lens: Vec<i64> = tensors.iter().map(|t| t.dims()[axis] as i64).collect();
    let max_len = lens.iter().copied().max().unwrap_or(0) as usize;

    let padded = tensors
        .iter()
        .map(|t| pad_last(t, max_len, pad_value))
        .collect::<Result<Vec<_>>>()?;
    let stacked = Tensor::stack(&padded, 0)?;
    let lens = Tensor::from_vec(lens, tensors.len(), first.device())?;
    Ok((stacked, lens))
}

/// Pad the last axis of `t` with `value` up to `len`.
fn pad_last(t: &Tensor, len: usize, value: u32) -> Result<Tensor> {
    let axis = t.rank() - 1;
    let cur = t.dims()[axis];
    if cur >= len {
        return Ok(t.clone());
    }
    let mut shape = t.dims().to_vec();
    shape[axis] = len - cur;
    let pad = Tensor::full(value, shape, t.device())?.to_dtype(t.dtype())?;
    Ok(Tensor::cat(&[t, &pad], axis)?)
}

/// Add `value` as a new column at the start or end of the time axis.
fn with_column(codes: &Tensor, value: u32, at_start: bool) -> Result<Tensor> {
    let mut shape = codes.dims().to_vec();
    let axis = shape.len() - 1;
    shape[axis] = 1;
    let column = Tensor::full(value, shape, codes.device())?.to_dtype(codes.dtype())?;
    let parts = if at_start {
        [&column, codes]
    } else {
        [codes, &column]
    };
    Ok(Tensor::cat(&parts, axis)?)
}

/// Collation for the autoregressive stage.
///
/// Inputs get BOS prepended on the time axis and targets get EOS appended,
/// so `targets[.., t]` is the token the model must predict after seeing
/// `codes[.., ..=t]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValleArCollate {
    pub bos_token: u32,
    pub eos_token: u32,
    pub pad_token: u32,
}

impl Default for ValleArCollate {
    fn default() -> Self {
        Self {
            bos_token: crate::BOS_TOKEN,
            eos_token: crate::EOS_TOKEN,
            pad_token: crate::PAD_TOKEN,
        }
    }
}

impl ValleArCollate {
    /// Build a padded batch.
    ///
    /// Every example must have more code frames (BOS included) than text
    /// tokens, otherwise [`ValleError::LengthInvariant`] names the first
    /// offending example.
    pub fn collate(&self, items: &[ValleItem]) -> Result<ValleBatch> {
        if items.is_empty() {
            return Err(ValleError::invalid_input("cannot collate an empty batch"));
        }

        let mut codes = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());
        let mut tokens = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if item.codes.rank() != 2 {
                return Err(ValleError::invalid_shape(format!(
                    "example {index}: expected codes [n_q, frames], got {:?}",
                    item.codes.dims()
                )));
            }
            if item.tokens.rank() != 1 {
                return Err(ValleError::invalid_shape(format!(
                    "example {index}: expected tokens [len], got {:?}",
                    item.tokens.dims()
                )));
            }

            let codes_len = item.codes.dim(1)? + 1;
            let tokens_len = item.tokens.dim(0)?;
            if codes_len <= tokens_len {
                return Err(ValleError::LengthInvariant {
                    index,
                    codes_len,
                    tokens_len,
                });
            }

            codes.push(with_column(&item.codes, self.bos_token, true)?);
            targets.push(with_column(&item.codes, self.eos_token, false)?);
            tokens.push(item.tokens.clone());
        }

        let (codes, codes_lens) = collate_list(&codes, self.pad_token)?;
        let (targets, _) = collate_list(&targets, self.pad_token)?;
        let (tokens, tokens_lens) = collate_list(&tokens, self.pad_token)?;
        tracing::debug!(
            batch = items.len(),
            codes = ?codes.dims(),
            tokens = ?tokens.dims(),
            "collated batch"
        );

        Ok(ValleBatch {
            codes,
            codes_lens,
            targets,
            tokens,
            tokens_lens,
        })
    }
}
