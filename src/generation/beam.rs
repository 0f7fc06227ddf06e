//! Beam selection by length-normalized log-probability.

use candle_core::{DType, Tensor};

use crate::error::{Result, ValleError};

/// Length-normalized score of every beam.
///
/// `score = logprob / length^length_penalty`, where `length` counts the
/// entries that are not `stop_token`. Rows made only of stop tokens score
/// `-inf`.
pub fn beam_scores(
    sequences: &Tensor,
    cumulative_logprobs: &Tensor,
    stop_token: u32,
    length_penalty: f64,
) -> Result<Vec<f64>> {
    let (rows, logprobs) = beam_inputs(sequences, cumulative_logprobs, length_penalty)?;
    Ok(rows
        .iter()
        .zip(logprobs.iter())
        .map(|(row, &lp)| match generated_len(row, stop_token) {
            0 => f64::NEG_INFINITY,
            len => lp as f64 / (len as f64).powf(length_penalty),
        })
        .collect())
}

/// Pick the best finished beam and strip its stop tokens.
///
/// # Arguments
/// * `sequences` - Generated tokens `[batch, time]`, right-padded with `stop_token`
/// * `cumulative_logprobs` - Summed log-probability per row, `[batch]` or `[batch, 1]`
/// * `stop_token` - Terminator / padding token
/// * `length_penalty` - Exponent on the generated length (0 disables normalization)
///
/// # Returns
/// The selected row as a 1-D tensor in the input dtype with every
/// `stop_token` removed. Ties go to the earliest row.
pub fn get_best_beam(
    sequences: &Tensor,
    cumulative_logprobs: &Tensor,
    stop_token: u32,
    length_penalty: f64,
) -> Result<Tensor> {
    let (rows, logprobs) = beam_inputs(sequences, cumulative_logprobs, length_penalty)?;

    let mut best: Option<(usize, f64)> = None;
    for (i, (row, &lp)) in rows.iter().zip(logprobs.iter()).enumerate() {
        let len = generated_len(row, stop_token);
        if len == 0 {
            continue;
        }
        let score = lp as f64 / (len as f64).powf(length_penalty);
        match best {
            Some((_, best_score)) if !(score > best_score) => {}
            _ => best = Some((i, score)),
        }
    }

    let (best_idx, best_score) = best.ok_or_else(|| {
        ValleError::invalid_state("no completed beam: every row consists of stop tokens")
    })?;
    tracing::debug!(best_idx, best_score, "selected beam");

    let tokens: Vec<i64> = rows[best_idx]
        .iter()
        .copied()
        .filter(|&t| t != i64::from(stop_token))
        .collect();
    let len = tokens.len();
    Ok(Tensor::from_vec(tokens, len, sequences.device())?.to_dtype(sequences.dtype())?)
}

fn generated_len(row: &[i64], stop_token: u32) -> usize {
    row.iter().filter(|&&t| t != i64::from(stop_token)).count()
}

fn beam_inputs(
    sequences: &Tensor,
    cumulative_logprobs: &Tensor,
    length_penalty: f64,
) -> Result<(Vec<Vec<i64>>, Vec<f32>)> {
    if !length_penalty.is_finite() || length_penalty < 0.0 {
        return Err(ValleError::invalid_config(format!(
            "length_penalty must be a non-negative finite number, got {length_penalty}"
        )));
    }
    let (batch, _time) = sequences.dims2().map_err(|_| {
        ValleError::invalid_shape(format!(
            "expected [batch, time] sequences, got {:?}",
            sequences.dims()
        ))
    })?;
    if sequences.dtype().is_float() {
        return Err(ValleError::invalid_shape(format!(
            "sequences must hold integer tokens, got {:?}",
            sequences.dtype()
        )));
    }

    let logprobs: Vec<f32> = cumulative_logprobs
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1()?;
    if logprobs.len() != batch {
        return Err(ValleError::invalid_shape(format!(
            "got {} cumulative log-probabilities for {batch} sequences",
            logprobs.len()
        )));
    }
    if let Some(i) = logprobs
        .iter()
        .position(|lp| lp.is_nan() || *lp == f32::INFINITY)
    {
        return Err(ValleError::invalid_input(format!(
            "cumulative log-probability of row {i} is {}",
            logprobs[i]
        )));
    }

    let rows: Vec<Vec<i64>> = sequences.to_dtype(DType::I64)?.to_vec2()?;
    Ok((rows, logprobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    const STOP: u32 = 9;

    fn best(seqs: &[[u32; 4]], lps: &[f32], penalty: f64) -> Result<Vec<u32>> {
        let device = Device::Cpu;
        let flat: Vec<u32> = seqs.iter().flatten().copied().collect();
        let seqs = Tensor::from_vec(flat, (seqs.len(), 4), &device).unwrap();
        let lps = Tensor::new(lps, &device).unwrap();
        Ok(get_best_beam(&seqs, &lps, STOP, penalty)?.to_vec1().unwrap())
    }

    #[test]
    fn test_equal_lengths_no_penalty_is_argmax() {
        let out = best(
            &[[1, 2, 3, 4], [5, 6, 7, 8], [1, 1, 1, 1]],
            &[-4.0, -1.5, -3.0],
            0.0,
        )
        .unwrap();
        assert_eq!(out, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_length_normalization_prefers_longer_beam() {
        // Raw sums favor row 0; per-token averages favor row 1.
        let out = best(&[[1, 2, STOP, STOP], [3, 4, 5, 6]], &[-2.0, -3.0], 1.0).unwrap();
        assert_eq!(out, vec![3, 4, 5, 6]);

        let out = best(&[[1, 2, STOP, STOP], [3, 4, 5, 6]], &[-2.0, -3.0], 0.0).unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_ties_pick_first_row() {
        let out = best(&[[1, 2, 3, 4], [5, 6, 7, 8]], &[-1.0, -1.0], 1.0).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_stop_tokens_removed_everywhere() {
        let out = best(&[[1, STOP, 2, STOP]], &[-0.5], 1.0).unwrap();
        assert_eq!(out, vec![1, 2]);
        assert!(!out.contains(&STOP));
    }

    #[test]
    fn test_degenerate_rows_skipped() {
        let out = best(
            &[[STOP, STOP, STOP, STOP], [1, 2, STOP, STOP]],
            &[0.0, -10.0],
            1.0,
        )
        .unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_all_degenerate_rows_fail() {
        let err = best(&[[STOP; 4], [STOP; 4]], &[0.0, 0.0], 1.0).unwrap_err();
        assert!(matches!(err, ValleError::InvalidState(_)));
    }

    #[test]
    fn test_invalid_arguments() {
        let err = best(&[[1, 2, 3, 4]], &[0.0], -1.0).unwrap_err();
        assert!(matches!(err, ValleError::InvalidConfig(_)));

        let err = best(&[[1, 2, 3, 4]], &[0.0, 1.0], 1.0).unwrap_err();
        assert!(matches!(err, ValleError::InvalidShape(_)));
    }

    #[test]
    fn test_keeps_input_dtype_and_accepts_column_logprobs() {
        let device = Device::Cpu;
        let seqs = Tensor::new(&[[1i64, 2, 9], [4, 9, 9]], &device).unwrap();
        let lps = Tensor::new(&[[-1.0f32], [-0.1]], &device).unwrap();
        let out = get_best_beam(&seqs, &lps, STOP, 1.0).unwrap();
        assert_eq!(out.dtype(), DType::I64);
        assert_eq!(out.to_vec1::<i64>().unwrap(), vec![4]);
    }

    #[test]
    fn test_nan_logprob_rejected() {
        let seqs = [[1, 2, 9, 9], [3, 4, 5, 9]];
        assert!(matches!(
            best(&seqs, &[f32::NAN, -1.0], 1.0),
            Err(ValleError::InvalidInput(_))
        ));
        assert!(best(&seqs, &[-1.0, f32::INFINITY], 1.0).is_err());
        // -inf is a legitimate (impossible) score and simply loses.
        assert_eq!(best(&seqs, &[f32::NEG_INFINITY, -1.0], 1.0).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn test_beam_scores() {
        let device = Device::Cpu;
        let seqs = Tensor::new(&[[1u32, 2, 9, 9], [9, 9, 9, 9]], &device).unwrap();
        let lps = Tensor::new(&[-4.0f32, 0.0], &device).unwrap();
        let scores = beam_scores(&seqs, &lps, STOP, 2.0).unwrap();
        assert!((scores[0] + 1.0).abs() < 1e-9);
        assert_eq!(scores[1], f64::NEG_INFINITY);
    }
}
