//! Sample-rate conversion using rubato
//!
//! Output length is `round(len * target / source)` with the resampler's
//! group delay removed, so resampled prompts stay aligned with the original.

use anyhow::{Context, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioBuffer;

const CHUNK_SIZE: usize = 1024;

/// Resampling quality preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResampleQuality {
    /// Cubic polynomial interpolation
    Fast,
    /// Sinc interpolation, 128 taps
    #[default]
    Normal,
    /// Sinc interpolation, 256 taps
    High,
}

/// Mono audio resampler
#[derive(Debug, Clone, Default)]
pub struct Resampler {
    quality: ResampleQuality,
}

impl Resampler {
    pub fn new(quality: ResampleQuality) -> Self {
        Self { quality }
    }

    pub fn quality(&self) -> ResampleQuality {
        self.quality
    }

    /// Resample audio to `target_rate`.
    pub fn resample(&self, audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
        if audio.sample_rate == target_rate {
            return Ok(audio.clone());
        }
        anyhow::ensure!(
            audio.sample_rate > 0 && target_rate > 0,
            "cannot resample {} Hz -> {} Hz",
            audio.sample_rate,
            target_rate
        );
        if audio.is_empty() {
            return Ok(AudioBuffer::new(Vec::new(), target_rate));
        }

        let ratio = target_rate as f64 / audio.sample_rate as f64;
        let samples = match self.quality {
            ResampleQuality::Fast => {
                let mut resampler = FastFixedIn::<f32>::new(
                    ratio,
                    1.0,
                    PolynomialDegree::Cubic,
                    CHUNK_SIZE,
                    1,
                )
                .context("Failed to create fast resampler")?;
                process_chunks(&mut resampler, &audio.samples, ratio)?
            }
            ResampleQuality::Normal | ResampleQuality::High => {
                let taps = if self.quality == ResampleQuality::High {
                    256
                } else {
                    128
                };
                let params = SincInterpolationParameters {
                    sinc_len: taps,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: taps,
                    window: WindowFunction::BlackmanHarris2,
                };
                let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
                    .context("Failed to create sinc resampler")?;
                process_chunks(&mut resampler, &audio.samples, ratio)?
            }
        };

        Ok(AudioBuffer::new(samples, target_rate))
    }
}

/// Feed fixed-size chunks (zero-padded past the end) until the delayed
/// output covers the whole input, then cut the delay and the tail.
fn process_chunks<R: RubatoResampler<f32>>(
    resampler: &mut R,
    samples: &[f32],
    ratio: f64,
) -> Result<Vec<f32>> {
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    let mut pos = 0;
    while output.len() < expected + delay {
        let mut chunk = vec![0.0f32; CHUNK_SIZE];
        if pos < samples.len() {
            let end = (pos + CHUNK_SIZE).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += CHUNK_SIZE;

        let block = vec![chunk];
        let frames = resampler
            .process(&block, None)
            .context("Resampling failed")?;
        output.extend_from_slice(&frames[0]);
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

/// Resample with the default ([`ResampleQuality::Normal`]) preset.
pub fn resample(audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    Resampler::default().resample(audio, target_rate)
}
