//! Mel-spectrogram computation
//!
//! Matches the defaults of `torchaudio.transforms.MelSpectrogram`: periodic
//! Hann window, centered STFT with reflect padding, power spectrum, HTK mel
//! scale and un-normalized triangular filters.

use anyhow::Result;
use candle_core::{Device, Tensor};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

use super::{AudioBuffer, MEL_SAMPLE_RATE, N_MELS};

/// Configuration for mel spectrogram computation
#[derive(Debug, Clone, PartialEq)]
pub struct MelConfig {
    /// Sample rate of input audio
    pub sample_rate: u32,
    /// FFT size
    pub n_fft: usize,
    /// Hop length (defaults to `n_fft / 2`)
    pub hop_length: Option<usize>,
    /// Number of mel bands
    pub n_mels: usize,
    /// Lowest filter edge in Hz
    pub fmin: f32,
    /// Highest filter edge in Hz (defaults to `sample_rate / 2`)
    pub fmax: Option<f32>,
    /// Exponent on the magnitude (2.0 = power)
    pub power: f32,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: MEL_SAMPLE_RATE,
            n_fft: 400,
            hop_length: None,
            n_mels: N_MELS,
            fmin: 0.0,
            fmax: None,
            power: 2.0,
        }
    }
}

/// Mel-spectrogram extractor with a precomputed filterbank and window.
pub struct MelSpectrogram {
    config: MelConfig,
    hop_length: usize,
    /// `[n_mels][n_freqs]`
    filterbank: Vec<Vec<f32>>,
    window: Vec<f32>,
}

impl MelSpectrogram {
    pub fn new(config: MelConfig) -> Result<Self> {
        anyhow::ensure!(config.n_fft >= 2, "n_fft must be at least 2");
        anyhow::ensure!(config.n_mels > 0, "n_mels must be positive");
        let hop_length = config.hop_length.unwrap_or(config.n_fft / 2);
        anyhow::ensure!(hop_length > 0, "hop_length must be positive");

        let fmax = config.fmax.unwrap_or(config.sample_rate as f32 / 2.0);
        let filterbank = htk_filterbank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.fmin,
            fmax,
        );
        let window = periodic_hann(config.n_fft);

        Ok(Self {
            config,
            hop_length,
            filterbank,
            window,
        })
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Number of frames produced for `n_samples` of input.
    pub fn num_frames(&self, n_samples: usize) -> usize {
        n_samples / self.hop_length + 1
    }

    /// Mel spectrogram as `[frames][n_mels]`.
    pub fn compute(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>> {
        anyhow::ensure!(!samples.is_empty(), "cannot compute a mel spectrogram of empty audio");

        let spectrum = self.stft(samples);
        let power = self.config.power;
        Ok(spectrum
            .iter()
            .map(|frame| {
                let mag: Vec<f32> = frame
                    .iter()
                    .map(|c| {
                        if power == 2.0 {
                            c.norm_sqr()
                        } else {
                            c.norm().powf(power)
                        }
                    })
                    .collect();
                self.filterbank
                    .iter()
                    .map(|filter| filter.iter().zip(&mag).map(|(f, m)| f * m).sum())
                    .collect()
            })
            .collect())
    }

    /// Mel spectrogram as a `[n_mels, frames]` tensor.
    pub fn compute_tensor(&self, samples: &[f32], device: &Device) -> Result<Tensor> {
        let mel = self.compute(samples)?;
        let n_frames = mel.len();
        let flat: Vec<f32> = mel.into_iter().flatten().collect();
        Ok(Tensor::from_vec(flat, (n_frames, self.config.n_mels), device)?
            .t()?
            .contiguous()?)
    }

    /// Centered STFT with reflect padding, one-sided.
    fn stft(&self, samples: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let n_fft = self.config.n_fft;
        let pad = n_fft / 2;
        let padded: Vec<f32> = (0..samples.len() + 2 * pad)
            .map(|k| samples[reflect_index(k as isize - pad as isize, samples.len())])
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        let n_frames = (padded.len() - n_fft) / self.hop_length + 1;
        (0..n_frames)
            .map(|i| {
                let start = i * self.hop_length;
                let mut buffer: Vec<Complex<f32>> = padded[start..start + n_fft]
                    .iter()
                    .zip(&self.window)
                    .map(|(s, w)| Complex::new(s * w, 0.0))
                    .collect();
                fft.process(&mut buffer);
                buffer.truncate(n_fft / 2 + 1);
                buffer
            })
            .collect()
    }
}

/// Mel spectrogram of `audio` with `n_mels` bands and torchaudio defaults
/// at the audio's own sample rate. Returns `[n_mels, frames]`.
pub fn convert_audio2mel(audio: &AudioBuffer, n_mels: usize, device: &Device) -> Result<Tensor> {
    let mel = MelSpectrogram::new(MelConfig {
        sample_rate: audio.sample_rate,
        n_mels,
        ..Default::default()
    })?;
    mel.compute_tensor(&audio.samples, device)
}

/// Mirror `idx` into `[0, len)` without repeating the edge sample.
fn reflect_index(idx: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let m = idx.rem_euclid(period);
    if m >= len as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

fn hz_to_mel(f: f32) -> f32 {
    2595.0 * (1.0 + f / 700.0).log10()
}

fn mel_to_hz(m: f32) -> f32 {
    700.0 * (10f32.powf(m / 2595.0) - 1.0)
}

/// Filter edge frequencies: `n_mels + 2` points evenly spaced in mel.
fn band_edges(n_mels: usize, fmin: f32, fmax: f32) -> Vec<f32> {
    let (m_min, m_max) = (hz_to_mel(fmin), hz_to_mel(fmax));
    (0..n_mels + 2)
        .map(|i| mel_to_hz(m_min + (m_max - m_min) * i as f32 / (n_mels + 1) as f32))
        .collect()
}

/// Triangular HTK filterbank without area normalization, `[n_mels][n_freqs]`.
fn htk_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = n_fft / 2 + 1;
    let nyquist = (sample_rate / 2) as f32;
    let freqs: Vec<f32> = (0..n_freqs)
        .map(|i| nyquist * i as f32 / (n_freqs - 1).max(1) as f32)
        .collect();
    let edges = band_edges(n_mels, fmin, fmax);

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            freqs
                .iter()
                .map(|&f| {
                    let down = (f - lo) / (center - lo);
                    let up = (hi - f) / (hi - center);
                    down.min(up).max(0.0)
                })
                .collect()
        })
        .collect()
}

fn periodic_hann(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / length as f32).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = MelConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.n_fft, 400);
        assert_eq!(config.n_mels, 80);
        let mel = MelSpectrogram::new(config).unwrap();
        assert_eq!(mel.hop_length, 200);
    }

    #[test]
    fn test_periodic_hann() {
        let window = periodic_hann(4);
        for (w, expected) in window.iter().zip([0.0f32, 0.5, 1.0, 0.5]) {
            assert!((w - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reflect_index() {
        // [a b c d] reflected: ... c b | a b c d | c b ...
        let idx: Vec<usize> = (-2..6).map(|i| reflect_index(i, 4)).collect();
        assert_eq!(idx, vec![2, 1, 0, 1, 2, 3, 2, 1]);
        assert_eq!(reflect_index(-5, 1), 0);
        // Padding wider than the signal keeps bouncing.
        assert_eq!(reflect_index(-4, 3), 0);
    }

    #[test]
    fn test_htk_scale_roundtrip() {
        assert!((hz_to_mel(700.0) - 2595.0 * 2f32.log10()).abs() < 1e-3);
        for f in [0.0f32, 440.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(f)) - f).abs() < 0.5);
        }
    }

    #[test]
    fn test_filterbank_shape_and_range() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        assert_eq!(mel.filterbank.len(), 80);
        assert_eq!(mel.filterbank[0].len(), 201);
        for filter in &mel.filterbank {
            assert!(filter.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_frame_count() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let out = mel.compute(&vec![0.0f32; 1600]).unwrap();
        assert_eq!(out.len(), 9);
        assert_eq!(mel.num_frames(1600), 9);
        assert_eq!(out[0].len(), 80);
    }

    #[test]
    fn test_silence_is_zero() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let out = mel.compute(&vec![0.0f32; 16000]).unwrap();
        assert!(out.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_tone_energy_lands_in_matching_band() {
        let config = MelConfig::default();
        let edges = band_edges(config.n_mels, 0.0, 8000.0);
        let mel = MelSpectrogram::new(config).unwrap();
        let out = mel.compute(&sine(1000.0, 16000, 16000)).unwrap();

        let frame = &out[out.len() / 2];
        let (best, _) = frame
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert!(edges[best] < 1000.0 && 1000.0 < edges[best + 2]);
    }

    #[test]
    fn test_short_input_still_pads() {
        let mel = MelSpectrogram::new(MelConfig::default()).unwrap();
        let out = mel.compute(&[0.5, -0.5, 0.25]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(mel.compute(&[]).is_err());
    }

    #[test]
    fn test_convert_audio2mel_shape() {
        let audio = AudioBuffer::new(sine(440.0, 16000, 8000), 16000);
        let mel = convert_audio2mel(&audio, 40, &Device::Cpu).unwrap();
        assert_eq!(mel.dims(), &[40, 41]);
    }
}
