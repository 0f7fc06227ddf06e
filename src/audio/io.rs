//! WAV I/O and level normalization for codec input.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

use super::resample::resample;

/// Default target for [`normalize_loudness`], in dBFS.
pub const DEFAULT_LOUDNESS_DB: f32 = -20.0;

/// Mono waveform with its sample rate.
///
/// Samples are 32-bit floats, nominally in \[-1.0, 1.0\].
///
/// # Example
///
/// ```rust,ignore
/// let audio = AudioBuffer::load("prompt.wav")?;
/// println!("{:.2}s at {} Hz", audio.duration(), audio.sample_rate);
/// let wave = audio.to_tensor(&device)?; // [samples]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Build from a waveform tensor of shape `[samples]`, `[1, samples]` or
    /// `[1, 1, samples]`.
    pub fn from_tensor(tensor: &Tensor, sample_rate: u32) -> Result<Self> {
        let samples: Vec<f32> = tensor
            .to_dtype(candle_core::DType::F32)?
            .flatten_all()?
            .to_vec1()?;
        Ok(Self::new(samples, sample_rate))
    }

    /// 1-D `F32` tensor of the samples.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.samples, self.samples.len(), device)?)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }

    /// Write as 16-bit PCM mono WAV.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_wav(path, &self.samples, self.sample_rate)
    }

    /// Read a WAV file, down-mixing to mono.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_wav(path)
    }

    /// Scale so the peak is exactly 1.0. Silence is left untouched.
    pub fn normalize(&mut self) {
        let peak = self.peak();
        if peak > 0.0 && peak != 1.0 {
            for sample in &mut self.samples {
                *sample /= peak;
            }
        }
    }

    /// Scale so the peak sits at `target_db` dBFS. Silence is left untouched.
    pub fn normalize_db(&mut self, target_db: f32) {
        let target = 10.0f32.powf(target_db / 20.0);
        let peak = self.peak();
        if peak > 0.0 {
            let scale = target / peak;
            for sample in &mut self.samples {
                *sample *= scale;
            }
        }
    }
}

/// Bring audio to `target_sr` and peak-normalize it to \[-1, 1\].
pub fn normalize_audio(audio: &AudioBuffer, target_sr: u32) -> Result<AudioBuffer> {
    let mut out = if audio.sample_rate != target_sr {
        tracing::debug!(from = audio.sample_rate, to = target_sr, "resampling");
        resample(audio, target_sr)?
    } else {
        audio.clone()
    };
    if out.peak() == 0.0 {
        tracing::warn!(samples = out.len(), "silent audio, skipping peak normalization");
    }
    out.normalize();
    Ok(out)
}

/// Peak normalization to `target_db` dBFS, the way `sox norm` levels audio.
pub fn normalize_loudness(audio: &AudioBuffer, target_db: f32) -> AudioBuffer {
    let mut out = audio.clone();
    out.normalize_db(target_db);
    out
}

/// Load a WAV file and [`normalize_audio`] it to `target_sr`.
pub fn load_audio<P: AsRef<Path>>(path: P, target_sr: u32) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let audio = load_wav(path)?;
    normalize_audio(&audio, target_sr)
        .with_context(|| format!("Failed to normalize audio from {}", path.display()))
}

/// Load a WAV file into an [`AudioBuffer`], averaging channels to mono.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    tracing::debug!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels,
        "loaded wav"
    );
    Ok(AudioBuffer::new(mono, spec.sample_rate))
}

/// Write samples as 16-bit PCM mono WAV, clamping to \[-1, 1\].
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sine(freq: f32, sample_rate: u32, len: usize, amp: f32) -> AudioBuffer {
        let samples = (0..len)
            .map(|i| {
                amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect();
        AudioBuffer::new(samples, sample_rate)
    }

    #[test]
    fn test_duration_and_len() {
        let buffer = AudioBuffer::new(vec![0.0; 48000], 24000);
        assert!((buffer.duration() - 2.0).abs() < 1e-6);
        assert_eq!(buffer.len(), 48000);
        assert!(AudioBuffer::new(vec![], 24000).is_empty());
    }

    #[test]
    fn test_normalize_peak() {
        let mut buffer = AudioBuffer::new(vec![0.5, -0.25, 0.1], 24000);
        buffer.normalize();
        assert!((buffer.samples[0] - 1.0).abs() < 1e-6);
        assert!((buffer.samples[1] + 0.5).abs() < 1e-6);

        let mut silent = AudioBuffer::new(vec![0.0; 3], 24000);
        silent.normalize();
        assert_eq!(silent.samples, vec![0.0; 3]);
    }

    #[test]
    fn test_normalize_loudness_sets_peak_db() {
        let audio = sine(220.0, 16000, 1600, 0.9);
        let out = normalize_loudness(&audio, DEFAULT_LOUDNESS_DB);
        assert!((out.peak() - 0.1).abs() < 1e-4);
        // Input untouched.
        assert!((audio.peak() - 0.9).abs() < 1e-3);
    }

    #[test]
    fn test_normalize_audio_same_rate() {
        let audio = sine(220.0, 16000, 1600, 0.3);
        let out = normalize_audio(&audio, 16000).unwrap();
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.len(), audio.len());
        assert!((out.peak() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_audio_resamples() {
        let audio = sine(220.0, 48000, 4800, 0.3);
        let out = normalize_audio(&audio, 24000).unwrap();
        assert_eq!(out.sample_rate, 24000);
        assert_eq!(out.len(), 2400);
        assert!((out.peak() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_audio_silence_stays_silent() {
        let audio = AudioBuffer::new(vec![0.0; 100], 16000);
        let out = normalize_audio(&audio, 16000).unwrap();
        assert!(out.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_tensor_conversion() {
        let buffer = AudioBuffer::new(vec![0.1, 0.2, 0.3], 24000);
        let tensor = buffer.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[3]);

        let nested = tensor.reshape((1, 1, 3)).unwrap();
        let back = AudioBuffer::from_tensor(&nested, 24000).unwrap();
        assert_eq!(back, buffer);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roundtrip.wav");

        let original = AudioBuffer::new(vec![0.1, 0.2, -0.3, 0.4, -0.5], 24000);
        original.save(&path).unwrap();

        let loaded = AudioBuffer::load(&path).unwrap();
        assert_eq!(loaded.sample_rate, 24000);
        assert_eq!(loaded.len(), 5);
        for (a, b) in original.samples.iter().zip(loaded.samples.iter()) {
            assert!((a - b).abs() < 1e-4, "sample mismatch: {a} vs {b}");
        }
    }

    #[test]
    fn test_load_stereo_downmixes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..4 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let loaded = load_wav(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(loaded.samples.iter().all(|&s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn test_load_audio_normalizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prompt.wav");
        sine(220.0, 16000, 1600, 0.25).save(&path).unwrap();

        let audio = load_audio(&path, 16000).unwrap();
        assert!((audio.peak() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_wav("/nonexistent/path/to/file.wav").is_err());
    }
}
