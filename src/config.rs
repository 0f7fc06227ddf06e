//! Run configuration loaded from JSON.
//!
//! Every field is optional in the file; missing fields take the defaults
//! below.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::AudioCodec;
use crate::data::{DataLoader, Split, ValleArCollate, ValleDataset};
use crate::generation::{GenerationConfig, SamplingParams};

/// Data, codec and generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValleConfig {
    /// JSONL manifest of training utterances
    pub dataset: String,
    pub batch_size: usize,
    pub bos_token: u32,
    pub eos_token: u32,
    pub pad_token: u32,
    /// Codec sample rate in Hz
    pub sample_rate: u32,
    /// EnCodec target bandwidth in kbps
    pub bandwidth: f64,
    pub n_mels: usize,
    pub top_k: Option<usize>,
    pub top_p: f64,
    pub temperature: Option<f64>,
    pub length_penalty: f64,
    pub num_beams: usize,
    pub max_new_tokens: usize,
    /// Seed for sampling and loader shuffles (`None` = entropy)
    pub seed: Option<u64>,
}

impl Default for ValleConfig {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            batch_size: 8,
            bos_token: crate::BOS_TOKEN,
            eos_token: crate::EOS_TOKEN,
            pad_token: crate::PAD_TOKEN,
            sample_rate: crate::audio::SAMPLE_RATE,
            bandwidth: crate::codec::DEFAULT_BANDWIDTH,
            n_mels: crate::audio::N_MELS,
            top_k: Some(50),
            top_p: 1.0,
            temperature: Some(1.0),
            length_penalty: 1.0,
            num_beams: 1,
            max_new_tokens: 1000,
            seed: None,
        }
    }
}

impl ValleConfig {
    /// Load from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that have no valid fallback.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.sample_rate > 0, "sample_rate must be positive");
        anyhow::ensure!(self.n_mels > 0, "n_mels must be positive");
        self.to_gen_config().validate()?;
        Ok(())
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            top_k: self.top_k,
            top_p: self.top_p,
            temperature: self.temperature,
        }
    }

    /// Convert to a [`GenerationConfig`] for [`crate::generation::generate`].
    pub fn to_gen_config(&self) -> GenerationConfig {
        GenerationConfig {
            sampling: self.sampling_params(),
            num_beams: self.num_beams,
            max_new_tokens: self.max_new_tokens,
            bos_token: self.bos_token,
            stop_token: self.eos_token,
            length_penalty: self.length_penalty,
        }
    }

    pub fn collate(&self) -> ValleArCollate {
        ValleArCollate {
            bos_token: self.bos_token,
            eos_token: self.eos_token,
            pad_token: self.pad_token,
        }
    }

    /// Load the `dataset` manifest, encoding through `codec`.
    ///
    /// The codec must run at `sample_rate`.
    pub fn load_dataset<C: AudioCodec>(&self, codec: C) -> Result<ValleDataset<C>> {
        anyhow::ensure!(!self.dataset.is_empty(), "no dataset manifest configured");
        anyhow::ensure!(
            codec.sample_rate() == self.sample_rate,
            "config sample_rate is {} Hz but the codec runs at {} Hz",
            self.sample_rate,
            codec.sample_rate()
        );
        ValleDataset::from_manifest(&self.dataset, codec)
    }

    /// Batch `dataset` with this config's collate, `batch_size` and `seed`.
    ///
    /// Only [`Split::Train`] is shuffled.
    pub fn dataloader<'a, C: AudioCodec>(
        &self,
        dataset: &'a ValleDataset<C>,
        split: Split,
    ) -> Result<DataLoader<'a, C>> {
        DataLoader::new(dataset, self.collate(), self.batch_size, split, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use candle_core::{DType, Device, Tensor};
    use std::io::Write;

    /// 16 Hz codec emitting one frame per 4 samples.
    #[derive(Debug)]
    struct FrameCodec {
        device: Device,
    }

    impl AudioCodec for FrameCodec {
        fn sample_rate(&self) -> u32 {
            16
        }

        fn num_quantizers(&self) -> usize {
            1
        }

        fn device(&self) -> &Device {
            &self.device
        }

        fn batch_encode(&self, audios: &Tensor) -> crate::Result<Tensor> {
            let (batch, samples) = audios.dims2()?;
            let frames = samples / 4;
            let data: Vec<u32> = (0..batch).flat_map(|_| 0..frames as u32).collect();
            Ok(Tensor::from_vec(data, (batch, 1, frames), &self.device)?)
        }

        fn decode(&self, codes: &Tensor) -> crate::Result<Tensor> {
            Ok(Tensor::zeros(codes.dim(1)? * 4, DType::F32, &self.device)?)
        }
    }

    fn codec() -> FrameCodec {
        FrameCodec {
            device: Device::Cpu,
        }
    }

    /// Manifest with `n` utterances of 16 samples and 2 text tokens each.
    fn write_manifest(dir: &Path, n: usize) -> std::path::PathBuf {
        let manifest = dir.join("train.jsonl");
        let mut f = std::fs::File::create(&manifest).unwrap();
        for i in 0..n {
            let name = format!("utt{i}.wav");
            AudioBuffer::new(vec![0.25; 16], 16)
                .save(dir.join(&name))
                .unwrap();
            writeln!(f, r#"{{"audio": "{name}", "text_token": [{i}, 7]}}"#).unwrap();
        }
        manifest
    }

    #[test]
    fn test_defaults() {
        let config = ValleConfig::default();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.bos_token, 1024);
        assert_eq!(config.eos_token, 1025);
        assert_eq!(config.pad_token, 0);
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.top_k, Some(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            ValleConfig::from_json(r#"{"num_beams": 4, "top_k": null, "seed": 7}"#).unwrap();
        assert_eq!(config.num_beams, 4);
        assert_eq!(config.top_k, None);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_new_tokens, 1000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ValleConfig::from_json(r#"{"top_p": 0.0}"#).is_err());
        assert!(ValleConfig::from_json(r#"{"batch_size": 0}"#).is_err());
        assert!(ValleConfig::from_json(r#"{"num_beams": "four"}"#).is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = ValleConfig {
            bos_token: 10,
            eos_token: 11,
            pad_token: 12,
            num_beams: 3,
            ..Default::default()
        };
        let gen_config = config.to_gen_config();
        assert_eq!(gen_config.bos_token, 10);
        assert_eq!(gen_config.stop_token, 11);
        assert_eq!(gen_config.num_beams, 3);
        assert_eq!(gen_config.sampling, config.sampling_params());

        let collate = config.collate();
        assert_eq!(
            (collate.bos_token, collate.eos_token, collate.pad_token),
            (10, 11, 12)
        );
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = ValleConfig {
            dataset: "train.jsonl".into(),
            temperature: Some(0.7),
            ..Default::default()
        };
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = ValleConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert!(ValleConfig::from_file("/nonexistent/config.json").is_err());
    }

    #[test]
    fn test_dataloader_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(dir.path(), 5);
        let config = ValleConfig {
            dataset: manifest.to_string_lossy().into_owned(),
            batch_size: 2,
            sample_rate: 16,
            pad_token: 3,
            seed: Some(9),
            ..Default::default()
        };

        let dataset = config.load_dataset(codec()).unwrap();
        assert_eq!(dataset.len(), 5);

        let val = config.dataloader(&dataset, Split::Val).unwrap();
        assert_eq!(val.order(), &[0, 1, 2, 3, 4]);
        let batches: Vec<_> = val.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 3);
        // 4 frames + BOS
        assert_eq!(batches[0].codes.dims(), &[2, 1, 5]);
        let first: Vec<u32> = batches[0].codes.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(first[0], config.bos_token);

        let order = |seed| {
            let config = ValleConfig {
                seed: Some(seed),
                ..config.clone()
            };
            config
                .dataloader(&dataset, Split::Train)
                .unwrap()
                .order()
                .to_vec()
        };
        assert_eq!(order(9), order(9));
    }

    #[test]
    fn test_load_dataset_checks_settings() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(dir.path(), 1);

        let unset = ValleConfig {
            sample_rate: 16,
            ..Default::default()
        };
        assert!(unset.load_dataset(codec()).is_err());

        let wrong_rate = ValleConfig {
            dataset: manifest.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let err = wrong_rate.load_dataset(codec()).unwrap_err();
        assert!(err.to_string().contains("sample_rate"), "{err}");
    }
}
