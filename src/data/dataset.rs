//! Encoded utterance datasets and a batching loader.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;

use super::collate::{ValleArCollate, ValleBatch, ValleItem};
use crate::audio::{load_wav, normalize_audio, AudioBuffer};
use crate::codec::AudioCodec;

/// A raw utterance before codec encoding.
#[derive(Debug, Clone)]
pub struct RawExample {
    pub audio: AudioBuffer,
    pub text_tokens: Vec<u32>,
}

/// One line of a JSONL manifest.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    /// WAV path, relative to the manifest's directory unless absolute
    audio: PathBuf,
    text_token: Vec<u32>,
}

/// Dataset split; only the training split is shuffled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn is_shuffled(self) -> bool {
        matches!(self, Split::Train)
    }
}

impl std::str::FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "val" | "validation" => Ok(Split::Val),
            other => anyhow::bail!("unknown split '{other}'. Supported: train, val"),
        }
    }
}

/// Utterances encoded lazily through an [`AudioCodec`].
#[derive(Debug)]
pub struct ValleDataset<C: AudioCodec> {
    examples: Vec<RawExample>,
    codec: C,
}

impl<C: AudioCodec> ValleDataset<C> {
    pub fn new(examples: Vec<RawExample>, codec: C) -> Self {
        tracing::info!(
            examples = examples.len(),
            sample_rate = codec.sample_rate(),
            num_quantizers = codec.num_quantizers(),
            "created dataset"
        );
        Self { examples, codec }
    }

    /// Load a JSONL manifest of `{"audio": "<wav>", "text_token": [..]}` lines.
    pub fn from_manifest<P: AsRef<Path>>(path: P, codec: C) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open manifest: {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut examples = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ManifestEntry = serde_json::from_str(&line).with_context(|| {
                format!("{}:{}: invalid manifest entry", path.display(), lineno + 1)
            })?;
            let audio = load_wav(base.join(&entry.audio))?;
            examples.push(RawExample {
                audio,
                text_tokens: entry.text_token,
            });
        }
        Ok(Self::new(examples, codec))
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Normalize example `idx` to the codec rate, encode it and wrap its tokens.
    pub fn get(&self, idx: usize) -> Result<ValleItem> {
        let example = self
            .examples
            .get(idx)
            .with_context(|| format!("index {idx} out of range for {} examples", self.len()))?;
        let device = self.codec.device();

        let audio = normalize_audio(&example.audio, self.codec.sample_rate())?;
        let codes = self.codec.encode(&audio.to_tensor(device)?)?;
        let tokens = Tensor::from_slice(
            &example.text_tokens,
            example.text_tokens.len(),
            device,
        )?;
        Ok(ValleItem { codes, tokens })
    }
}

/// Iterator over collated batches of a [`ValleDataset`].
///
/// The last batch may be smaller than `batch_size`.
pub struct DataLoader<'a, C: AudioCodec> {
    dataset: &'a ValleDataset<C>,
    collate: ValleArCollate,
    batch_size: usize,
    order: Vec<usize>,
    pos: usize,
}

impl<'a, C: AudioCodec> DataLoader<'a, C> {
    /// Build a loader; [`Split::Train`] shuffles with `seed` (or entropy).
    pub fn new(
        dataset: &'a ValleDataset<C>,
        collate: ValleArCollate,
        batch_size: usize,
        split: Split,
        seed: Option<u64>,
    ) -> Result<Self> {
        anyhow::ensure!(batch_size > 0, "batch_size must be positive");

        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if split.is_shuffled() {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            order.shuffle(&mut rng);
        }
        tracing::debug!(?split, batch_size, examples = order.len(), "created loader");

        Ok(Self {
            dataset,
            collate,
            batch_size,
            order,
            pos: 0,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Example indices in iteration order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl<C: AudioCodec> Iterator for DataLoader<'_, C> {
    type Item = Result<ValleBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.order.len());
        let indices = &self.order[self.pos..end];
        self.pos = end;

        let batch = indices
            .iter()
            .map(|&i| self.dataset.get(i))
            .collect::<Result<Vec<_>>>()
            .and_then(|items| self.collate.collate(&items).map_err(Into::into));
        Some(batch)
    }
}
