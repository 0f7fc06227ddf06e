//! Audio utilities for codec input and analysis
//!
//! This module provides:
//! - WAV file I/O
//! - Resampling and level normalization
//! - torchaudio-compatible mel spectrograms

mod io;
mod mel;
pub mod resample;

pub use io::{
    load_audio, load_wav, normalize_audio, normalize_loudness, save_wav, AudioBuffer,
    DEFAULT_LOUDNESS_DB,
};
pub use mel::{convert_audio2mel, MelConfig, MelSpectrogram};
pub use resample::{resample, ResampleQuality, Resampler};

/// Native sample rate of the 24 kHz EnCodec model
pub const SAMPLE_RATE: u32 = 24000;

/// Default sample rate for mel features
pub const MEL_SAMPLE_RATE: u32 = 16000;

/// Default number of mel bands
pub const N_MELS: usize = 80;
