//! Command-line tools for masks, codec round trips and mel features.
//!
//! Usage:
//!     cargo run --features cli --bin valle -- attn-mask --x-len 5 --y-len 5
//!     cargo run --features cli --bin valle -- pad-mask --lens 5,4,3,2
//!     cargo run --features cli --bin valle -- encode --input in.wav --output codes.json --weights encodec.safetensors
//!     cargo run --features cli --bin valle -- decode --input codes.json --output out.wav --weights encodec.safetensors
//!     cargo run --features cli,hub --bin valle -- roundtrip --input in.wav --output out.wav --hub
//!     cargo run --features cli --bin valle -- mel --input in.wav --n-mels 80
//!     cargo run --features cli --bin valle -- --config valle.json batches --split train --weights encodec.safetensors

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use valle::audio::{convert_audio2mel, load_audio, AudioBuffer};
use valle::data::Split;
use valle::{
    build_attn_mask, build_pad_mask, device_info, parse_device, AudioCodec, EncodecCodec,
    ValleConfig,
};

/// VALL-E data and codec utilities
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device for codec inference (auto, cpu, cuda, cuda:N, metal)
    #[arg(long, default_value = "auto", global = true)]
    device: String,

    /// JSON config file (missing fields use defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Chrome trace output (only with the `profiling` feature)
    #[arg(long, global = true)]
    trace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the prefix-LM attention mask (1 = masked)
    AttnMask {
        #[arg(long)]
        x_len: usize,
        #[arg(long)]
        y_len: usize,
    },
    /// Print the padding mask for comma-separated lengths
    PadMask {
        #[arg(long, value_delimiter = ',', required = true)]
        lens: Vec<i64>,
    },
    /// Encode a WAV file into codec tokens (JSON)
    Encode {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        codec: CodecArgs,
    },
    /// Decode codec tokens (JSON) into a WAV file
    Decode {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        codec: CodecArgs,
    },
    /// Encode and decode a WAV file to hear codec artifacts
    Roundtrip {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        codec: CodecArgs,
    },
    /// Print mel spectrogram shape and statistics
    Mel {
        #[arg(short, long)]
        input: PathBuf,
        /// Number of mel bands (defaults to the config value)
        #[arg(long)]
        n_mels: Option<usize>,
        /// Resample to this rate first
        #[arg(long, default_value_t = valle::audio::MEL_SAMPLE_RATE)]
        sample_rate: u32,
    },
    /// Load the configured dataset and print collated batch shapes
    Batches {
        /// train (shuffled with the config seed) or val
        #[arg(long, default_value = "train")]
        split: Split,
        /// Stop after this many batches
        #[arg(long)]
        limit: Option<usize>,
        #[command(flatten)]
        codec: CodecArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct CodecArgs {
    /// EnCodec model.safetensors
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Download weights from HuggingFace Hub (requires the `hub` feature)
    #[arg(long)]
    hub: bool,

    /// Target bandwidth in kbps (defaults to the config value)
    #[arg(long)]
    bandwidth: Option<f64>,
}

/// On-disk codec token grid.
#[derive(Debug, Serialize, Deserialize)]
struct CodesFile {
    sample_rate: u32,
    /// `[n_q][frames]`
    codes: Vec<Vec<u32>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Chrome tracing when the `profiling` feature is active, otherwise fmt.
    let _profiling_guard = valle::profiling::init(cli.trace.as_deref());
    if _profiling_guard.is_none() {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&cli.log_level))
            .context("Invalid --log-level filter")?;
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match &cli.config {
        Some(path) => ValleConfig::from_file(path)?,
        None => ValleConfig::default(),
    };

    match &cli.command {
        Command::AttnMask { x_len, y_len } => {
            let mask = build_attn_mask(*x_len, *y_len, &Device::Cpu)?;
            print_grid(&mask)?;
        }
        Command::PadMask { lens } => {
            let lens = Tensor::new(lens.as_slice(), &Device::Cpu)?;
            let mask = build_pad_mask(&lens, &Device::Cpu)?;
            print_grid(&mask)?;
        }
        Command::Encode {
            input,
            output,
            codec,
        } => {
            let codec = load_codec(codec, &cli.device, &config)?;
            let codes = encode_file(&codec, input)?;
            write_codes(output, codec.sample_rate(), &codes)?;
            let (n_q, frames) = codes.dims2()?;
            println!("Encoded {} -> {} ({n_q} x {frames})", input.display(), output.display());
        }
        Command::Decode {
            input,
            output,
            codec,
        } => {
            let codec = load_codec(codec, &cli.device, &config)?;
            let codes = read_codes(input, &codec)?;
            let audio = codec.decode(&codes)?;
            let audio = AudioBuffer::from_tensor(&audio, codec.sample_rate())?;
            audio.save(output)?;
            println!(
                "Decoded {} -> {} ({:.2}s)",
                input.display(),
                output.display(),
                audio.duration()
            );
        }
        Command::Roundtrip {
            input,
            output,
            codec,
        } => {
            let codec = load_codec(codec, &cli.device, &config)?;
            let audio = load_audio(input, codec.sample_rate())?;
            let wave = codec.encode_decode(&audio.to_tensor(codec.device())?)?;
            let restored = AudioBuffer::from_tensor(&wave, codec.sample_rate())?;
            restored.save(output)?;
            println!(
                "Round trip {} -> {} ({} -> {} samples)",
                input.display(),
                output.display(),
                audio.len(),
                restored.len()
            );
        }
        Command::Mel {
            input,
            n_mels,
            sample_rate,
        } => {
            let audio = load_audio(input, *sample_rate)?;
            let mel = convert_audio2mel(&audio, n_mels.unwrap_or(config.n_mels), &Device::Cpu)?;
            let (bands, frames) = mel.dims2()?;
            let values: Vec<f32> = mel.flatten_all()?.to_vec1()?;
            let max = values.iter().copied().fold(0.0f32, f32::max);
            let mean = values.iter().sum::<f32>() / values.len().max(1) as f32;
            println!("mel: {bands} bands x {frames} frames, mean {mean:.4e}, max {max:.4e}");
        }
        Command::Batches {
            split,
            limit,
            codec,
        } => {
            let codec = load_codec(codec, &cli.device, &config)?;
            let dataset = config.load_dataset(codec)?;
            let loader = config.dataloader(&dataset, *split)?;
            println!(
                "{} examples, {} batches of up to {}",
                dataset.len(),
                loader.num_batches(),
                config.batch_size
            );
            for (i, batch) in loader.take(limit.unwrap_or(usize::MAX)).enumerate() {
                let batch = batch?;
                let codes_lens: Vec<i64> = batch.codes_lens.to_vec1()?;
                println!(
                    "batch {i}: codes {:?}, tokens {:?}, codes_lens {codes_lens:?}",
                    batch.codes.dims(),
                    batch.tokens.dims()
                );
            }
        }
    }

    Ok(())
}

fn print_grid(mask: &Tensor) -> Result<()> {
    let rows: Vec<Vec<u8>> = mask.to_vec2()?;
    for row in rows {
        let line: Vec<String> = row.iter().map(u8::to_string).collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}

fn load_codec(args: &CodecArgs, device: &str, config: &ValleConfig) -> Result<EncodecCodec> {
    let device = parse_device(device)?;
    tracing::info!("Using device: {}", device_info(&device));

    let weights = match (&args.weights, args.hub) {
        (Some(path), _) => path.clone(),
        (None, true) => download_weights()?,
        (None, false) => anyhow::bail!("pass --weights <model.safetensors> or --hub"),
    };
    EncodecCodec::new(&weights, args.bandwidth.unwrap_or(config.bandwidth), &device)
}

#[cfg(feature = "hub")]
fn download_weights() -> Result<PathBuf> {
    Ok(valle::hub::ModelPaths::download(None)?.encodec_weights)
}

#[cfg(not(feature = "hub"))]
fn download_weights() -> Result<PathBuf> {
    anyhow::bail!("Hub support not compiled in. Rebuild with: cargo build --features cli,hub")
}

fn encode_file(codec: &EncodecCodec, input: &Path) -> Result<Tensor> {
    let audio = load_audio(input, codec.sample_rate())?;
    Ok(codec.encode(&audio.to_tensor(codec.device())?)?)
}

fn write_codes(path: &Path, sample_rate: u32, codes: &Tensor) -> Result<()> {
    let file = CodesFile {
        sample_rate,
        codes: codes.to_vec2()?,
    };
    fs::write(path, serde_json::to_string(&file)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn read_codes(path: &Path, codec: &EncodecCodec) -> Result<Tensor> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file: CodesFile = serde_json::from_str(&text)
        .with_context(|| format!("Invalid codes file: {}", path.display()))?;
    anyhow::ensure!(
        file.sample_rate == codec.sample_rate(),
        "codes were produced at {} Hz, codec runs at {} Hz",
        file.sample_rate,
        codec.sample_rate()
    );

    let n_q = file.codes.len();
    let frames = file.codes.first().map_or(0, Vec::len);
    anyhow::ensure!(
        file.codes.iter().all(|row| row.len() == frames),
        "ragged codes grid in {}",
        path.display()
    );
    let flat: Vec<u32> = file.codes.into_iter().flatten().collect();
    Ok(Tensor::from_vec(flat, (n_q, frames), codec.device())?)
}
