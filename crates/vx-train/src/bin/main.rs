//! VoxSplit command line
//!
//! Usage:
//!   voxsplit train --data <musdb> [--config train.json] [--epochs N] [--resume]
//!   voxsplit separate --model vocals.onnx --input mix.wav --output vocals.wav
//!   voxsplit inspect --input mix.wav
//!   voxsplit config --output train.json

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ndarray::Axis;
use vx_spectral::{dominant_bin, BatchNormalizer, OnnxModel, SeparationPipeline, SpectralConfig, TransformPair};
use vx_train::{read_wav, write_wav, TrainConfig};

#[derive(Parser)]
#[command(name = "voxsplit", about = "Vocal separation training and inference")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the mask network on a MUSDB18-style wav tree
    Train(TrainArgs),
    /// Separate vocals from a mixture with an ONNX model
    Separate {
        /// ONNX model path
        #[arg(short, long)]
        model: PathBuf,
        /// Mixture WAV
        #[arg(short, long)]
        input: PathBuf,
        /// Output WAV for the vocal estimate
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        framing: Framing,
    },
    /// Print spectrogram shape, envelope and dominant frequency of a WAV
    Inspect {
        #[arg(short, long)]
        input: PathBuf,
        #[command(flatten)]
        framing: Framing,
    },
    /// Write the default training configuration
    Config {
        #[arg(short, long, default_value = "train.json")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset root holding `<split>/<track>/{mixture,vocals}.wav`
    #[arg(short, long)]
    data: PathBuf,
    /// JSON configuration (defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the epoch limit
    #[arg(short, long)]
    epochs: Option<usize>,
    /// Continue from the latest checkpoint
    #[arg(long)]
    resume: bool,
    #[arg(long, default_value = "train")]
    train_split: String,
    #[arg(long, default_value = "test")]
    val_split: String,
}

#[derive(Args)]
struct Framing {
    /// Frame size in samples
    #[arg(long)]
    frame_size: Option<usize>,
    /// Hop size in samples
    #[arg(long)]
    hop_size: Option<usize>,
}

impl Framing {
    fn apply(&self, config: SpectralConfig) -> SpectralConfig {
        let frame = self.frame_size.unwrap_or(config.frame_size);
        let hop = self.hop_size.unwrap_or(config.hop_size);
        config.with_framing(frame, hop)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => train(args),
        Commands::Separate {
            model,
            input,
            output,
            framing,
        } => separate(&model, &input, &output, &framing),
        Commands::Inspect { input, framing } => inspect(&input, &framing),
        Commands::Config { output } => {
            TrainConfig::default()
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote default configuration to {}", output.display());
            Ok(())
        }
    }
}

fn load_config(args: &TrainArgs) -> Result<TrainConfig> {
    let mut config = match &args.config {
        Some(path) => {
            TrainConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => TrainConfig::default(),
    };
    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "candle")]
fn train(args: TrainArgs) -> Result<()> {
    use std::sync::Arc;
    use vx_train::{Crop, MaskNet, MaskNetConfig, Trainer, WavDataset};

    let config = load_config(&args)?;
    let train = WavDataset::open(
        &args.data,
        &args.train_split,
        config.segment_samples,
        config.sample_rate,
        Crop::Random,
    )
    .with_context(|| format!("opening {} split", args.train_split))?;
    let val = WavDataset::open(
        &args.data,
        &args.val_split,
        config.segment_samples,
        config.sample_rate,
        Crop::Centre,
    )
    .with_context(|| format!("opening {} split", args.val_split))?;

    let model = MaskNet::new(MaskNetConfig {
        learning_rate: config.learning_rate,
        ..Default::default()
    })?;

    let mut trainer = Trainer::new(config, model, Arc::new(train), Arc::new(val))?;
    if args.resume {
        trainer.resume()?;
    }
    let summary = trainer.run()?;

    println!("Stopped: {:?}", summary.reason);
    match (summary.best_epoch, summary.best_loss) {
        (Some(epoch), Some(loss)) => println!("Best validation loss {:.6} at epoch {}", loss, epoch),
        _ => println!("No improving epoch"),
    }
    Ok(())
}

#[cfg(not(feature = "candle"))]
fn train(args: TrainArgs) -> Result<()> {
    load_config(&args)?;
    anyhow::bail!(
        "training needs a trainable model; rebuild with `--features candle` (data: {})",
        args.data.display()
    )
}

fn separate(
    model_path: &Path,
    input: &Path,
    output: &Path,
    framing: &Framing,
) -> Result<()> {
    let pipeline = SeparationPipeline::new(framing.apply(SpectralConfig::default()))?;
    let model = OnnxModel::load(model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;

    let audio = read_wav(input).with_context(|| format!("reading {}", input.display()))?;
    let batch = audio.to_mono().insert_axis(Axis(0));

    let vocals = pipeline.separate(&model, batch.view())?;
    let vocals = vocals.index_axis(Axis(0), 0).to_owned();

    write_wav(output, &vocals, audio.sample_rate)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Separated {:.1}s of audio into {}",
        audio.len() as f32 / audio.sample_rate as f32,
        output.display()
    );
    Ok(())
}

fn inspect(input: &Path, framing: &Framing) -> Result<()> {
    let config = framing.apply(SpectralConfig::default());
    config.validate()?;

    let audio = read_wav(input).with_context(|| format!("reading {}", input.display()))?;
    let mono = audio.to_mono();

    let pair = TransformPair::new(config.frame_size, config.hop_size, config.window)?;
    let spectrum = pair.forward(mono.view())?;
    let magnitude = spectrum.mapv(|z| z.norm());
    let envelope = BatchNormalizer::from_config(&config).envelope(0, magnitude.view())?;

    println!("File:        {}", input.display());
    println!(
        "Audio:       {} ch, {} samples @ {} Hz",
        audio.channels(),
        audio.len(),
        audio.sample_rate
    );
    println!("Spectrogram: {:?} (channels, bins, frames)", spectrum.dim());
    println!(
        "Envelope:    min {:.6}, max {:.6}{}",
        envelope.min,
        envelope.max,
        if envelope.degenerate { " (degenerate)" } else { "" }
    );
    match dominant_bin(spectrum.view(), 0).filter(|_| envelope.max > 0.0) {
        Some(bin) => println!(
            "Dominant:    bin {} (~{:.1} Hz)",
            bin,
            pair.bin_frequency(bin, audio.sample_rate)
        ),
        None => println!("Dominant:    none (silent)"),
    }
    Ok(())
}
