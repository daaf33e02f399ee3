use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use attention::ConvolutionStrategy;
use candle_core::Device;
use clap::{Args, Parser, Subcommand, ValueHint};
use etsformer::{apply_overrides, max_abs_diff, synthetic_series, EtsFormer, ForecastReport};
use model::ModelConfig;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Exponential smoothing transformer for time-series forecasting"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a model and forecast a deterministic synthetic series
    Forecast(ForecastArgs),

    /// Check that the FFT and naive convolution strategies agree
    Verify(VerifyArgs),
}

#[derive(Args)]
struct ModelArgs {
    /// Model config (TOML, or JSON with a .json extension)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Override a config field, e.g. `--override strategy=naive`
    #[arg(long = "override", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Length of the synthetic input series
    #[arg(long, default_value_t = 32)]
    length: usize,

    /// Number of series in the batch
    #[arg(long, default_value_t = 1)]
    batch: usize,
}

#[derive(Args)]
struct ForecastArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Forecast horizon
    #[arg(long, default_value_t = 8)]
    steps: usize,

    /// Safetensors checkpoint to load over the freshly initialised weights
    #[arg(long, value_hint = ValueHint::FilePath)]
    weights: Option<PathBuf>,
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Largest tolerated absolute difference between the strategies
    #[arg(long, default_value_t = 1e-3)]
    tolerance: f32,
}

fn load_config(args: &ModelArgs) -> Result<ModelConfig> {
    let config = ModelConfig::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&config, &args.overrides)
}

fn forecast(args: ForecastArgs) -> Result<()> {
    let config = load_config(&args.model)?;
    let device = Device::Cpu;
    let mut model = EtsFormer::new(config, &device)?;
    if let Some(path) = &args.weights {
        model
            .load_weights(path)
            .with_context(|| format!("loading weights from {}", path.display()))?;
    }
    model.set_training(false);

    let series = synthetic_series(
        args.model.batch,
        args.model.length,
        model.config().time_features,
        &device,
    )?;
    let prediction = model.forward(&series, args.steps)?;
    let report = ForecastReport::new(model.config(), args.steps, &prediction)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn verify(args: VerifyArgs) -> Result<()> {
    let config = load_config(&args.model)?;
    let device = Device::Cpu;
    let model = EtsFormer::new(config, &device)?;
    model.set_training(false);

    let series = synthetic_series(
        args.model.batch,
        args.model.length,
        model.config().time_features,
        &device,
    )?;
    let fft = model.forward_with_strategy(&series, 1, ConvolutionStrategy::Fft)?;
    let naive = model.forward_with_strategy(&series, 1, ConvolutionStrategy::Naive)?;
    let diff = max_abs_diff(&fft, &naive)?;
    log::info!("verify length={} max_abs_diff={diff:e}", args.model.length);
    if diff.is_nan() || diff > args.tolerance {
        bail!(
            "fft and naive strategies diverge: max |diff| {diff:e} exceeds {:e}",
            args.tolerance
        );
    }
    println!("strategies agree: max |diff| {diff:e} <= {:e}", args.tolerance);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    match Cli::parse().command {
        Command::Forecast(args) => forecast(args),
        Command::Verify(args) => verify(args),
    }
}
