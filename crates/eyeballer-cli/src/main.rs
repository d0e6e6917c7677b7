#![recursion_limit = "256"]
//! `eyeballer` command line: train, predict and evaluate.

use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use eyeballer::EyeballerConfig;
use eyeballer::cache::disk::DiskCacheConfig;
use eyeballer::evaluation::{EvaluationSource, Evaluator, pretty_print};
use eyeballer::heatmap::HeatmapExplainer;
use eyeballer::inference::Predictor;
use eyeballer::logging::{LogConfig, LogLevel, init_logging};
use eyeballer::training::{TrainOptions, Trainer};
use std::path::PathBuf;

#[cfg(not(feature = "wgpu"))]
type InferenceBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "wgpu")]
type InferenceBackend = burn::backend::Wgpu;

type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Screenshot triage classifier", long_about = None)]
struct Cli {
    /// JSON run configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Weights file to load.
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Random seed for reproducible splits and augmentation.
    #[arg(long)]
    seed: Option<u64>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Debug logging with module targets.
    #[arg(short, long)]
    verbose: bool,

    /// Log the model parameter count before running.
    #[arg(long)]
    summary: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on the labelled screenshots.
    Train(TrainArgs),

    /// Score a screenshot or a directory of screenshots.
    Predict(PredictArgs),

    /// Score the evaluation set and report metrics.
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Write accuracy, loss and score histogram charts.
    #[arg(long)]
    graphs: bool,

    /// Number of epochs.
    #[arg(long, default_value_t = 20)]
    epochs: usize,

    /// Batch size.
    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Also write the last-epoch weights here.
    #[arg(long)]
    final_weights: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Image file or directory.
    screenshot: PathBuf,

    /// Write occlusion heatmaps.
    #[arg(long)]
    heatmap: bool,

    /// Score above which a label is reported.
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Score above which a label counts as predicted.
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,

    /// Evaluate on the validation split of the `--seed` training run
    /// instead of the held-out set.
    #[arg(long)]
    validation: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<EyeballerConfig> {
    let mut config = match &cli.config {
        Some(path) => EyeballerConfig::load(path)
            .map_err(|e| anyhow::anyhow!("unable to read config '{}': {e}", path.display()))?,
        None => EyeballerConfig::default(),
    };
    if cli.weights.is_some() {
        config.weights_file = cli.weights.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default().with_level(cli.log_level)
    };
    init_logging(&log_config)?;

    let config = load_config(&cli)?;
    let disk_cache = DiskCacheConfig::default();

    match &cli.command {
        Command::Train(args) => train(&cli, config, disk_cache, args),
        Command::Predict(args) => predict(&cli, config, disk_cache, args),
        Command::Evaluate(args) => evaluate(&cli, config, disk_cache, args),
    }
}

fn train(
    cli: &Cli,
    config: EyeballerConfig,
    disk_cache: DiskCacheConfig,
    args: &TrainArgs,
) -> anyhow::Result<()> {
    let options = TrainOptions::new()
        .with_epochs(args.epochs)
        .with_batch_size(args.batch_size)
        .with_seed(cli.seed)
        .with_emit_graphs(args.graphs)
        .with_final_weights_file(args.final_weights.clone())
        .with_log_summary(cli.summary);

    let trainer = Trainer::<TrainingBackend>::new(config, disk_cache, Default::default());
    let run = trainer.train(&options)?;
    let history = &run.history;

    if let Some(best) = history.best() {
        tracing::info!(
            seed = history.seed,
            epoch = best.epoch,
            train_loss = best.train_loss,
            valid_loss = ?best.valid_loss,
            checkpoint = %trainer.config().checkpoint_file.display(),
            "training finished"
        );
    }
    if !history.skipped_images.is_empty() {
        tracing::warn!(
            count = history.skipped_images.len(),
            "unreadable images were skipped"
        );
    }
    Ok(())
}

fn predictor(
    cli: &Cli,
    config: &EyeballerConfig,
    disk_cache: &DiskCacheConfig,
) -> anyhow::Result<Predictor<InferenceBackend>> {
    let predictor = Predictor::<InferenceBackend>::from_config(config, disk_cache, Default::default())?;
    if cli.summary {
        predictor.model().summary();
    }
    Ok(predictor)
}

fn predict(
    cli: &Cli,
    config: EyeballerConfig,
    disk_cache: DiskCacheConfig,
    args: &PredictArgs,
) -> anyhow::Result<()> {
    let predictor = predictor(cli, &config, &disk_cache)?;
    let batch = predictor.predict_with_report(&args.screenshot)?;

    for result in &batch.results {
        let scores: Vec<String> = result
            .scores
            .iter()
            .map(|(label, score)| format!("{label}={score:.4}"))
            .collect();
        let positive = result.positive_labels(args.threshold);
        println!(
            "{}: {} [{}]",
            result.filename,
            scores.join(" "),
            if positive.is_empty() {
                "none of the above".to_string()
            } else {
                positive.join(", ")
            }
        );
    }
    if !batch.skipped.is_empty() {
        tracing::warn!(count = batch.skipped.len(), "entries were skipped");
    }

    if args.heatmap {
        if args.screenshot.is_dir() {
            anyhow::bail!("--heatmap needs a single screenshot, not a directory");
        }
        let written = HeatmapExplainer::new(&predictor, &config).generate(&args.screenshot)?;
        for path in written {
            tracing::info!(path = %path.display(), "heatmap written");
        }
    }
    Ok(())
}

fn evaluate(
    cli: &Cli,
    config: EyeballerConfig,
    disk_cache: DiskCacheConfig,
    args: &EvaluateArgs,
) -> anyhow::Result<()> {
    let source = match (args.validation, cli.seed) {
        (false, _) => EvaluationSource::HeldOut,
        (true, Some(seed)) => EvaluationSource::Validation { seed },
        (true, None) => anyhow::bail!("--validation needs the training run's --seed"),
    };

    let predictor = predictor(cli, &config, &disk_cache)?;
    let report = Evaluator::new(config, predictor).evaluate(args.threshold, source)?;
    print!("{}", pretty_print(&report));
    Ok(())
}
