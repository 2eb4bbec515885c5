//! Outreach engagement CLI
//!
//! Trains the k-fold ensemble on a collected engagement export and scores
//! every pending batch in the watched directory.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use outreach_engagement::{train_ensemble_from_csv, PipelineConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "outreach")]
#[command(author = "Outreach Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Engagement prediction: k-fold GBDT training and batch scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the ensemble and optionally score pending batches
    Train(TrainArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Training CSV export with a JSON payload column
    #[arg(short, long)]
    input: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the training summary as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Score pending batches after training
    #[arg(long)]
    score: bool,

    /// Override ensemble.folds
    #[arg(long)]
    folds: Option<usize>,

    /// Override scoring.watch_dir
    #[arg(long)]
    watch_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Train(args) => train(args),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn train(args: TrainArgs) -> Result<()> {
    let mut config =
        PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(folds) = args.folds {
        config.ensemble.folds = folds;
    }
    if let Some(watch_dir) = args.watch_dir {
        config.scoring.watch_dir = watch_dir;
    }
    config.validate().context("Invalid configuration")?;

    let level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_logging(level);

    info!("Outreach engagement pipeline v{}", env!("CARGO_PKG_VERSION"));
    info!(
        input = %args.input.display(),
        folds = config.ensemble.folds,
        seed = config.ensemble.seed,
        "training"
    );

    let pipeline = train_ensemble_from_csv(&config, &args.input)
        .with_context(|| format!("Failed to train on {}", args.input.display()))?;
    let report = &pipeline.report;

    for fold in &report.folds {
        match fold.auc {
            Some(auc) => info!("Fold {:2} AUC : {:.6}", fold.fold + 1, auc),
            None => info!("Fold {:2} AUC : undefined", fold.fold + 1),
        }
    }
    match report.overall_auc {
        Some(auc) => info!("overall score: {:9.6}", auc),
        None => warn!("overall score undefined"),
    }

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report.summary())
            .context("Failed to serialize training report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to: {}", path.display());
    }

    if args.score {
        let summary = pipeline
            .scorer(config.scoring.clone())
            .score_pending()
            .context("Failed to score pending batches")?;
        info!(
            scored = summary.scored.len(),
            failed = summary.failed.len(),
            "scoring complete"
        );
        for path in &summary.failed {
            warn!("Batch left pending: {}", path.display());
        }
    }

    Ok(())
}
