use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use prematch_lab::config::RunConfig;
use prematch_lab::error::classify;
use prematch_lab::pipeline;

/// Leakage-safe pre-match features and walk-forward evaluation.
#[derive(Parser, Debug)]
#[command(name = "prematch_lab")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append the configured row file to the sqlite match log
    Ingest(ConfigArg),
    /// Compute and store feature vectors for every match
    GenerateFeatures(ConfigArg),
    /// Run temporal cross-validation over all baselines and requested predictors
    RunEvaluation(ConfigArg),
    /// Fit baselines on the full history and store them
    TrainBaseline(TrainArgs),
}

#[derive(Args, Debug)]
struct ConfigArg {
    /// Path to the run configuration (TOML)
    #[arg(short, long, default_value = "prematch.toml")]
    config: PathBuf,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    config: ConfigArg,
    /// Train only this predictor
    #[arg(long)]
    predictor: Option<String>,
}

fn load(path: &Path) -> Result<RunConfig> {
    let cfg = RunConfig::load(path)?;
    cfg.logging.init();
    Ok(cfg)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest(args) => {
            let cfg = load(&args.config)?;
            let summary = pipeline::ingest_into_db(&cfg)?;
            println!(
                "ingested {} rows ({} rejected), dataset {}",
                summary.inserted,
                summary.report.rejected.len(),
                summary.dataset_version
            );
            for err in &summary.report.rejected {
                println!("  rejected: {err}");
            }
        }
        Command::GenerateFeatures(args) => {
            let cfg = load(&args.config)?;
            let version = pipeline::generate_features(&cfg)?;
            println!("features/{} {}", version.version_tag, version.content_fingerprint);
        }
        Command::RunEvaluation(args) => {
            let cfg = load(&args.config)?;
            let (version, artifact) = pipeline::run_evaluation(&cfg)?;
            println!("evaluation/{}", version.version_tag);
            for (predictor, by_metric) in &artifact.report.aggregate {
                for (metric, s) in by_metric {
                    println!(
                        "{predictor:<12} {metric:<18} mean={:.4} std={:.4} min={:.4} max={:.4} folds={}",
                        s.mean, s.std, s.min, s.max, s.folds
                    );
                }
            }
        }
        Command::TrainBaseline(args) => {
            let cfg = load(&args.config.config)?;
            for version in pipeline::train_baseline(&cfg, args.predictor.as_deref())? {
                println!("model/{} {}", version.version_tag, version.content_fingerprint);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(classify(&err).exit_code() as u8)
        }
    }
}
