// src/main.rs
//
// Thin CLI around the Ditto library.
// All of the real logic lives in the lib crate (drivers, engine, archives).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use ditto::{
    init_tracing, BatchRunner, BehavioralCloningPolicy, Config, EpisodeWriter, JsonlSink,
    NoopSink, PolicyRollout, SimulationLoader, StepSink, TraceLoader, ViewMode,
};

/// Command-line arguments for the Ditto binary.
#[derive(Parser, Debug)]
#[command(name = "ditto", version, about = "Imitation-learning datasets and BC rollouts")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate expert-replay episodes from scenario files.
    Generate(GenerateArgs),
    /// Roll out a behaviour-cloning policy on one scenario.
    Rollout(RolloutArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Scenario file or directory of scenario files.
    #[arg(long)]
    input: PathBuf,

    /// Output directory for .npz episodes and metadata.json.
    #[arg(long)]
    output: PathBuf,

    /// Optional JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame view: full | cone.
    #[arg(long)]
    view: Option<String>,

    /// Store single-channel frames.
    #[arg(long)]
    grayscale: bool,

    /// Steps per episode.
    #[arg(long)]
    horizon: Option<usize>,
}

#[derive(Args, Debug)]
struct RolloutArgs {
    /// Scenario file.
    #[arg(long)]
    scenario: PathBuf,

    /// JSON policy weights.
    #[arg(long)]
    weights: PathBuf,

    /// Output .npz archive.
    #[arg(long)]
    output: PathBuf,

    /// Optional JSONL path for per-step commands.
    #[arg(long)]
    steps_log: Option<PathBuf>,

    /// Optional JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Steps per rollout.
    #[arg(long)]
    horizon: Option<usize>,
}

/// Defaults (or file), then env overrides; CLI flags are applied by callers.
fn base_config(path: Option<&Path>, default: Config) -> Result<Config> {
    let mut cfg = match path {
        Some(p) => Config::load(p)?,
        None => default,
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}

/// Build the step sink as a trait object so we can choose between
/// JsonlSink and NoopSink at runtime.
fn build_sink(path: Option<&Path>) -> Result<Box<dyn StepSink>> {
    match path {
        Some(p) => {
            let sink = JsonlSink::create(p)
                .with_context(|| format!("creating steps log {}", p.display()))?;
            Ok(Box::new(sink))
        }
        None => Ok(Box::new(NoopSink)),
    }
}

fn generate(args: GenerateArgs) -> Result<()> {
    let mut cfg = base_config(args.config.as_deref(), Config::default())?;
    if let Some(raw) = args.view.as_deref() {
        match ViewMode::parse(raw) {
            Some(v) => cfg.render.view_mode = v,
            None => bail!("invalid --view {:?} (expected full or cone)", raw),
        }
    }
    if args.grayscale {
        cfg.render.grayscale = true;
    }
    if let Some(h) = args.horizon {
        cfg.episode.horizon = h;
    }
    cfg.validate()?;

    let runner = BatchRunner::new(TraceLoader, cfg);
    let summary = runner.run(&args.input, &args.output)?;
    println!(
        "scenarios={} written={} skipped={} failed={} frames={}",
        summary.total(),
        summary.written,
        summary.skipped,
        summary.failed,
        summary.frames
    );
    Ok(())
}

fn rollout(args: RolloutArgs) -> Result<()> {
    let mut cfg = base_config(args.config.as_deref(), Config::for_rollout())?;
    if let Some(h) = args.horizon {
        cfg.episode.horizon = h;
    }
    cfg.validate()?;

    let policy = BehavioralCloningPolicy::load(&args.weights)
        .with_context(|| format!("loading policy {}", args.weights.display()))?;
    let mut sim = TraceLoader
        .load(&args.scenario, &cfg.scenario)
        .with_context(|| format!("loading scenario {}", args.scenario.display()))?;
    let mut sink = build_sink(args.steps_log.as_deref())?;

    let mut driver = PolicyRollout::new(cfg, policy);
    let record = driver
        .run(&mut sim, sink.as_mut())
        .with_context(|| format!("rolling out {}", args.scenario.display()))?;
    EpisodeWriter::new()
        .write_rollout(&record, &args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        frames = record.frames.len(),
        vehicles = record.vehicles.len(),
        output = %args.output.display(),
        "rollout written"
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Generate(args) => generate(args),
        Command::Rollout(args) => rollout(args),
    }
}
