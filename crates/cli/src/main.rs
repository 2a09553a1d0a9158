//! Conductor CLI - team configuration checks and throughput benches.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor_core::ProcessId;
use conductor_engine::{ConductorConfig, TeamKind};
use conductor_team::{build_team, Job, JobContext};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Managed function runtime tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and build its teams
    Check {
        /// Configuration file (JSON)
        config: PathBuf,
    },
    /// Measure job throughput of a team
    Bench {
        /// Configuration file; the default passive team when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Team to bench
        #[arg(long, default_value = "passive")]
        team: String,
        /// Number of jobs to assign
        #[arg(long, default_value = "10000")]
        jobs: usize,
        /// Times each job asks to be run again
        #[arg(long, default_value = "0")]
        repeats: usize,
    },
}

/// Requeues itself `remaining` times, then reports completion.
struct BenchJob {
    process: ProcessId,
    remaining: usize,
    runs: Arc<AtomicUsize>,
    done: mpsc::UnboundedSender<()>,
}

impl Job for BenchJob {
    fn process_id(&self) -> ProcessId {
        self.process
    }

    fn do_job(&mut self, _context: &JobContext) -> bool {
        self.runs.fetch_add(1, Ordering::Relaxed);
        if self.remaining > 0 {
            self.remaining -= 1;
            return false;
        }
        let _ = self.done.send(());
        true
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ConductorConfig> {
    match path {
        Some(path) => ConductorConfig::from_path(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(ConductorConfig::default()),
    }
}

fn check(path: &PathBuf) -> Result<()> {
    let config = load_config(Some(path))?;

    println!("Configuration: {}", path.display());
    println!("  Default team: {}", config.default_team);
    println!("  Runner batch: {}", config.runner_batch);
    for team in &config.teams {
        let built = build_team(team).with_context(|| format!("Team '{}'", team.name))?;
        let workers = match team.kind {
            TeamKind::Active | TeamKind::LeaderFollower => team.workers.to_string(),
            TeamKind::Passive | TeamKind::ContextBridge => "-".to_string(),
        };
        println!(
            "  {} | {:?} | workers {} | listener {}",
            team.name,
            team.kind,
            workers,
            built.listener.is_some()
        );
    }
    println!("OK");
    Ok(())
}

async fn bench(config: Option<PathBuf>, team: &str, jobs: usize, repeats: usize) -> Result<()> {
    let config = load_config(config.as_ref())?;
    let team_config = config
        .teams
        .iter()
        .find(|t| t.name == team)
        .with_context(|| format!("Team '{}' is not configured", team))?;
    let built = build_team(team_config)?;
    built.team.start_working()?;

    let runs = Arc::new(AtomicUsize::new(0));
    let (done, mut completed) = mpsc::unbounded_channel();
    let started = Instant::now();

    for _ in 0..jobs {
        built.team.assign_job(
            Box::new(BenchJob {
                process: ProcessId::new(),
                remaining: repeats,
                runs: runs.clone(),
                done: done.clone(),
            }),
            None,
        );
    }
    drop(done);

    let mut finished = 0;
    while completed.recv().await.is_some() {
        finished += 1;
        if finished == jobs {
            break;
        }
    }
    let elapsed = started.elapsed();
    built.team.stop_working();

    let runs = runs.load(Ordering::Relaxed);
    info!(team, jobs = finished, runs, elapsed_ms = elapsed.as_millis() as u64, "Bench complete");
    println!("Team: {} ({:?})", team, team_config.kind);
    println!("  Jobs: {}", finished);
    println!("  Runs: {}", runs);
    println!("  Elapsed: {:.3}s", elapsed.as_secs_f64());
    if elapsed.as_secs_f64() > 0.0 {
        println!("  Throughput: {:.0} runs/s", runs as f64 / elapsed.as_secs_f64());
    }
    anyhow::ensure!(finished == jobs, "only {} of {} jobs completed", finished, jobs);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => check(&config)?,
        Commands::Bench {
            config,
            team,
            jobs,
            repeats,
        } => bench(config, &team, jobs, repeats).await?,
    }

    Ok(())
}
