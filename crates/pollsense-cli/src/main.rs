//! Command-line interface for pollsense.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use pollsense_core::config::env_vars;
use pollsense_core::{
    load_config, FetchCycle, HttpTransport, PollEvent, PollService, PollsenseConfig,
    ReqwestTransport, SensorState, TargetSnapshot,
};
use serde_json::Value;
use tracing::{info, warn};

/// Pollsense - poll HTTP endpoints and turn responses into sensor values.
#[derive(Parser, Debug)]
#[command(name = "pollsense")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file.
    #[arg(
        short,
        long,
        global = true,
        env = "POLLSENSE_CONFIG",
        default_value = "pollsense.toml"
    )]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every target until interrupted, printing each update.
    Run {
        /// Print snapshots as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Fetch every target once and print the result.
    Once {
        /// Only fetch this target.
        #[arg(short, long)]
        target: Option<String>,
        /// Print snapshots as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration without fetching anything.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run { json } => run(&args.config, json).await,
        Command::Once { target, json } => once(&args.config, target.as_deref(), json).await,
        Command::Check => check(&args.config),
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "pollsense=debug"
    } else {
        "pollsense=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    // Logs go to stderr so stdout carries only snapshots.
    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn read_config(path: &Path) -> Result<PollsenseConfig> {
    load_config(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn run(path: &Path, json: bool) -> Result<()> {
    let config = read_config(path)?;
    if config.targets.is_empty() {
        bail!("{} declares no targets", path.display());
    }

    let service = PollService::with_reqwest()?;
    let mut events = service.subscribe();
    for target in &config.targets {
        service.add_target(target.clone()).await?;
    }
    info!("polling {} target(s)", config.targets.len());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.next() => match event {
                Some(PollEvent::Updated { snapshot, .. }) => print_snapshot(&snapshot, json)?,
                Some(_) => {}
                None => break,
            },
        }
    }

    drop(events);
    service.shutdown().await;
    Ok(())
}

async fn once(path: &Path, only: Option<&str>, json: bool) -> Result<()> {
    let config = read_config(path)?;
    let targets: Vec<_> = match only {
        Some(name) => match config.target(name) {
            Some(target) => vec![target.clone()],
            None => bail!("no target named '{}'", name),
        },
        None => config.targets.clone(),
    };

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
    for target in targets {
        let mut cycle = FetchCycle::new(target, transport.clone());
        let outcome = cycle.tick().await;
        let snapshot = TargetSnapshot {
            target: outcome.target,
            sequence: outcome.sequence,
            sensors: outcome.sensors,
            health: outcome.health,
        };
        print_snapshot(&snapshot, json)?;
    }
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let config = read_config(path)?;
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);

    let mut problems = 0;
    for target in &config.targets {
        let sensors = target.sensors.len();
        let cycle = FetchCycle::new(target.clone(), transport.clone());
        println!(
            "{}: {} {} every {}s, {} sensor(s)",
            target.name(),
            target.config.method,
            target.config.url,
            target.config.scan_interval.as_secs(),
            sensors
        );
        for problem in cycle.problems() {
            println!("  error: {}", problem);
            problems += 1;
        }
    }

    if problems > 0 {
        bail!("{} problem(s) found in {}", problems, path.display());
    }
    println!("{} OK: {} target(s)", path.display(), config.targets.len());
    Ok(())
}

fn print_snapshot(snapshot: &TargetSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    let health = match snapshot.health.is_up() {
        Some(true) => "up",
        Some(false) => "down",
        None => "unknown",
    };
    let status = snapshot
        .health
        .last_status
        .map(|s| format!(", HTTP {}", s))
        .unwrap_or_default();
    println!(
        "{} [{}{}, tick {}]",
        snapshot.target, health, status, snapshot.sequence
    );
    for (name, state) in &snapshot.sensors {
        println!("  {} = {}", name, format_state(state));
    }
    Ok(())
}

fn format_state(state: &SensorState) -> String {
    let mut out = match &state.value {
        Value::Null => "unknown".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if let Some(unit) = &state.unit {
        out.push(' ');
        out.push_str(unit);
    }
    if state.replayed {
        out.push_str(" (last known)");
    }
    out
}
