//! Fieldsurvey - multi-location Wi-Fi survey client
//!
//! Runs the survey in the background, prints progress, takes operator commands from stdin and
//! exports the results once the run is over.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use fieldsurvey::config::Config;
use fieldsurvey::engine::{Engine, EngineSettings};
use fieldsurvey::output::{self, OutputManager};
use fieldsurvey::probe::{Probes, SystemProbes};
use std::future::Future;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use survey_model::{RunConfiguration, RunPhase};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;

#[derive(Parser, Debug)]
#[command(name = "fieldsurvey")]
#[command(author = "Florian Schüller <schuellerf@gmail.com>")]
#[command(version)]
#[command(about = "Multi-location Wi-Fi survey: signal, latency and throughput under load", long_about = None)]
struct Args {
    /// Configuration file path (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Throughput test server (iperf3 server and ping target)
    #[arg(long)]
    host: String,

    /// Iterations per location (1-5)
    #[arg(short, long, default_value_t = 3)]
    iterations: u32,

    /// Throughput test duration in seconds (at least 5)
    #[arg(short, long, default_value_t = 60)]
    duration: u64,

    /// Directory for the JSON/CSV results
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

/// Operator input, one command per stdin line
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Resume,
    Stop,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" | "r" | "resume" => Command::Resume,
            "s" | "q" | "stop" | "quit" => Command::Stop,
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &args.output_dir {
        config.export.directory = dir.clone();
    }

    // Initialize tracing; stdout belongs to the progress display
    let level: Directive = config
        .logging
        .level
        .parse()
        .with_context(|| format!("Invalid logging.level: {}", config.logging.level))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level))
        .with_writer(std::io::stderr)
        .init();

    info!("Fieldsurvey v{}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file given, using defaults"),
    }

    let run = RunConfiguration::new(args.host.as_str(), args.iterations, args.duration)?;
    std::fs::create_dir_all(&config.export.directory)
        .with_context(|| format!("Failed to create output directory {:?}", config.export.directory))?;

    let engine = Engine::new(
        SystemProbes::from_config(&config),
        EngineSettings::from_config(&config),
    );
    engine.start(run).await?;

    let mut output = OutputManager::new(&config.output);
    run_survey(&engine, &config, &mut output).await?;

    // The worker may still be tearing down probes after a forced stop
    let second_interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    if !settle(&engine, second_interrupt).await {
        warn!("Interrupted again, exporting without waiting for the survey worker");
    }
    let state = engine.snapshot().await;

    output.update(&state)?;
    output.print_summary(&state)?;

    for path in output::export_run(&state, &config.export, Local::now())? {
        println!("Results written to {}", path.display());
    }

    if state.phase == RunPhase::Error {
        anyhow::bail!(
            "Survey failed: {}",
            state.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

/// Display progress and forward operator commands until the run is terminal
async fn run_survey<P: Probes>(engine: &Engine<P>, config: &Config, output: &mut OutputManager) -> Result<()> {
    let mut commands = spawn_stdin_reader();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.output.refresh_interval_ms.max(1)));
    let mut prompted = false;

    info!("Survey running (Enter/'r' resumes at a pause, 's'/'q' or Ctrl+C stops)");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = engine.snapshot().await;
                output.update(&state)?;

                match state.phase {
                    RunPhase::Paused if !prompted => {
                        println!("Move to the next location, then press Enter to resume ('s' to stop).");
                        prompted = true;
                    }
                    RunPhase::Paused => {}
                    _ => prompted = false,
                }

                if state.phase.is_terminal() {
                    return Ok(());
                }
            }
            Some(line) = commands.recv() => {
                handle_command(engine, Command::parse(&line)).await;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("Ctrl+C received");
                handle_command(engine, Command::Stop).await;
            }
        }
    }
}

/// Wait for the survey worker unless `interrupt` completes first; `true` when the worker exited
async fn settle<P, F>(engine: &Engine<P>, interrupt: F) -> bool
where
    P: Probes,
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = engine.wait() => true,
        _ = interrupt => false,
    }
}

async fn handle_command<P: Probes>(engine: &Engine<P>, command: Command) {
    let result = match command {
        Command::Resume => engine.resume().await,
        Command::Stop => engine.stop().await,
        Command::Unknown(input) => {
            warn!("Unknown command {:?} (use 'r' to resume, 's' to stop)", input);
            return;
        }
    };
    if let Err(e) = result {
        warn!("{}", e);
    }
}

/// Forward stdin lines to the async side.
///
/// A plain thread, so a pending read never holds up process exit.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("\n"), Command::Resume);
        assert_eq!(Command::parse(" R "), Command::Resume);
        assert_eq!(Command::parse("s"), Command::Stop);
        assert_eq!(Command::parse("Q"), Command::Stop);
        assert_eq!(Command::parse("next"), Command::Unknown("next".to_string()));
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["fieldsurvey", "--host", "10.0.0.5"]).unwrap();
        assert_eq!(args.iterations, 3);
        assert_eq!(args.duration, 60);
        assert!(args.config.is_none());
        assert!(args.output_dir.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_settle_gives_up_on_interrupt() {
        let mut config = Config::default();
        config.tools.signal = "sleep 30".to_string();
        config.timing.signal_timeout_s = 30;
        config.timing.stop_ack_ms = 50;

        let engine = Engine::new(SystemProbes::from_config(&config), EngineSettings::from_config(&config));
        engine.start(RunConfiguration::new("127.0.0.1", 1, 5).unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Forced stop: the worker is still inside the signal query
        engine.stop().await.unwrap();
        assert_eq!(engine.snapshot().await.phase, RunPhase::Stopped);

        let waiting = tokio::time::timeout(
            Duration::from_millis(200),
            settle(&engine, std::future::pending::<()>()),
        )
        .await;
        assert!(waiting.is_err());

        assert!(!settle(&engine, std::future::ready(())).await);
    }
}
