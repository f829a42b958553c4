//! CLI Entry Point for tem-logger
//!
//! Provides command-line access to the station tools:
//! - Logging the stage position to a CSV file until interrupted
//! - Blanking, unblanking or toggling the beam
//!
//! # Usage
//!
//! Log at 10 Hz to the default file:
//! ```bash
//! tem-logger log
//! ```
//!
//! Log every 0.5 s, aborting after 20 consecutive read failures:
//! ```bash
//! tem-logger log C:/jeol_dnr/stage.csv 0.5 --max-failures 20
//! ```
//!
//! Toggle the beam blank:
//! ```bash
//! tem-logger blank toggle
//! ```
//!
//! The binary drives the simulated instrument; station builds link a vendor
//! binding through `InstrumentHandle`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tem_logger::beam::{self, BeamCommand, DEFAULT_COMMAND_TIMEOUT};
use tem_logger::config::{ConfigError, LoggerConfig};
use tem_logger::error::{LoggerError, EXIT_CONFIG};
use tem_logger::instrument::mock::SimulatedTem;
use tem_logger::lifecycle::run_logger;

#[derive(Parser)]
#[command(name = "tem-logger")]
#[command(about = "Stage position logging and beam-blank control for TEM stations", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/tem_logger.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log the stage position until Ctrl+C
    Log {
        /// CSV file to write
        output: Option<PathBuf>,

        /// Sampling interval in seconds
        #[arg(value_parser = parse_seconds)]
        interval: Option<Duration>,

        /// Abort after more than N consecutive read failures (0 = never)
        #[arg(long)]
        max_failures: Option<u32>,

        /// Per-read timeout in seconds (capped at the interval)
        #[arg(long, value_parser = parse_seconds)]
        read_timeout: Option<Duration>,

        /// Stop after N samples instead of waiting for Ctrl+C
        #[arg(long)]
        samples: Option<u64>,

        /// Log progress every N successful samples (0 = never)
        #[arg(long)]
        progress_every: Option<u64>,
    },

    /// Blank, unblank or toggle the beam
    Blank {
        /// Action to perform
        #[arg(value_enum)]
        action: BlankAction,

        /// Command timeout in seconds
        #[arg(long, value_parser = parse_seconds)]
        timeout: Option<Duration>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BlankAction {
    On,
    Off,
    Toggle,
    Status,
}

impl From<BlankAction> for BeamCommand {
    fn from(action: BlankAction) -> Self {
        match action {
            BlankAction::On => BeamCommand::On,
            BlankAction::Off => BeamCommand::Off,
            BlankAction::Toggle => BeamCommand::Toggle,
            BlankAction::Status => BeamCommand::Status,
        }
    }
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("must be a positive number of seconds".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<LoggerConfig, ConfigError> {
    match path {
        Some(path) => LoggerConfig::load_from(path),
        None => LoggerConfig::load(),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    init_tracing(&config.application.log_level);

    match cli.command {
        Commands::Log {
            output,
            interval,
            max_failures,
            read_timeout,
            samples,
            progress_every,
        } => {
            if let Some(output) = output {
                config.poll.output_path = output;
            }
            if let Some(interval) = interval {
                config.poll.interval = interval;
            }
            if let Some(limit) = max_failures {
                config.poll.max_consecutive_failures = limit;
            }
            if read_timeout.is_some() {
                config.poll.read_timeout = read_timeout;
            }
            if let Some(every) = progress_every {
                config.poll.progress_every = every;
            }

            let poll = match config.poll_config() {
                Ok(poll) => poll.with_max_samples(samples),
                Err(err) => {
                    eprintln!("{err}");
                    return ExitCode::from(EXIT_CONFIG);
                }
            };

            println!("TEM Stage Position Logger");
            println!("=========================");
            let instrument = SimulatedTem::new();
            run_logger(poll, &instrument).await
        }

        Commands::Blank { action, timeout } => {
            let instrument = SimulatedTem::new();
            let limit = timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
            match beam::apply(&instrument, action.into(), limit).await {
                Ok(state) => {
                    println!("Beam is {state}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    let err = LoggerError::from(err);
                    eprintln!("{err}");
                    ExitCode::from(err.exit_code())
                }
            }
        }
    }
}
