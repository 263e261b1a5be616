//! # mscope Stage Driver Binary
//!
//! Drives the microscope stage over the bus: opens the transport, sends the
//! init frames, wakes the dequeue scheduler and feeds it moves.
//!
//! # Usage
//!
//! ```bash
//! # Run against the emulated controller
//! mscope_hal --config config/stage.toml --simulate
//!
//! # Replay a list of moves, then exit
//! mscope_hal -s --moves config/moves.toml
//!
//! # Verbose JSON logs
//! mscope_hal -s -v --json
//! ```

use clap::Parser;
use mscope_common::config::{ConfigError, ConfigLoader};
use mscope_common::stage::config::StageConfig;
use mscope_hal::core::StageCore;
use mscope_hal::error::StageError;
use mscope_hal::status::StatusReporter;
use mscope_hal::transport_registry::TransportRegistry;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Interval between status reports.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Main loop poll period.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// mscope stage driver - bus-negotiated motion for the microscope stage
#[derive(Parser, Debug)]
#[command(name = "mscope_hal")]
#[command(version)]
#[command(about = "Microscope stage driver with readiness-negotiated bus moves")]
#[command(long_about = None)]
struct Args {
    /// Path to the stage configuration file
    #[arg(short, long, default_value = mscope_common::consts::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Force the simulation transport; a missing config file falls back to defaults
    #[arg(short = 's', long)]
    simulate: bool,

    /// Use this registered transport instead of the configured one
    #[arg(short, long)]
    transport: Option<String>,

    /// TOML file with `[[moves]]` to queue after start-up
    #[arg(short, long, value_name = "FILE")]
    moves: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and status in JSON format
    #[arg(long)]
    json: bool,
}

/// One entry of a moves file.
#[derive(Debug, Deserialize)]
struct PlannedMove {
    /// X, Y, Z targets; -1 leaves an axis alone
    target: [f64; 3],
    #[serde(default)]
    feed_rate: f64,
    #[serde(default)]
    invert_feed_rate: bool,
    line: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct MovesFile {
    #[serde(default)]
    moves: Vec<PlannedMove>,
}

fn main() {
    if let Err(e) = run() {
        error!("Stage driver failed: {}", e);
        eprintln!("mscope_hal: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(&args)?;
    setup_tracing(&args, &config);

    info!("mscope stage driver v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.simulate {
        info!("Simulation mode enabled");
        config.stage.transport = "simulation".to_string();
    } else if let Some(ref name) = args.transport {
        info!("Transport from CLI: {}", name);
        config.stage.transport = name.clone();
    }

    let moves = match args.moves {
        Some(ref path) => MovesFile::load(path)?.moves,
        None => Vec::new(),
    };

    let instance = config.shared.service_name.clone();
    let mut core = StageCore::new(config)?;

    let shutdown = core.shutdown_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        shutdown.store(true, Ordering::SeqCst);
    })?;

    let registry = TransportRegistry::with_builtin();
    info!("Registered transports: {:?}", registry.list());
    core.init(&registry)?;
    core.wake_up();

    drive(&core, &moves, &instance, args.json);

    core.shutdown()?;
    info!("mscope stage driver shutdown complete");
    Ok(())
}

/// Feed `moves` without ever blocking in `queue_stage_cmd`, report status
/// once per interval, and return on shutdown or when every move retired.
fn drive(core: &StageCore, moves: &[PlannedMove], instance: &str, json: bool) {
    let shutdown = core.shutdown_flag();
    let mut reporter = StatusReporter::new(instance);
    let mut pending = moves.iter();
    let mut next = pending.next();
    let retired_at_start = core.session().retired_total();
    let mut last_report = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        while let Some(m) = next {
            if core.queue_len() >= core.queue_capacity() {
                break;
            }
            let id = core.queue_stage_cmd(m.target, m.feed_rate, m.invert_feed_rate, m.line);
            info!(id, target = ?m.target, "Move queued");
            next = pending.next();
        }

        let retired = core.session().retired_total() - retired_at_start;
        let done = !moves.is_empty() && next.is_none() && retired >= moves.len() as u64;

        if done || last_report.elapsed() >= STATUS_INTERVAL {
            report(&mut reporter, core, json);
            last_report = Instant::now();
        }
        if done {
            info!("All {} moves retired", moves.len());
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn report(reporter: &mut StatusReporter, core: &StageCore, json: bool) {
    let status = reporter.snapshot(core);
    if json {
        match status.to_json() {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to serialize status: {}", e),
        }
    } else {
        info!(
            "status: awake={} queued={} last_id={} retired={} ticks={} health={:?}",
            status.awake,
            status.queue_depth,
            status.last_completed_id,
            status.retired_total,
            status.timing.cycle_count,
            status.health
        );
    }
}

/// Load the config file; with `--simulate` a missing file means defaults.
fn load_config(args: &Args) -> Result<StageConfig, StageError> {
    match StageCore::load_config(&args.config) {
        Err(StageError::Config(ConfigError::FileNotFound(path))) if args.simulate => {
            eprintln!(
                "mscope_hal: {} not found, using default configuration",
                path.display()
            );
            Ok(StageConfig::default())
        }
        other => other,
    }
}

/// Setup tracing subscriber based on CLI arguments and `[shared] log_level`.
fn setup_tracing(args: &Args, config: &StageConfig) {
    let level = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
