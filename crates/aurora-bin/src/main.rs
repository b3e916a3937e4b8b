//! Aurora entrypoint.

mod engine;
mod scripts;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::tick;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use engine::{BusSpec, Engine};

/// Scheduler cadence: UDP polling and preset restarts.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "aurora", version, about = "Multi-bus WS281x LED engine")]
struct Args {
    /// Data directory for bus configs, presets and LED profiles.
    /// Defaults to the platform config dir.
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// Buses to bring up, as NAME=LENGTH pairs.
    #[arg(long = "bus", value_name = "NAME=LENGTH", default_value = "led0=60")]
    buses: Vec<String>,

    /// Run for this many seconds, then shut down (for exercising a
    /// configuration; without it the engine runs until killed).
    #[arg(long = "run-secs")]
    run_secs: Option<u64>,
}

fn configure_logging() -> Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(".", "aurora.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}

fn parse_bus_spec(spec: &str) -> Result<BusSpec> {
    let Some((name, length)) = spec.split_once('=') else {
        bail!("bus spec {spec:?} is not NAME=LENGTH");
    };
    if !core_fs::names::allowed_file_name(name) {
        bail!("bus name {name:?} is not a safe name");
    }
    let default_length: usize = length
        .parse()
        .with_context(|| format!("bus length in {spec:?}"))?;

    Ok(BusSpec {
        name: name.to_owned(),
        default_length,
    })
}

fn default_data_dir() -> PathBuf {
    if let Some(dir) = dirs::config_dir() {
        return dir.join("aurora");
    }
    PathBuf::from("aurora-data")
}

fn main() -> Result<()> {
    let _log_guard = configure_logging()?;
    let args = Args::parse();

    let specs: Vec<BusSpec> = args
        .buses
        .iter()
        .map(|s| parse_bus_spec(s))
        .collect::<Result<_>>()?;

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    info!(target: "runtime", data_dir = %data_dir.display(), buses = specs.len(), "startup");

    let engine = Engine::new(&data_dir, &specs)?;
    scripts::register_builtin_scripts(engine.registry());
    engine.load_default_presets();

    let deadline = args.run_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let ticker = tick(TICK_INTERVAL);

    loop {
        ticker.recv().expect("ticker channel closed");
        engine.tick();

        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            break;
        }
    }

    engine.shutdown();
    info!(target: "runtime", "shutdown complete");
    Ok(())
}
