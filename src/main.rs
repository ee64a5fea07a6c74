//! # dTouch Link
//!
//! Polls a dTouch wood-drying kiln controller over RS-485 and publishes its
//! temperature, moisture and actuator readings.

use anyhow::{Context, Result};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dtouch_link::config::{Config, LoggingConfig};
use dtouch_link::dtouch::clock::SystemClock;
use dtouch_link::dtouch::DtouchEngine;
use dtouch_link::serial::DtouchSerial;
use dtouch_link::telemetry::{FanOutSink, JsonlSink, LogSink};

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Engine tick period; the receiver's idle gap is measured at this resolution
const TICK_INTERVAL_MS: u64 = 10;

/// Base name of the daily-rotated application log
const LOG_FILE_NAME: &str = "dtouch-link.log";

/// Main entry point for dTouch Link
///
/// # Control Flow
///
/// 1. Load the configuration named by the first argument
/// 2. Set up logging, to stderr and optionally to daily log files
/// 3. Open the serial port and build the engine
/// 4. Tick the engine every 10ms until Ctrl+C
///
/// # Errors
///
/// Returns error if the configuration is invalid, the serial port cannot be
/// opened or the telemetry directory cannot be created. Errors during polling
/// are logged and the loop keeps running.
///
/// # Examples
///
/// ```bash
/// cargo run --release -- /etc/dtouch-link/kiln1.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);

    info!("dTouch Link v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {}", config_path);

    let serial = DtouchSerial::open(&config.serial)?;
    let settings = config.engine_settings();
    let mut engine = DtouchEngine::new(serial, SystemClock::new(), settings);

    let mut sink = FanOutSink::new().with(LogSink);
    if config.telemetry.enabled {
        let jsonl = JsonlSink::new(
            &config.telemetry.log_dir,
            config.telemetry.max_records_per_file,
            config.telemetry.max_files_to_keep,
        )
        .with_context(|| format!("Failed to create telemetry directory {}", config.telemetry.log_dir))?;
        sink = sink.with(jsonl);
        info!("Writing telemetry to {}", config.telemetry.log_dir);
    }

    match engine.command_interval_ms() {
        Some(ms) => info!("Polling device {} every {}ms", settings.address, ms),
        None => warn!("No sensors enabled, nothing will be requested"),
    }
    info!("Press Ctrl+C to exit");

    let mut tick = tick_interval();
    let mut consecutive_errors: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                // Serial reads block, for up to the response timeout on summary controllers
                match tokio::task::block_in_place(|| engine.on_tick(&mut sink)) {
                    Ok(()) => {
                        if consecutive_errors > 0 {
                            info!("Serial link recovered after {} failed ticks", consecutive_errors);
                            consecutive_errors = 0;
                        }
                    }
                    Err(e) => {
                        if consecutive_errors == 0 {
                            warn!("Tick failed: {}", e);
                        } else {
                            debug!("Tick failed: {}", e);
                        }
                        consecutive_errors += 1;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                info!("{} readings left unpublished", engine.queued());
                break;
            }
        }
    }

    Ok(())
}

/// Engine tick timer; ticks missed during a blocking read are not replayed
fn tick_interval() -> Interval {
    let mut tick = interval(Duration::from_millis(TICK_INTERVAL_MS));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. The returned guard must live
/// until shutdown or buffered file output is lost.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}
