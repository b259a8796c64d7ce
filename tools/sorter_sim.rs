// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bench simulator for the inspection sorter.
//!
//! Runs the full coordinator against a simulated encoder, camera and grader.
//! Publishes to an in-memory bus by default, or to the configured MQTT
//! broker with `--mqtt`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sorter::prelude::*;
use sorter_config::{apply_cli_overrides, validate_config};
use sorter_hal::{FnGrader, GradingError};
use sorter_observability::{debug_flags_help, parse_debug_flags, LoggingGuard};
use tracing::{info, warn};

struct SimArgs {
    config: Option<PathBuf>,
    duration: Duration,
    counts_per_sec: u64,
    frame_bytes: usize,
    use_mqtt: bool,
    export: Option<PathBuf>,
    overrides: HashMap<String, String>,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: sorter-sim [--config <path>] [--duration <secs>] [--speed <counts/s>]\n\
         \x20                 [--frame-bytes <n>] [--mqtt] [--export <path.json|path.csv>]\n\
         \x20                 [--set <key>=<value>]... [--debug-<crate>]...\n\n\
         Defaults:\n\
         - duration: 10\n\
         - speed: 600\n\
         - frame-bytes: 48000\n\n{}",
        debug_flags_help()
    );
    process::exit(2);
}

fn parse_args() -> SimArgs {
    let mut parsed = SimArgs {
        config: None,
        duration: Duration::from_secs(10),
        counts_per_sec: 600,
        frame_bytes: 48_000,
        use_mqtt: false,
        export: None,
        overrides: HashMap::new(),
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                parsed.config = Some(PathBuf::from(args.next().unwrap_or_else(|| usage_and_exit())));
            }
            "--duration" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                let secs = v.parse::<u64>().unwrap_or_else(|_| usage_and_exit());
                parsed.duration = Duration::from_secs(secs);
            }
            "--speed" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                parsed.counts_per_sec = v.parse::<u64>().unwrap_or_else(|_| usage_and_exit()).max(1);
            }
            "--frame-bytes" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                parsed.frame_bytes = v.parse::<usize>().unwrap_or_else(|_| usage_and_exit());
            }
            "--mqtt" => parsed.use_mqtt = true,
            "--export" => {
                parsed.export = Some(PathBuf::from(args.next().unwrap_or_else(|| usage_and_exit())));
            }
            "--set" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                let (key, value) = v.split_once('=').unwrap_or_else(|| usage_and_exit());
                parsed.overrides.insert(key.to_string(), value.to_string());
            }
            "-h" | "--help" => usage_and_exit(),
            other if other.starts_with("--debug-") => {}
            other => {
                eprintln!("Unknown argument: {other}");
                usage_and_exit();
            }
        }
    }

    parsed
}

fn load(args: &SimArgs) -> Result<SorterConfig> {
    let config = match load_config(args.config.as_deref(), Some(&args.overrides)) {
        Ok(config) => config,
        Err(e) if args.config.is_none() => {
            eprintln!("No configuration file ({e}), using defaults");
            let mut config = SorterConfig::default();
            apply_cli_overrides(&mut config, &args.overrides);
            config
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };
    validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(config: &SorterConfig) -> Result<LoggingGuard> {
    let flags = parse_debug_flags();
    #[cfg(feature = "file-logging")]
    {
        if config.logging.file_logging {
            return sorter_observability::init_logging(
                &flags,
                &config.system.log_level,
                &config.logging.log_dir,
                config.logging.retention_days,
                config.logging.retention_runs,
            );
        }
    }
    sorter_observability::init_logging_console_only(&flags, &config.system.log_level)
}

/// Rotates through grades so every result family shows up on the bus
fn rotating_grader() -> impl Grader {
    let counter = AtomicU64::new(0);
    FnGrader(move |image: &[u8]| {
        if image.is_empty() {
            return Err(GradingError::MalformedImage("empty image".to_string()));
        }
        let n = counter.fetch_add(1, Ordering::Relaxed);
        let record = match n % 5 {
            0 | 1 => GradeRecord::new(Grade::A, 190.0 + (n % 7) as f64, 14.0),
            2 | 3 => GradeRecord::new(Grade::B, 165.0 + (n % 5) as f64, 12.5),
            _ => GradeRecord::new(Grade::C, 120.0, 9.5).with_defects(["bruise"]),
        };
        Ok(record)
    })
}

fn run<B: MessageBus + 'static>(args: &SimArgs, config: &SorterConfig, bus: B) -> Result<()> {
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemClock::new());
    let tracker = Arc::new(PositionTracker::new(
        Arc::clone(&clock),
        config.encoder.max_edge_rate_hz,
    ));
    let hardware = SorterHardware {
        tracker: Arc::clone(&tracker),
        camera: Box::new(SimulatedCamera::new(args.frame_bytes).with_latency(Duration::from_millis(15))),
        grader: Arc::new(rotating_grader()),
        image_store: Arc::new(FsImageStore::new(&config.publish.image_dir)),
        clock: Arc::clone(&clock),
    };

    let coordinator = SystemCoordinator::from_config(config, hardware, bus)
        .context("Failed to start coordinator")?;

    // Drive the encoder in 10 ms slices at the requested belt speed
    let slice = Duration::from_millis(10);
    let counts_per_slice = (args.counts_per_sec / 100).max(1) as i64;
    let mut encoder = SimulatedEncoder::new(1_000_000 / args.counts_per_sec);
    let started = Instant::now();
    let mut last_report = Instant::now();
    while started.elapsed() < args.duration {
        encoder.advance(&tracker, counts_per_slice);
        std::thread::sleep(slice);

        if last_report.elapsed() >= Duration::from_secs(2) {
            let stats = coordinator.statistics();
            info!(
                "position {} | fired {} | graded {} | link {}",
                stats.encoder_position,
                stats.triggers_fired,
                stats.graded.total(),
                coordinator.link_state()
            );
            last_report = Instant::now();
        }
    }

    if let Some(path) = &args.export {
        let count = coordinator.export_history(path)?;
        info!("Exported {} result(s) to {}", count, path.display());
    }

    let stats = coordinator.shutdown()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    if stats.publish.messages_dropped > 0 {
        warn!("{} message(s) were never delivered", stats.publish.messages_dropped);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args();
    let config = load(&args)?;
    let _guard = init_logging(&config)?;
    info!("sorter-sim {} starting as '{}'", sorter::VERSION, config.system.client_id);

    if args.use_mqtt {
        #[cfg(feature = "mqtt")]
        {
            return run(&args, &config, sorter::wiring::mqtt_bus(&config));
        }
        #[cfg(not(feature = "mqtt"))]
        {
            anyhow::bail!("--mqtt requires the `mqtt` feature");
        }
    }
    run(&args, &config, InMemoryBus::new())
}
