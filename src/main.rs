use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{select, unbounded, Sender};
use sysinfo::System;

use stats_on_sight::capture::DirectoryFrameSource;
use stats_on_sight::detection::FullFrameDetector;
use stats_on_sight::messaging::Notification;
use stats_on_sight::surfaces::Surfaces;
use stats_on_sight::upload::HttpScoreService;
use stats_on_sight::{AcquisitionController, Config, ControllerSettings, PipelineParts};

const LOG_TARGET_STARTUP: &str = "stats_on_sight::startup";
const LOG_TARGET_EVENTS: &str = "stats_on_sight::events";

/// Headless Stats on Sight: replays a directory of images as the camera feed
#[derive(Parser, Debug)]
#[command(name = "stats-on-sight", version, about)]
struct Args {
    /// Directory of JPEG or PNG frames replayed as the camera feed
    #[arg(long, value_name = "DIR")]
    frames: PathBuf,

    /// Configuration file (default: user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Scoring service base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Minimum detector confidence (0.0-1.0)
    #[arg(long, value_name = "F")]
    min_confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Retry,
    Lost,
    Quit,
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "retry" | "r" => Some(ConsoleCommand::Retry),
        "lost" | "l" => Some(ConsoleCommand::Lost),
        "quit" | "q" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Initialize tracing with file rotation
///
/// Logs are written to `<config dir>/StatsOnSight/logs/`, one file per day
/// (`stats-on-sight.YYYY-MM-DD.log`). Debug builds also log to the console.
fn initialize_tracing() {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = Config::log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory: {}", e);
    }

    let file_appender = rolling::daily(&log_dir, "stats-on-sight.log");

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);

    #[cfg(debug_assertions)]
    {
        let console_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer)
            .init();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    tracing::info!("Log directory: {}", log_dir.display());
}

fn log_runtime_environment() {
    let version = env!("CARGO_PKG_VERSION");
    let os_name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| "Unknown OS".to_string());
    let kernel = System::kernel_version().unwrap_or_else(|| "Unknown Kernel".to_string());
    let architecture = std::env::consts::ARCH;

    tracing::info!(target: LOG_TARGET_STARTUP, "Starting Stats on Sight v{} on ({})", version, architecture);
    tracing::info!(target: LOG_TARGET_STARTUP, "Operating System: {} (kernel {})", os_name, kernel);

    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    tracing::debug!(target: LOG_TARGET_STARTUP, "Worker threads available: {}", cpus);
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    if let Some(url) = &args.base_url {
        config.service_base_url = url.clone();
    }
    if let Some(confidence) = args.min_confidence {
        config.filters.min_confidence = confidence;
    }
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// Replayed frames come without AR anchors, so no tracking watchdog is armed
fn headless_settings(config: &Config) -> ControllerSettings {
    ControllerSettings {
        tracking_grace: None,
        ..ControllerSettings::from_config(config)
    }
}

/// Forward console commands until stdin closes
fn spawn_console_reader(tx: Sender<ConsoleCommand>) -> Result<()> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => println!("Unknown command '{}' (retry, lost, quit)", line.trim()),
                }
            }
            tracing::debug!("Console input closed");
        })
        .context("Failed to start console reader")?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    initialize_tracing();
    log_runtime_environment();

    let config = load_config(&args)?;
    tracing::info!(
        "Service {} | frames every {} ms | polls every {} ms | min confidence {:.2}",
        config.service_base_url,
        config.frame_interval_ms,
        config.poll_interval_ms,
        config.filters.min_confidence
    );

    let frames = Arc::new(DirectoryFrameSource::open(&args.frames)?);
    let parts = PipelineParts {
        frames,
        detector: Arc::new(FullFrameDetector::default()),
        service: Arc::new(HttpScoreService::from_config(&config)),
        surfaces: Surfaces::logging(),
    };

    let controller = AcquisitionController::spawn(parts, headless_settings(&config))
        .context("Failed to start the acquisition controller")?;
    let (notifications, _subscription) = controller.notifications().subscribe();

    let (quit_tx, quit_rx) = unbounded::<()>();
    ctrlc::set_handler(move || {
        let _ = quit_tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    // Kept alive so a closed stdin does not look like a quit
    let (console_tx, console_rx) = unbounded();
    spawn_console_reader(console_tx.clone())?;

    controller.start()?;
    println!("Commands: retry, lost, quit");

    loop {
        select! {
            recv(quit_rx) -> _ => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
            recv(console_rx) -> command => {
                let result = match command {
                    Ok(ConsoleCommand::Retry) => controller.retry(),
                    Ok(ConsoleCommand::Lost) => controller.tracking_lost(),
                    Ok(ConsoleCommand::Quit) | Err(_) => break,
                };
                if let Err(err) = result {
                    tracing::error!("{err:#}");
                    break;
                }
            }
            recv(notifications) -> notification => match notification {
                Ok(Notification::Shutdown) | Err(_) => break,
                Ok(notification) => {
                    tracing::debug!(target: LOG_TARGET_EVENTS, "{}: {:?}", notification.description(), notification)
                }
            },
        }
    }

    controller.shutdown();
    tracing::info!(
        "Frames forwarded: {}, skipped: {}, detection passes: {}",
        controller.throttler().forwarded(),
        controller.throttler().skipped(),
        controller.throttler().gate().passes()
    );
    drop(console_tx);

    Ok(())
}
