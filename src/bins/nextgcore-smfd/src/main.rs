//! NextGCore SMF (Session Management Function)
//!
//! Daemon wiring for the Gx/S8 session-control core: logging, configuration,
//! the session mirror, and orderly shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use nextgcore_smfd::{MirrorContext, RedisKvStore, SmfConfig, SmfContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// NextGCore SMF - Session Management Function
#[derive(Parser, Debug)]
#[command(name = "nextgcore-smfd")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "SMF Gx policy and S8 session control", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, default_value = "/etc/nextgcore/smf.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'e', long, default_value = "info")]
    log_level: String,

    /// Disable color output
    #[arg(short = 'm', long)]
    no_color: bool,
}

/// Interval between session mirror reconnect attempts
const MIRROR_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    log::info!("NextGCore SMF v{} starting...", env!("CARGO_PKG_VERSION"));

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let config = load_config(&args.config)?;
    log::info!(
        "SMF config: ims_dnn={}, max_num_of_flow={}, t3_response={}s",
        config.ims_dnn, config.max_num_of_flow, config.s8.t3_response
    );

    // Initialize SMF context
    let mut mirror = MirrorContext::new(config.mirror.clone(), Box::new(RedisKvStore::new()));
    mirror.init();
    let mut smf = SmfContext::new(config, mirror);
    log::info!("SMF context initialized");
    log::info!("NextGCore SMF ready");

    run_event_loop(&mut smf, shutdown).await;

    // Graceful shutdown
    log::info!("Shutting down...");
    smf.fini();
    smf.mirror_mut().fini();
    log::info!("SMF context finalized");
    log::info!("NextGCore SMF stopped");

    Ok(())
}

fn load_config(path: &str) -> Result<SmfConfig> {
    if !std::path::Path::new(path).exists() {
        log::info!("Configuration file not found: {}, using defaults", path);
        return Ok(SmfConfig::default());
    }
    log::info!("Loading configuration from {}", path);
    SmfConfig::from_file(path).with_context(|| format!("Failed to load configuration {path}"))
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };
    builder.filter_level(level);
    builder.format_timestamp_millis();

    if args.no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    builder.init();
}

fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    Ok(())
}

async fn run_event_loop(smf: &mut SmfContext, shutdown: Arc<AtomicBool>) {
    log::debug!("Entering main event loop");

    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let mut last_reconnect = tokio::time::Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;

        if smf.mirror().is_enabled()
            && !smf.mirror().is_connected()
            && last_reconnect.elapsed() >= MIRROR_RECONNECT_INTERVAL
        {
            smf.mirror_mut().reconnect();
            last_reconnect = tokio::time::Instant::now();
        }
    }

    log::debug!("Main event loop exited ({} sessions)", smf.sess_count());
}
