// radropi - watch the sky, track what moves, log what matters

use anyhow::Context;
use clap::Parser;
use radropi_server::{Components, Orchestrator, SystemConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "radropi", version, about = "Meteor and asteroid detector with dish tracking")]
struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the mock servo driver and position service even if ports are configured
    #[arg(long)]
    mock: bool,

    /// Capture live frames from this camera index
    #[arg(long)]
    camera: Option<u32>,

    /// Number of frames the synthetic scene plays
    #[arg(long)]
    synthetic_frames: Option<u64>,

    /// Directory for detection records, images and session exports
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SystemConfig> {
    let mut config = match &cli.config {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SystemConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    if cli.mock {
        config.use_mock_hardware();
    }
    if let Some(id) = cli.camera {
        config.vision.camera.camera_id = id;
        config.vision.camera.live_capture = true;
        config.vision.camera.replay_dir = None;
    }
    if let Some(frames) = cli.synthetic_frames {
        config.synthetic.frame_count = frames;
    }
    if let Some(dir) = &cli.log_dir {
        config.logger.log_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("🔭 Starting radropi {}", env!("CARGO_PKG_VERSION"));
    let config = load_config(&cli)?;
    info!(
        "📷 {} fps, logging to {}",
        config.vision.camera.frame_rate,
        config.logger.log_dir.display()
    );

    let components = Components::from_config(&config)?;
    let mut orchestrator = Orchestrator::new(config)?;
    let report = orchestrator
        .run_until(components, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!(
        "☄️  Session: {} meteor, {} asteroid, {} non-meteor detections",
        report.session.as_ref().map_or(0, |s| s.detections.meteor),
        report.session.as_ref().map_or(0, |s| s.detections.asteroid),
        report.session.as_ref().map_or(0, |s| s.detections.non_meteor)
    );
    info!(
        "📊 Classifier: {} calls, {} timeouts, {} failures; servos: {} commands, {} parks, {} write failures",
        report.classifier.calls,
        report.classifier.timeouts,
        report.classifier.failures,
        report.servo.commands,
        report.servo.parks,
        report.servo.write_failures
    );
    info!("👋 radropi stopped");
    Ok(())
}
