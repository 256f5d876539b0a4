use clap::Parser;
use hl_core::LabelError;
use std::path::PathBuf;
use tracing::{error, info};

mod config;
mod metrics;
mod runner;

use metrics::RunSummary;
use runner::LabelingJob;

#[derive(Parser, Debug)]
#[command(name = "hand-labeler")]
#[command(about = "Burns hand-skeleton overlays onto recorded session videos", long_about = None)]
struct Args {
    /// Session directory holding the video and both keypoint tables
    #[arg(short, long, required_unless_present_any = ["check_support", "list_encoders"])]
    session: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "hand-labeler.toml")]
    config: PathBuf,

    /// Output frame rate (overrides config)
    #[arg(short, long)]
    fps: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Report whether labeling can run on this machine and exit
    #[arg(long)]
    check_support: bool,

    /// List available encoders and exit
    #[arg(long)]
    list_encoders: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    info!("Hand labeler v{}", env!("CARGO_PKG_VERSION"));

    if args.list_encoders {
        list_available_encoders();
        return Ok(());
    }

    if args.check_support {
        let supported = hl_labeler::is_supported();
        println!("Labeling supported: {}", if supported { "yes" } else { "no" });
        if !supported {
            std::process::exit(1);
        }
        return Ok(());
    }

    let config = config::load(&args.config, args.fps)?;

    info!("Configuration:");
    info!(
        "  Output: {} fps, {} kbps, {:?}, keyframe every {}s",
        config.output.fps, config.output.bitrate_kbps, config.output.codec, config.output.keyframe_interval_secs
    );
    info!("  Sync tolerance: {} ms", config.sync.tolerance_ms);

    let Some(session) = args.session else {
        anyhow::bail!("--session is required");
    };

    runner::ensure_media_backend()?;

    let fps = config.output.fps;
    match LabelingJob::new(session, config).run().await {
        Ok(outcome) => {
            RunSummary::from_outcome(&outcome, fps).log();
            println!("{}", outcome.output.display());
            Ok(())
        }
        Err(e) => {
            if e.downcast_ref::<LabelError>().is_some_and(LabelError::is_device_unsupported) {
                error!("This machine cannot run labeling: {}", e);
            }
            Err(e)
        }
    }
}

fn list_available_encoders() {
    println!("Available video encoders:");
    let encoders = hl_encoder::EncoderFactory::list_available_encoders();
    for (i, encoder) in encoders.iter().enumerate() {
        println!("  {}. {}", i + 1, encoder);
    }
}
