//! Landmark Camera - Main Entry Point
//!
//! Runs the camera view headless: mounts the inference loop, logs the overlay
//! once a second and shuts down cleanly on Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use landmark_camera::config::AppConfig;
use landmark_camera::lifecycle::MountOutcome;
use landmark_camera::telemetry::init_logging;
use landmark_camera::App;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    let config_arg = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_arg).context("Failed to load configuration")?;

    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Landmark Camera v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let mut app = App::new(config);

    match app.start().await? {
        MountOutcome::Started => {}
        MountOutcome::CameraWithheld => {
            tracing::warn!("Camera access not granted, nothing to show");
            return Ok(());
        }
        MountOutcome::CameraUnavailable => {
            anyhow::bail!("Camera could not be opened");
        }
    }

    tracing::info!("Press Ctrl-C to exit");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut report = tokio::time::interval(REPORT_INTERVAL);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = report.tick() => app.report(),
        }
    }

    tracing::info!("Shutting down...");
    match app.stop().await {
        Some(stats) => tracing::info!(
            cycles = stats.cycles,
            frames_pulled = stats.frames_pulled,
            frames_released = stats.frames_released,
            published = stats.published,
            skipped_no_detector = stats.skipped_no_detector,
            failures = stats.failures,
            stale_dropped = stats.stale_dropped,
            "Inference loop finished"
        ),
        None => tracing::warn!("Inference loop did not report statistics"),
    }

    Ok(())
}
