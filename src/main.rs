//! Edgeframe demo: camera frames into the edge-detection processor

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};

use edgeframe::capture::device::{Size, Surface};
use edgeframe::capture::VirtualCamera;
use edgeframe::processor::LoggingProcessor;
use edgeframe::{Config, FrameSource, ProcessingSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeframe=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Edgeframe launching...");

    let config_path = std::env::var_os("EDGEFRAME_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!("Capture config: {:?}", config.capture);

    let camera = VirtualCamera::with_back_camera(Size::new(
        config.capture.target_width,
        config.capture.target_height,
    ));
    let mut source = FrameSource::new(camera, config.capture.clone());
    source.set_preview_surface(Surface::new(0, "preview"));

    let mut session = ProcessingSession::start(
        source,
        LoggingProcessor::default(),
        config.pipeline.fps_window(),
    )?;

    let run_for = config.pipeline.run_for_secs;
    let run_limit = async move {
        match run_for {
            0 => std::future::pending::<()>().await,
            secs => tokio::time::sleep(Duration::from_secs(secs)).await,
        }
    };
    tokio::pin!(run_limit);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut report = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted");
                break;
            }
            _ = &mut run_limit => {
                info!("Run time elapsed");
                break;
            }
            _ = report.tick() => {
                let status = session.status();
                let stats = session.delivery_stats();
                info!(
                    "FPS: {:.1} | {:?}/{:?} | frames {} delivered {} dropped {} overwritten {}",
                    session.fps(),
                    status.mode,
                    status.session,
                    status.frames_produced,
                    stats.delivered,
                    stats.dropped,
                    stats.overwritten,
                );
            }
        }
    }

    // Closing waits on the worker thread
    let session = tokio::task::spawn_blocking(move || {
        session.shutdown();
        session
    })
    .await?;
    info!("Shutdown complete ({} frames)", session.status().frames_produced);

    Ok(())
}
