//! Building hub video relay
//!
//! Runs the camera hub and the viewer server in one process, connected by an
//! in-process stream broker.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use camrelay::camera::CameraList;
use camrelay::hub::{Hub, HubConfig};
use camrelay::motion::TracingAlertSink;
use camrelay::server::{ServerConfig, VideoServer};
use camrelay::transport::MemoryBroker;

#[derive(Debug, Parser)]
#[command(name = "camrelay", version, about = "Camera capture and live WebSocket fan-out")]
struct Args {
    /// Camera list (JSON)
    #[arg(long, default_value = "cameras.json")]
    cameras: PathBuf,

    /// Hub identifier used in stream names
    #[arg(long, env = "HUB_ID", default_value = "local")]
    hub_id: String,

    /// Viewer gateway address
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Root of the per-camera capture directories
    ///
    /// Segments are deleted here once forwarded.
    #[arg(long, default_value = "/tmp/data")]
    data_root: PathBuf,

    /// Root of the per-stream HLS directories, served under /hls and /download
    ///
    /// Must differ from --data-root, whose segments do not outlive forwarding.
    #[arg(long, default_value = "/tmp/hls")]
    hls_root: PathBuf,

    /// Static assets served by the gateway
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,

    /// Transcoder program
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,

    /// Write segments over 1000 bytes to this directory
    #[arg(long)]
    debug_dump: Option<PathBuf>,

    /// Disable motion detection
    #[arg(long)]
    no_motion: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "camrelay=debug,tower_http=debug"
    } else {
        "camrelay=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if args.hls_root == args.data_root {
        anyhow::bail!(
            "--hls-root must differ from --data-root ({})",
            args.data_root.display()
        );
    }

    let cameras = CameraList::load(&args.cameras)
        .with_context(|| format!("loading camera list {}", args.cameras.display()))?;

    let mut hub_config = HubConfig::default()
        .hub_id(&args.hub_id)
        .data_root(&args.data_root)
        .ffmpeg(&args.ffmpeg);
    if args.no_motion {
        hub_config = hub_config.disable_motion();
    }

    let mut server_config = ServerConfig::with_addr(args.bind)
        .hls_root(&args.hls_root)
        .static_dir(&args.static_dir);
    if let Some(dir) = &args.debug_dump {
        server_config = server_config.debug_dump_dir(dir);
    }

    let broker = Arc::new(MemoryBroker::new());
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Interrupt received, shutting down"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
            }
            shutdown.cancel();
        }
    });

    let hub = Hub::new(hub_config, cameras, broker.clone(), Arc::new(TracingAlertSink));
    let server = VideoServer::new(server_config, broker.clone());

    let hub_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { hub.run(shutdown).await }
    });

    let served = server.run_until(shutdown.clone()).await;
    shutdown.cancel();

    let reports = hub_task.await.context("hub task failed")?;
    for report in &reports {
        tracing::info!(
            camera = %report.camera,
            outcome = ?report.outcome,
            forwarded = report.forwarded,
            published = report.published.published,
            "Camera finished"
        );
    }
    broker.close();

    served.context("video server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_capture_and_hls_roots_are_separate() {
        let args = Args::try_parse_from(["camrelay"]).unwrap();
        assert_eq!(args.data_root, PathBuf::from("/tmp/data"));
        assert_eq!(args.hls_root, PathBuf::from("/tmp/hls"));

        let args = Args::try_parse_from(["camrelay", "--hls-root", "/srv/hls"]).unwrap();
        assert_eq!(args.hls_root, PathBuf::from("/srv/hls"));
    }
}
