//! Per-camera task group
//!
//! ```text
//!   CaptureSupervisor ─┐
//!   SegmentWatcher ────┼── share `done` (child of the hub shutdown token)
//!   StreamPublisher ───┘
//! ```
//!
//! When the supervisor returns (halted or cancelled) `done` fires, the
//! watcher makes its final pass and drops its sender, and the publisher
//! drains what is left before the group exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::camera::CameraConfig;
use crate::capture::{
    CaptureOutcome, CaptureRunState, CaptureSupervisor, CommandSpec, ProcessLauncher,
    SegmentWatcher, WatcherConfig,
};
use crate::stats::PublishStats;
use crate::transport::{SharedTransport, StreamIdentity};

use super::config::HubConfig;
use super::publisher::StreamPublisher;

/// How a camera's task group ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The capture loop ended
    Finished(CaptureOutcome),
    /// The stream could not be declared, nothing was started
    Skipped,
}

/// Summary of one camera run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub camera: String,
    pub outcome: PipelineOutcome,
    /// Segments the watcher forwarded
    pub forwarded: u64,
    pub published: PublishStats,
}

/// All tasks of one camera
pub struct CameraPipeline {
    camera: CameraConfig,
    identity: StreamIdentity,
    directory: PathBuf,
    config: HubConfig,
    transport: SharedTransport,
    launcher: Arc<dyn ProcessLauncher>,
}

impl CameraPipeline {
    pub fn new(
        camera: CameraConfig,
        config: &HubConfig,
        transport: SharedTransport,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let identity = StreamIdentity::new(&config.hub_id, &camera.name);
        let directory = config.data_root.join(&camera.name);
        Self {
            camera,
            identity,
            directory,
            config: config.clone(),
            transport,
            launcher,
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Private segment directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Run the camera until its capture loop ends or `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> PipelineReport {
        let name = self.camera.name.clone();

        let publisher = match StreamPublisher::open(
            self.identity.clone(),
            Arc::clone(&self.transport),
            &self.config.retention,
        )
        .await
        {
            Ok(publisher) => publisher,
            Err(e) => {
                tracing::error!(camera = %name, error = %e, "Failed to declare stream, camera skipped");
                return PipelineReport {
                    camera: name,
                    outcome: PipelineOutcome::Skipped,
                    forwarded: 0,
                    published: PublishStats::default(),
                };
            }
        };

        // The watcher needs the directory before the transcoder first writes
        if let Err(e) = tokio::fs::create_dir_all(&self.directory).await {
            tracing::warn!(camera = %name, directory = %self.directory.display(), error = %e, "Failed to create segment directory");
        }

        let done = shutdown.child_token();
        let (state, segments_rx, errors_rx) = CaptureRunState::new(
            &name,
            self.directory.clone(),
            self.config.channel_capacity,
            done,
        );

        let supervisor = CaptureSupervisor::new(
            &name,
            CommandSpec::capture(&self.config.ffmpeg, &self.camera, &self.directory),
            self.directory.clone(),
            self.camera.retry_policy(&self.config.retry),
            Arc::clone(&self.launcher),
        );
        let watcher = SegmentWatcher::new(
            &name,
            self.directory.clone(),
            WatcherConfig::for_segment(self.camera.segment_duration())
                .notify(self.config.watcher_notify),
        );

        tracing::info!(
            camera = %name,
            camera_type = %self.camera.camera_type,
            stream = %self.identity,
            directory = %state.directory.display(),
            "Camera pipeline starting"
        );

        let CaptureRunState {
            segments,
            errors,
            done,
            ..
        } = state;

        let watcher_task = tokio::spawn(watcher.run(segments, errors, done.clone()));
        let publisher_task = tokio::spawn(publisher.run(segments_rx, errors_rx));

        let outcome = supervisor.run(done.clone()).await;
        done.cancel();

        let forwarded = match watcher_task.await {
            Ok(forwarded) => forwarded,
            Err(e) => {
                tracing::error!(camera = %name, error = %e, "Segment watcher failed");
                0
            }
        };
        let published = match publisher_task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(camera = %name, error = %e, "Publisher failed");
                PublishStats::default()
            }
        };

        tracing::info!(
            camera = %name,
            outcome = ?outcome,
            forwarded,
            published = published.published,
            "Camera pipeline stopped"
        );

        PipelineReport {
            camera: name,
            outcome: PipelineOutcome::Finished(outcome),
            forwarded,
            published,
        }
    }
}
