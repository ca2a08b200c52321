//! Hub side: one task group per camera
//!
//! ```text
//!                     Hub::run(shutdown)
//!                            │ JoinSet
//!        ┌───────────────────┼────────────────────┐
//!        ▼                   ▼                    ▼
//!  CameraPipeline      CameraPipeline       MotionDetector
//!   "front-door"          "garage"           "front-door"
//! ```
//!
//! Cameras share nothing but the transport handle. A camera whose stream
//! cannot be declared, or whose transcoder keeps failing, ends its own group
//! and leaves the others running.

pub mod config;
pub mod pipeline;
pub mod publisher;

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraList;
use crate::capture::{CaptureOutcome, CommandSpec, ProcessLauncher, SystemLauncher};
use crate::motion::{AlertSink, MotionDetector};
use crate::transport::SharedTransport;

pub use config::HubConfig;
pub use pipeline::{CameraPipeline, PipelineOutcome, PipelineReport};
pub use publisher::StreamPublisher;

enum HubTask {
    Pipeline(PipelineReport),
    Motion { camera: String, outcome: CaptureOutcome },
}

/// Runs every configured camera
pub struct Hub {
    config: HubConfig,
    cameras: CameraList,
    transport: SharedTransport,
    alerts: Arc<dyn AlertSink>,
    launcher: Arc<dyn ProcessLauncher>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        cameras: CameraList,
        transport: SharedTransport,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            cameras,
            transport,
            alerts,
            launcher: Arc::new(SystemLauncher),
        }
    }

    /// Use a different process launcher for capture and motion analysis
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Run all cameras until each has ended or `shutdown` fires
    ///
    /// Returns one report per camera pipeline, in completion order.
    pub async fn run(self, shutdown: CancellationToken) -> Vec<PipelineReport> {
        let mut tasks = JoinSet::new();

        tracing::info!(
            hub_id = %self.config.hub_id,
            cameras = self.cameras.len(),
            motion = self.config.motion.enabled,
            "Hub starting"
        );

        for camera in self.cameras.iter() {
            if self.config.motion.enabled {
                let detector = MotionDetector::new(
                    &camera.name,
                    CommandSpec::motion(&self.config.ffmpeg, camera),
                    &self.config.motion,
                    camera.retry_policy(&self.config.retry),
                    Arc::clone(&self.launcher),
                    Arc::clone(&self.alerts),
                );
                let token = shutdown.child_token();
                tasks.spawn(async move {
                    let camera = detector.camera().to_string();
                    let outcome = detector.run(token).await;
                    HubTask::Motion { camera, outcome }
                });
            }

            let pipeline = CameraPipeline::new(
                camera.clone(),
                &self.config,
                Arc::clone(&self.transport),
                Arc::clone(&self.launcher),
            );
            let token = shutdown.clone();
            tasks.spawn(async move { HubTask::Pipeline(pipeline.run(token).await) });
        }

        let mut reports = Vec::with_capacity(self.cameras.len());
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(HubTask::Pipeline(report)) => reports.push(report),
                Ok(HubTask::Motion { camera, outcome }) => {
                    tracing::info!(camera = %camera, outcome = ?outcome, "Motion detection stopped");
                }
                Err(e) => tracing::error!(error = %e, "Camera task failed"),
            }
        }

        tracing::info!(hub_id = %self.config.hub_id, "Hub stopped");
        reports
    }
}
