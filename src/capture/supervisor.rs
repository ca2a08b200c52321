//! Transcoder supervision with bounded retries

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::command::CommandSpec;
use super::process::ProcessLauncher;
use super::CaptureError;

/// Restart policy for supervised processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of start attempts before the camera is halted
    pub max_attempts: u32,

    /// Delay before every attempt after the first
    pub delay: Duration,

    /// A run lasting at least this long resets the attempt counter
    pub stable_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Set the number of start attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay between attempts
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the run length that counts as stable
    pub fn stable_after(mut self, duration: Duration) -> Self {
        self.stable_after = duration;
        self
    }
}

/// How a supervision loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Retries exhausted, the camera is halted
    Halted { attempts: u32 },
    /// The completion signal fired
    Cancelled,
}

/// Keeps one camera's transcoder running
pub struct CaptureSupervisor {
    camera: String,
    command: CommandSpec,
    directory: PathBuf,
    policy: RetryPolicy,
    launcher: Arc<dyn ProcessLauncher>,
}

impl CaptureSupervisor {
    pub fn new(
        camera: impl Into<String>,
        command: CommandSpec,
        directory: PathBuf,
        policy: RetryPolicy,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            camera: camera.into(),
            command,
            directory,
            policy,
            launcher,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the supervision loop until retries are exhausted or `done` fires
    ///
    /// Every failed start and every process exit consumes one attempt. The
    /// first attempt starts immediately, later ones wait `policy.delay`.
    pub async fn run(&self, done: CancellationToken) -> CaptureOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&self.directory).await {
            let err = CaptureError::Directory {
                path: self.directory.clone(),
                source: e,
            };
            tracing::error!(camera = %self.camera, error = %err, "Camera halted");
            return CaptureOutcome::Halted { attempts: 0 };
        }

        let mut attempts: u32 = 0;

        loop {
            if attempts >= self.policy.max_attempts {
                let err = CaptureError::RetriesExhausted {
                    camera: self.camera.clone(),
                    attempts,
                };
                tracing::error!(camera = %self.camera, error = %err, "Camera halted");
                return CaptureOutcome::Halted { attempts };
            }

            if attempts > 0 {
                tracing::warn!(
                    camera = %self.camera,
                    attempt = attempts + 1,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = self.policy.delay.as_millis() as u64,
                    "Restarting transcoder"
                );
                tokio::select! {
                    _ = done.cancelled() => return CaptureOutcome::Cancelled,
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }

            attempts += 1;
            tracing::info!(camera = %self.camera, command = %self.command, "Starting transcoder");

            let mut process = match self.launcher.launch(&self.command, false).await {
                Ok(process) => process,
                Err(e) => {
                    let err = CaptureError::Spawn {
                        camera: self.camera.clone(),
                        source: e,
                    };
                    tracing::error!(camera = %self.camera, attempt = attempts, error = %err, "Start failed");
                    continue;
                }
            };

            let started_at = Instant::now();

            let exit = tokio::select! {
                _ = done.cancelled() => None,
                exit = process.wait() => Some(exit),
            };

            let Some(exit) = exit else {
                if let Err(e) = process.kill().await {
                    tracing::warn!(camera = %self.camera, error = %e, "Failed to kill transcoder");
                }
                tracing::info!(camera = %self.camera, "Transcoder stopped");
                return CaptureOutcome::Cancelled;
            };

            let ran_for = started_at.elapsed();
            match exit {
                Ok(exit) => tracing::warn!(
                    camera = %self.camera,
                    status = %exit,
                    ran_for_ms = ran_for.as_millis() as u64,
                    "Transcoder exited"
                ),
                Err(e) => tracing::error!(
                    camera = %self.camera,
                    error = %e,
                    "Failed to wait for transcoder"
                ),
            }

            if ran_for >= self.policy.stable_after {
                // This exit still counts, earlier ones are forgiven
                attempts = 1;
            }
        }
    }
}
