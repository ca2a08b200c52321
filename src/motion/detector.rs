//! Per-camera motion detector process loop

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::process::ProcessStdout;
use crate::capture::{CaptureOutcome, CommandSpec, ProcessLauncher, RetryPolicy};

use super::score::{parse_score_line, MotionConfig, MotionDebouncer};
use super::{AlertSink, MotionEvent};

/// Runs the scene analysis process of one camera
///
/// The analysis process is restarted with the same policy as capture. The
/// debounce state lives in the detector, so a restart never resets the
/// cooldown.
pub struct MotionDetector {
    camera: String,
    command: CommandSpec,
    policy: RetryPolicy,
    launcher: Arc<dyn ProcessLauncher>,
    debouncer: MotionDebouncer,
    sink: Arc<dyn AlertSink>,
}

impl MotionDetector {
    pub fn new(
        camera: impl Into<String>,
        command: CommandSpec,
        config: &MotionConfig,
        policy: RetryPolicy,
        launcher: Arc<dyn ProcessLauncher>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            camera: camera.into(),
            command,
            policy,
            launcher,
            debouncer: MotionDebouncer::new(config),
            sink,
        }
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Run until retries are exhausted or `done` fires
    pub async fn run(mut self, done: CancellationToken) -> CaptureOutcome {
        let mut attempts: u32 = 0;

        loop {
            if attempts >= self.policy.max_attempts {
                tracing::error!(camera = %self.camera, attempts, "Motion detection halted");
                return CaptureOutcome::Halted { attempts };
            }

            if attempts > 0 {
                tokio::select! {
                    _ = done.cancelled() => return CaptureOutcome::Cancelled,
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }

            attempts += 1;
            tracing::info!(camera = %self.camera, command = %self.command, "Starting motion detection");

            let mut process = match self.launcher.launch(&self.command, true).await {
                Ok(process) => process,
                Err(e) => {
                    tracing::error!(camera = %self.camera, attempt = attempts, error = %e, "Motion detection start failed");
                    continue;
                }
            };

            let started_at = Instant::now();
            let stdout = process.take_stdout();

            let read = tokio::select! {
                _ = done.cancelled() => None,
                read = self.read_scores(stdout) => Some(read),
            };

            let exit = match read {
                None => None,
                Some(read) => {
                    if let Err(e) = read {
                        tracing::warn!(camera = %self.camera, error = %e, "Failed to read scene scores");
                    }
                    tokio::select! {
                        _ = done.cancelled() => None,
                        exit = process.wait() => Some(exit),
                    }
                }
            };

            let Some(exit) = exit else {
                if let Err(e) = process.kill().await {
                    tracing::warn!(camera = %self.camera, error = %e, "Failed to kill motion detection");
                }
                return CaptureOutcome::Cancelled;
            };

            match exit {
                Ok(exit) => tracing::warn!(camera = %self.camera, status = %exit, "Motion detection exited"),
                Err(e) => tracing::error!(camera = %self.camera, error = %e, "Failed to wait for motion detection"),
            }

            if started_at.elapsed() >= self.policy.stable_after {
                attempts = 1;
            }
        }
    }

    async fn read_scores(&mut self, stdout: Option<ProcessStdout>) -> std::io::Result<u64> {
        match stdout {
            Some(stdout) => self.process_scores(BufReader::new(stdout)).await,
            None => Ok(0),
        }
    }

    /// Consume analysis output, returns the number of raised events
    pub async fn process_scores<R>(&mut self, mut reader: R) -> std::io::Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();
        let mut raised = 0;

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            // Filter metadata may carry non-UTF-8 bytes
            let text = String::from_utf8_lossy(&line);
            let Some(score) = parse_score_line(&text) else {
                continue;
            };

            if self.debouncer.observe(score, Instant::now()) {
                tracing::debug!(camera = %self.camera, score, "Scene change above threshold");
                self.sink.publish_motion_alert(MotionEvent::detected(&self.camera));
                raised += 1;
            }
        }

        Ok(raised)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::capture::process::{ProcessExit, SupervisedProcess};
    use crate::motion::ChannelAlertSink;

    fn detector(config: &MotionConfig, sink: Arc<dyn AlertSink>) -> MotionDetector {
        MotionDetector::new(
            "lobby",
            CommandSpec::new("ffmpeg", ["-version"]),
            config,
            RetryPolicy::default().max_attempts(2).delay(Duration::from_millis(5)),
            Arc::new(ScriptLauncher),
            sink,
        )
    }

    /// Launcher whose processes print two scores and exit
    struct ScriptLauncher;

    struct ScriptProcess {
        stdout: Option<ProcessStdout>,
    }

    #[async_trait]
    impl SupervisedProcess for ScriptProcess {
        fn take_stdout(&mut self) -> Option<ProcessStdout> {
            self.stdout.take()
        }

        async fn wait(&mut self) -> std::io::Result<ProcessExit> {
            Ok(ProcessExit { code: Some(0) })
        }

        async fn kill(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ProcessLauncher for ScriptLauncher {
        async fn launch(
            &self,
            _spec: &CommandSpec,
            capture_stdout: bool,
        ) -> std::io::Result<Box<dyn SupervisedProcess>> {
            assert!(capture_stdout);
            let output: &[u8] = b"lavfi.scene_score=0.4\nlavfi.scene_score=0.6\n";
            Ok(Box::new(ScriptProcess {
                stdout: Some(Box::new(output)),
            }))
        }
    }

    #[tokio::test]
    async fn test_burst_raises_one_event() {
        let (sink, mut rx) = ChannelAlertSink::new();
        let mut detector = detector(&MotionConfig::default(), Arc::new(sink));

        let output = tokio_test::io::Builder::new()
            .read(b"frame:0 pts:0 pts_time:0\n")
            .read(b"lavfi.scene_score=0.010000\n")
            .read(b"lavfi.scene_score=0.250000\n")
            .read(b"lavfi.scene_score=0.310000\nlavfi.scene_score=0.900000\n")
            .read(b"lavfi.scene_score=garbage\n")
            .build();

        let raised = detector.process_scores(BufReader::new(output)).await.unwrap();
        assert_eq!(raised, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.camera, "lobby");
        assert_eq!(event.state, "ON");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undecodable_line_does_not_stop_scoring() {
        let (sink, mut rx) = ChannelAlertSink::new();
        let mut detector = detector(&MotionConfig::default(), Arc::new(sink));

        let output = tokio_test::io::Builder::new()
            .read(b"title=caf\xe9 \xff\n")
            .read(b"lavfi.scene_score=0.400000\n")
            .build();

        let raised = detector.process_scores(BufReader::new(output)).await.unwrap();
        assert_eq!(raised, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_event_after_cooldown() {
        let (sink, mut rx) = ChannelAlertSink::new();
        let config = MotionConfig::default().cooldown(Duration::from_millis(50));
        let mut detector = detector(&config, Arc::new(sink));

        let output = tokio_test::io::Builder::new()
            .read(b"lavfi.scene_score=0.5\n")
            .read(b"lavfi.scene_score=0.5\n")
            .wait(Duration::from_millis(80))
            .read(b"lavfi.scene_score=0.5\n")
            .build();

        let raised = detector.process_scores(BufReader::new(output)).await.unwrap();
        assert_eq!(raised, 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_cooldown_survives_restart() {
        let (sink, mut rx) = ChannelAlertSink::new();
        let detector = detector(&MotionConfig::default(), Arc::new(sink));

        // Two runs of the script launcher, four above-threshold scores in total
        let outcome = detector.run(CancellationToken::new()).await;
        assert_eq!(outcome, CaptureOutcome::Halted { attempts: 2 });

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
