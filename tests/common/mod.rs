//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use camrelay::capture::process::ProcessStdout;
use camrelay::capture::{CommandSpec, ProcessExit, ProcessLauncher, SupervisedProcess};
use camrelay::registry::{DeliveryError, SegmentSink};

/// Sink that forwards every frame to a channel
pub struct ChannelSink {
    frames: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (frames, rx) = mpsc::unbounded_channel();
        (Self { frames }, rx)
    }
}

#[async_trait]
impl SegmentSink for ChannelSink {
    async fn send_segment(&mut self, segment: Bytes) -> Result<(), DeliveryError> {
        self.frames
            .send(segment)
            .map_err(|_| DeliveryError::Closed)
    }

    async fn close(&mut self) {}
}

/// Sink whose connection breaks on the n-th write (1-based)
pub struct BreakingSink {
    inner: ChannelSink,
    break_at: usize,
    writes: usize,
}

impl BreakingSink {
    pub fn new(break_at: usize) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (inner, rx) = ChannelSink::new();
        (
            Self {
                inner,
                break_at,
                writes: 0,
            },
            rx,
        )
    }
}

#[async_trait]
impl SegmentSink for BreakingSink {
    async fn send_segment(&mut self, segment: Bytes) -> Result<(), DeliveryError> {
        self.writes += 1;
        if self.writes >= self.break_at {
            return Err(DeliveryError::Sink("connection reset by peer".into()));
        }
        self.inner.send_segment(segment).await
    }

    async fn close(&mut self) {}
}

/// Sink that never completes a write
pub struct StalledSink;

#[async_trait]
impl SegmentSink for StalledSink {
    async fn send_segment(&mut self, _segment: Bytes) -> Result<(), DeliveryError> {
        std::future::pending().await
    }

    async fn close(&mut self) {}
}

/// Receive `n` frames or panic after `secs`
pub async fn recv_frames(rx: &mut mpsc::UnboundedReceiver<Bytes>, n: usize, secs: u64) -> Vec<Bytes> {
    let mut frames = Vec::with_capacity(n);
    while frames.len() < n {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(secs), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("sink dropped");
        frames.push(frame);
    }
    frames
}

/// Process that runs until killed
pub struct RunningProcess;

#[async_trait]
impl SupervisedProcess for RunningProcess {
    fn take_stdout(&mut self) -> Option<ProcessStdout> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        std::future::pending().await
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Process that exits with a failure right away
pub struct CrashingProcess;

#[async_trait]
impl SupervisedProcess for CrashingProcess {
    fn take_stdout(&mut self) -> Option<ProcessStdout> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        Ok(ProcessExit { code: Some(1) })
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Transcoder stand-in that writes fixed segment files and keeps running
pub struct SegmentWriter {
    directory: PathBuf,
    segments: Vec<Bytes>,
}

impl SegmentWriter {
    pub fn new(directory: PathBuf, segments: Vec<Bytes>) -> Self {
        Self {
            directory,
            segments,
        }
    }
}

#[async_trait]
impl ProcessLauncher for SegmentWriter {
    async fn launch(
        &self,
        _spec: &CommandSpec,
        _capture_stdout: bool,
    ) -> std::io::Result<Box<dyn SupervisedProcess>> {
        tokio::fs::create_dir_all(&self.directory).await?;
        for (i, data) in self.segments.iter().enumerate() {
            let path = self.directory.join(format!("segment-{:03}.mp4", i));
            tokio::fs::write(path, data).await?;
        }
        Ok(Box::new(RunningProcess))
    }
}

/// Transcoder stand-in that always crashes, recording every start
#[derive(Default)]
pub struct CrashingLauncher {
    starts: Mutex<Vec<Instant>>,
}

impl CrashingLauncher {
    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for CrashingLauncher {
    async fn launch(
        &self,
        _spec: &CommandSpec,
        _capture_stdout: bool,
    ) -> std::io::Result<Box<dyn SupervisedProcess>> {
        self.starts.lock().unwrap().push(Instant::now());
        Ok(Box::new(CrashingProcess))
    }
}

pub fn segment(i: usize) -> Bytes {
    Bytes::from(format!("segment-{}-", i).repeat(i + 1))
}
