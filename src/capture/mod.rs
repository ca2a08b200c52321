//! Camera capture
//!
//! One capture task group per camera:
//!
//! ```text
//!   CaptureSupervisor ──spawn/wait/kill──► transcoder process
//!                                               │ writes
//!                                               ▼
//!                                   <data_root>/<camera>/segment-NNN.mp4
//!                                               │ polls / notified
//!                                               ▼
//!                                        SegmentWatcher ──Bytes──► segments channel
//! ```
//!
//! The supervisor and the watcher share only the completion token and the
//! directory path; segment bytes are moved through a bounded channel.

pub mod command;
pub mod process;
pub mod supervisor;
pub mod watcher;

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use command::{CommandSpec, MANIFEST_NAME, SEGMENT_PATTERN};
pub use process::{ProcessExit, ProcessHandle, ProcessLauncher, SupervisedProcess, SystemLauncher};
pub use supervisor::{CaptureOutcome, CaptureSupervisor, RetryPolicy};
pub use watcher::{SegmentWatcher, WatcherConfig};

/// Errors raised by the capture side of a camera pipeline
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The camera's working directory could not be created
    #[error("failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transcoder could not be started
    #[error("failed to start transcoder for camera {camera}: {source}")]
    Spawn {
        camera: String,
        #[source]
        source: std::io::Error,
    },

    /// The segment directory could not be listed
    #[error("failed to list {path}: {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A segment file could not be read
    #[error("failed to read segment {path}: {source}")]
    ReadSegment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// All start attempts were used up
    #[error("camera {camera} halted after {attempts} attempts")]
    RetriesExhausted { camera: String, attempts: u32 },
}

/// Per-camera mutable state, alive for one run of the camera's task group
pub struct CaptureRunState {
    /// Camera name
    pub camera: String,
    /// Private segment directory
    pub directory: PathBuf,
    /// Inbound segments, watcher to publisher
    pub segments: mpsc::Sender<Bytes>,
    /// Non-fatal errors reported to the publisher side for logging
    pub errors: mpsc::Sender<CaptureError>,
    /// Completion signal shared by all tasks of the camera
    pub done: CancellationToken,
}

impl CaptureRunState {
    /// Create the run state and the receiving ends of its channels
    pub fn new(
        camera: impl Into<String>,
        directory: PathBuf,
        capacity: usize,
        done: CancellationToken,
    ) -> (Self, mpsc::Receiver<Bytes>, mpsc::Receiver<CaptureError>) {
        let (segments, segments_rx) = mpsc::channel(capacity.max(1));
        let (errors, errors_rx) = mpsc::channel(16);

        let state = Self {
            camera: camera.into(),
            directory,
            segments,
            errors,
            done,
        };

        (state, segments_rx, errors_rx)
    }
}
