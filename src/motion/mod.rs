//! Scene-change motion detection
//!
//! A lightweight analysis process per camera prints one scene score per frame.
//! Scores above the threshold raise a [`MotionEvent`], at most once per
//! cooldown window per camera, handed to an [`AlertSink`] without waiting on
//! the result.

pub mod detector;
pub mod score;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use detector::MotionDetector;
pub use score::{parse_score_line, MotionConfig, MotionDebouncer, MotionState, SCORE_MARKER};

/// Description attached to every motion event
pub const MOTION_DESCRIPTION: &str = "Motion detected";

/// State string of a raised motion event
pub const MOTION_STATE_ON: &str = "ON";

/// A debounced motion event for one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub camera: String,
    pub description: String,
    pub state: String,
    pub timestamp: DateTime<Utc>,
}

impl MotionEvent {
    /// Motion raised on `camera` now
    pub fn detected(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            description: MOTION_DESCRIPTION.to_string(),
            state: MOTION_STATE_ON.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of motion events
///
/// Calls are fire-and-forget, implementations must not block.
pub trait AlertSink: Send + Sync + 'static {
    fn publish_motion_alert(&self, event: MotionEvent);
}

/// Sink that only logs events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn publish_motion_alert(&self, event: MotionEvent) {
        tracing::info!(
            camera = %event.camera,
            state = %event.state,
            timestamp = %event.timestamp.to_rfc3339(),
            "{}",
            event.description
        );
    }
}

/// Sink forwarding events to an external alert router over a channel
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<MotionEvent>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MotionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn publish_motion_alert(&self, event: MotionEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Alert router gone, motion event dropped");
        }
    }
}
