//! Statistics and counters for camera streams

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Server-side counters of one stream
#[derive(Debug)]
pub struct StreamCounters {
    started_at: Instant,
    segments: AtomicU64,
    bytes: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

impl Default for StreamCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            segments: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    /// Record one inbound segment
    pub fn record_segment(&self, len: usize) {
        self.segments.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Record the outcome of one fan-out
    pub fn record_fanout(&self, delivered: usize, failed: usize) {
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.delivery_failures.fetch_add(failed as u64, Ordering::Relaxed);
    }

    /// Time since the counters were created
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Inbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes.load(Ordering::Relaxed) * 8) / secs
        } else {
            0
        }
    }

    pub fn snapshot(&self) -> StreamCountersSnapshot {
        StreamCountersSnapshot {
            segments: self.segments.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            bitrate: self.bitrate(),
            uptime_secs: self.duration().as_secs(),
        }
    }
}

/// Point-in-time copy of [`StreamCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamCountersSnapshot {
    pub segments: u64,
    pub bytes: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    /// Bits per second since the stream was activated
    pub bitrate: u64,
    pub uptime_secs: u64,
}

/// Hub-side counters of one camera publisher
#[derive(Debug, Default)]
pub struct PublishCounters {
    published: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
}

impl PublishCounters {
    pub fn record_published(&self, len: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PublishStats {
        PublishStats {
            published: self.published.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PublishCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub published: u64,
    pub bytes: u64,
    pub dropped: u64,
}
