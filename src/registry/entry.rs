//! Stream entry and state types
//!
//! This module defines the per-stream state stored in the registry.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::stats::{StreamCounters, StreamCountersSnapshot};

use super::client::SubscriberSet;

/// State of a stream entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Known by name only, clients may already wait on it
    Unknown,
    /// A consumer is attached
    Active,
}

/// Consumption tasks of an active stream
pub struct ConsumerHandle {
    /// Stops the consumption and fan-out tasks
    pub token: CancellationToken,

    /// Consumption and fan-out tasks
    pub tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Cancel the tasks and wait for them to finish
    pub async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Stream task panicked");
                }
            }
        }
    }
}

/// Entry for a single stream key in the registry
pub struct StreamEntry {
    /// Stream name or subscription alias
    pub name: String,

    /// Current stream state
    pub state: StreamState,

    /// Clients subscribed under this key
    pub subscribers: Arc<SubscriberSet>,

    /// Cancellation of the activation in progress or completed
    pub token: Option<CancellationToken>,

    /// Attached consumption tasks, set once activation completes
    pub consumer: Option<ConsumerHandle>,

    /// Delivery counters, replaced on every activation
    pub counters: Arc<StreamCounters>,

    /// When the entry was created
    pub created_at: Instant,

    /// When the stream last became active
    pub activated_at: Option<Instant>,
}

impl StreamEntry {
    /// Create a new entry in the unknown state
    pub(super) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StreamState::Unknown,
            subscribers: Arc::new(SubscriberSet::new()),
            token: None,
            consumer: None,
            counters: Arc::new(StreamCounters::new()),
            created_at: Instant::now(),
            activated_at: None,
        }
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a consumer is attached
    pub fn has_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    pub(super) fn stats(&self) -> StreamStats {
        StreamStats {
            name: self.name.clone(),
            state: self.state,
            subscribers: self.subscriber_count(),
            has_consumer: self.has_consumer(),
            counters: self.counters.snapshot(),
        }
    }
}

/// Statistics for a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Stream name or subscription alias
    pub name: String,
    /// Current stream state
    pub state: StreamState,
    /// Number of subscribed clients
    pub subscribers: usize,
    /// Whether a consumer is attached
    pub has_consumer: bool,
    /// Delivery counters
    pub counters: StreamCountersSnapshot,
}

/// Registry-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Streams in the active state
    pub active_streams: usize,
    /// Connected clients across all streams
    pub connected_clients: usize,
    /// Per-stream statistics, sorted by name
    pub streams: Vec<StreamStats>,
}
