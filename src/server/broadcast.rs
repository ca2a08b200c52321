//! Segment fan-out to subscribed clients

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::{Client, StreamRegistry};
use crate::stats::StreamCounters;
use crate::transport::camera_alias;

/// Segments at or below this size are never dumped
const DUMP_MIN_BYTES: usize = 1000;

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Writes each segment of a stream to every client subscribed to it
///
/// One `run_stream` task exists per active stream. A client whose write fails
/// or times out is removed and closed; the others still get the segment.
pub struct BroadcastHub {
    registry: Arc<StreamRegistry>,
    write_timeout: Duration,
    dump_dir: Option<PathBuf>,
}

impl BroadcastHub {
    pub fn new(
        registry: Arc<StreamRegistry>,
        write_timeout: Duration,
        dump_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            registry,
            write_timeout,
            dump_dir,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Deliver one segment to the current subscribers of `stream`
    ///
    /// The subscriber set is copied before any write, so clients joining or
    /// leaving meanwhile never block the fan-out. Returns once every write
    /// finished or timed out.
    pub async fn broadcast(&self, stream: &str, segment: Bytes) -> BroadcastReport {
        let clients = self.registry.subscriber_snapshot(stream).await;
        if clients.is_empty() {
            tracing::trace!(stream = %stream, bytes = segment.len(), "No subscribers, segment dropped");
            return BroadcastReport::default();
        }

        let writes = clients
            .iter()
            .map(|client| self.write_one(stream, client, segment.clone()));
        let results = join_all(writes).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        BroadcastReport {
            delivered,
            failed: results.len() - delivered,
        }
    }

    async fn write_one(&self, stream: &str, client: &Arc<Client>, segment: Bytes) -> bool {
        match client.deliver(segment, self.write_timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    stream = %stream,
                    client_id = client.id(),
                    error = %e,
                    "Delivery failed, removing client"
                );
                self.registry.remove_client(client).await;
                false
            }
        }
    }

    /// Fan out every segment arriving on `segments` until it closes or
    /// `token` fires
    pub async fn run_stream(
        &self,
        stream: String,
        mut segments: mpsc::Receiver<Bytes>,
        counters: Arc<StreamCounters>,
        token: CancellationToken,
    ) {
        tracing::debug!(stream = %stream, "Broadcaster started");

        loop {
            let segment = tokio::select! {
                _ = token.cancelled() => break,
                segment = segments.recv() => match segment {
                    Some(segment) => segment,
                    None => break,
                },
            };

            counters.record_segment(segment.len());
            self.dump(&stream, &segment).await;

            let report = self.broadcast(&stream, segment).await;
            counters.record_fanout(report.delivered, report.failed);
        }

        tracing::debug!(stream = %stream, "Broadcaster stopped");
    }

    async fn dump(&self, stream: &str, segment: &Bytes) {
        let Some(dir) = &self.dump_dir else {
            return;
        };
        if segment.len() <= DUMP_MIN_BYTES {
            return;
        }

        let camera = camera_alias(stream).unwrap_or(stream).replace(['/', '\\'], "_");
        let path = dir.join(format!("{}_segment_{}.mp4", camera, segment.len()));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, segment).await
        }
        .await;

        match result {
            Ok(()) => tracing::debug!(stream = %stream, path = %path.display(), "Segment dumped"),
            Err(e) => tracing::warn!(stream = %stream, path = %path.display(), error = %e, "Failed to dump segment"),
        }
    }
}
