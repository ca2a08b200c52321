//! Per-camera stream publisher

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::capture::CaptureError;
use crate::stats::{PublishCounters, PublishStats};
use crate::transport::{
    Discovery, Message, RetentionPolicy, SharedTransport, StreamIdentity, TransportError,
};

/// Publishes one camera's segments to its durable stream
pub struct StreamPublisher {
    identity: StreamIdentity,
    name: String,
    transport: SharedTransport,
    max_chunk_size: usize,
    counters: Arc<PublishCounters>,
}

impl StreamPublisher {
    /// Declare the camera's stream and announce it once
    ///
    /// A failed declaration is returned, the camera cannot publish. A failed
    /// announcement is only logged, the stream is usable and a consumer that
    /// already knows the name can still attach.
    pub async fn open(
        identity: StreamIdentity,
        transport: SharedTransport,
        retention: &RetentionPolicy,
    ) -> Result<Self, TransportError> {
        let name = identity.name();
        let created = transport.declare_stream(&name, retention).await?;

        tracing::info!(
            camera = %identity.camera(),
            stream = %name,
            created,
            "Stream ready"
        );

        let discovery = Discovery::new(identity.routing_key(), &name);
        match transport.announce(discovery).await {
            Ok(()) => tracing::debug!(stream = %name, routing_key = %identity.routing_key(), "Stream announced"),
            Err(e) => tracing::warn!(stream = %name, error = %e, "Failed to announce stream"),
        }

        Ok(Self {
            identity,
            name,
            transport,
            max_chunk_size: retention.max_chunk_size,
            counters: Arc::new(PublishCounters::default()),
        })
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Stream name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counters(&self) -> Arc<PublishCounters> {
        Arc::clone(&self.counters)
    }

    /// Publish one segment, returns whether it reached the stream
    ///
    /// Failures drop the segment, there is no redelivery.
    pub async fn publish(&self, segment: Bytes) -> bool {
        let size = segment.len();
        let message = Message::from_segment(segment, self.max_chunk_size);
        if message.is_empty() {
            return false;
        }
        let chunks = message.chunks().len();

        match self.transport.publish(&self.name, message).await {
            Ok(offset) => {
                self.counters.record_published(size);
                tracing::trace!(stream = %self.name, offset, bytes = size, chunks, "Segment published");
                true
            }
            Err(e) => {
                self.counters.record_dropped();
                tracing::warn!(stream = %self.name, bytes = size, error = %e, "Publish failed, segment dropped");
                false
            }
        }
    }

    /// Publish every forwarded segment until the watcher closes the channel
    ///
    /// Capture errors arriving meanwhile are logged.
    pub async fn run(
        self,
        mut segments: mpsc::Receiver<Bytes>,
        mut errors: mpsc::Receiver<CaptureError>,
    ) -> PublishStats {
        loop {
            tokio::select! {
                segment = segments.recv() => match segment {
                    Some(segment) => {
                        self.publish(segment).await;
                    }
                    None => break,
                },
                Some(err) = errors.recv() => {
                    tracing::warn!(camera = %self.identity.camera(), error = %err, "Capture error");
                }
            }
        }

        while let Ok(err) = errors.try_recv() {
            tracing::warn!(camera = %self.identity.camera(), error = %err, "Capture error");
        }

        let stats = self.counters.snapshot();
        tracing::info!(
            stream = %self.name,
            published = stats.published,
            dropped = stats.dropped,
            "Publisher drained"
        );
        stats
    }
}
