//! Discovery handling and stream consumption
//!
//! Each discovery names a stream. The first discovery of a name moves it to
//! active and attaches two tasks:
//!
//! ```text
//!   Subscription ──► consume_stream ──mpsc(fanout_capacity)──► BroadcastHub::run_stream
//! ```
//!
//! Both tasks share the stream's cancellation token held by the registry.
//! Repeated discoveries of an active stream are ignored.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::{Activation, RegistryError, StreamRegistry};
use crate::transport::{
    camera_alias, Discovery, OffsetSpec, SharedTransport, Subscription, TransportError,
};

use super::broadcast::BroadcastHub;
use super::config::ServerConfig;

/// What a discovery led to
#[derive(Debug, Clone)]
pub enum DiscoveryOutcome {
    /// A consumer was attached
    Attached,
    /// The stream already had a consumer
    AlreadyActive,
    /// The payload did not name a stream
    Ignored,
    /// Attaching failed, the stream went back to unknown
    Failed(TransportError),
    /// The activation was rolled back or the registry shut down while attaching
    Abandoned,
    /// The registry is shut down
    ShutDown,
}

/// Attaches consumers to announced streams
pub struct StreamConsumer {
    transport: SharedTransport,
    registry: Arc<StreamRegistry>,
    hub: Arc<BroadcastHub>,
    start_offset: OffsetSpec,
    fanout_capacity: usize,
    hls_root: PathBuf,
}

impl StreamConsumer {
    pub fn new(
        transport: SharedTransport,
        registry: Arc<StreamRegistry>,
        hub: Arc<BroadcastHub>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            hub,
            start_offset: config.start_offset,
            fanout_capacity: config.fanout_capacity.max(1),
            hls_root: config.hls_root.clone(),
        }
    }

    /// Handle one discovery announcement
    pub async fn handle_discovery(&self, discovery: &Discovery) -> DiscoveryOutcome {
        let Some(name) = discovery.stream_name().filter(|name| !name.is_empty()) else {
            tracing::warn!(
                routing_key = %discovery.routing_key,
                bytes = discovery.payload.len(),
                "Discovery payload is not a stream name, ignored"
            );
            return DiscoveryOutcome::Ignored;
        };

        let ticket = match self.registry.begin_activation(name).await {
            Ok(Activation::Started(ticket)) => ticket,
            Ok(Activation::AlreadyActive) => return DiscoveryOutcome::AlreadyActive,
            Err(RegistryError::ShutDown) => return DiscoveryOutcome::ShutDown,
            Err(e) => {
                tracing::warn!(stream = %name, error = %e, "Activation failed");
                return DiscoveryOutcome::Ignored;
            }
        };

        self.prepare_hls_directory(name).await;

        let subscription = match self.transport.consume(name, self.start_offset).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(stream = %name, error = %e, "Failed to attach consumer");
                if let Err(rollback) = self.registry.rollback_activation(name).await {
                    tracing::warn!(stream = %name, error = %rollback, "Rollback failed");
                }
                return DiscoveryOutcome::Failed(e);
            }
        };

        let (tx, rx) = mpsc::channel(self.fanout_capacity);
        let consume_task = tokio::spawn(consume_stream(subscription, tx, ticket.token.clone()));
        let hub = Arc::clone(&self.hub);
        let stream = ticket.name.clone();
        let broadcast_task = tokio::spawn(async move {
            hub.run_stream(stream, rx, ticket.counters, ticket.token).await
        });

        match self
            .registry
            .complete_activation(name, vec![consume_task, broadcast_task])
            .await
        {
            Ok(()) => DiscoveryOutcome::Attached,
            Err(e) => {
                tracing::debug!(stream = %name, error = %e, "Activation abandoned");
                DiscoveryOutcome::Abandoned
            }
        }
    }

    /// Handle discoveries until the feed closes or `shutdown` fires
    pub async fn run(
        &self,
        mut discoveries: mpsc::UnboundedReceiver<Discovery>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Waiting for stream discoveries");

        loop {
            let discovery = tokio::select! {
                _ = shutdown.cancelled() => break,
                discovery = discoveries.recv() => match discovery {
                    Some(discovery) => discovery,
                    None => {
                        tracing::warn!("Discovery feed closed");
                        break;
                    }
                },
            };

            let outcome = self.handle_discovery(&discovery).await;
            tracing::debug!(routing_key = %discovery.routing_key, outcome = ?outcome, "Discovery handled");
            if matches!(outcome, DiscoveryOutcome::ShutDown) {
                break;
            }
        }

        tracing::info!("Discovery loop stopped");
    }

    async fn prepare_hls_directory(&self, name: &str) {
        let Some(dir) = hls_directory(&self.hls_root, name) else {
            tracing::warn!(stream = %name, "No usable HLS directory name");
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(stream = %name, directory = %dir.display(), error = %e, "Failed to create HLS directory");
        }
    }
}

/// `<root>/<camera>` for a stream name, `None` if the camera part is not a
/// plain directory name
fn hls_directory(root: &Path, stream: &str) -> Option<PathBuf> {
    let camera = camera_alias(stream).unwrap_or(stream);
    let mut components = Path::new(camera).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Some(root.join(part)),
        _ => None,
    }
}

/// Forward every message of a subscription as one joined segment
async fn consume_stream(
    mut subscription: Box<dyn Subscription>,
    segments: mpsc::Sender<Bytes>,
    token: CancellationToken,
) {
    let stream = subscription.stream().to_string();
    let mut forwarded = 0u64;

    loop {
        let delivery = tokio::select! {
            _ = token.cancelled() => break,
            delivery = subscription.next() => match delivery {
                Some(delivery) => delivery,
                None => {
                    tracing::info!(stream = %stream, "Stream subscription ended");
                    break;
                }
            },
        };

        if delivery.message.is_empty() {
            tracing::debug!(stream = %stream, offset = delivery.offset, "Empty message skipped");
            continue;
        }

        let segment = delivery.message.into_segment();
        tokio::select! {
            _ = token.cancelled() => break,
            sent = segments.send(segment) => {
                if sent.is_err() {
                    break;
                }
            }
        }
        forwarded += 1;
    }

    tracing::debug!(stream = %stream, forwarded, "Consumer stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::StreamState;
    use crate::transport::{MemoryBroker, Message, RetentionPolicy, StreamTransport};

    const STREAM: &str = "video_stream.hub_id.hub-1.front-door";

    fn consumer(broker: &Arc<MemoryBroker>, root: &Path) -> (StreamConsumer, Arc<StreamRegistry>) {
        let registry = Arc::new(StreamRegistry::new());
        let hub = Arc::new(BroadcastHub::new(
            Arc::clone(&registry),
            Duration::from_secs(1),
            None,
        ));
        let config = ServerConfig::default().hls_root(root);
        let consumer = StreamConsumer::new(broker.clone(), Arc::clone(&registry), hub, &config);
        (consumer, registry)
    }

    fn discovery(name: &str) -> Discovery {
        Discovery::new("videostream.hubid.hub-1.front-door", name)
    }

    #[test]
    fn test_hls_directory() {
        let root = Path::new("/tmp/data");
        assert_eq!(
            hls_directory(root, STREAM),
            Some(PathBuf::from("/tmp/data/front-door"))
        );
        assert_eq!(hls_directory(root, "lobby"), Some(PathBuf::from("/tmp/data/lobby")));
        assert_eq!(hls_directory(root, "a./etc"), None);
        assert_eq!(hls_directory(root, ".."), None);
    }

    #[tokio::test]
    async fn test_discovery_attaches_once() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_stream(STREAM, &RetentionPolicy::default()).await.unwrap();
        let (consumer, registry) = consumer(&broker, dir.path());

        assert!(matches!(
            consumer.handle_discovery(&discovery(STREAM)).await,
            DiscoveryOutcome::Attached
        ));
        assert!(matches!(
            consumer.handle_discovery(&discovery(STREAM)).await,
            DiscoveryOutcome::AlreadyActive
        ));

        assert_eq!(registry.consumer_count().await, 1);
        assert_eq!(registry.stream_state(STREAM).await, Some(StreamState::Active));
        assert!(dir.path().join("front-door").is_dir());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_stream_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let (consumer, registry) = consumer(&broker, dir.path());

        let outcome = consumer.handle_discovery(&discovery(STREAM)).await;
        assert!(matches!(
            outcome,
            DiscoveryOutcome::Failed(TransportError::StreamNotFound(_))
        ));
        assert_eq!(registry.stream_state(STREAM).await, Some(StreamState::Unknown));

        // Once the stream exists a later discovery attaches
        broker.declare_stream(STREAM, &RetentionPolicy::default()).await.unwrap();
        assert!(matches!(
            consumer.handle_discovery(&discovery(STREAM)).await,
            DiscoveryOutcome::Attached
        ));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_payload_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let (consumer, registry) = consumer(&broker, dir.path());

        let bad = Discovery {
            routing_key: "videostream.hubid.hub-1.x".into(),
            payload: Bytes::from_static(&[0xc3, 0x28]),
        };
        assert!(matches!(
            consumer.handle_discovery(&bad).await,
            DiscoveryOutcome::Ignored
        ));
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_consume_stream_skips_empty_messages() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_stream(STREAM, &RetentionPolicy::default()).await.unwrap();
        broker
            .publish(STREAM, Message::from_chunks(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]))
            .await
            .unwrap();
        broker.publish(STREAM, Message::default()).await.unwrap();
        broker.publish(STREAM, Message::from_chunks(vec![Bytes::from_static(b"ef")])).await.unwrap();

        let subscription = broker.consume(STREAM, OffsetSpec::First).await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let task = tokio::spawn(consume_stream(subscription, tx, token.clone()));

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"ef"));

        token.cancel();
        task.await.unwrap();
    }
}
