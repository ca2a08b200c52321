//! Stream registry implementation
//!
//! The registry is the only shared table on the server side. It tracks every
//! stream key clients or discovery have named, the state of each, and which
//! clients wait on it. All access goes through the accessors below.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::stats::StreamCounters;
use crate::transport::camera_alias;

use super::client::{Client, ClientId, SegmentSink};
use super::config::RegistryConfig;
use super::entry::{ConsumerHandle, RegistryStats, StreamEntry, StreamState, StreamStats};
use super::error::RegistryError;

/// Result of [`StreamRegistry::begin_activation`]
#[derive(Debug)]
pub enum Activation {
    /// This call moved the stream to active
    ///
    /// The caller attaches a consumer and then either completes or rolls back.
    Started(ActivationTicket),
    /// The stream is already active, nothing to do
    AlreadyActive,
}

/// Everything an activating consumer needs from the registry
#[derive(Debug, Clone)]
pub struct ActivationTicket {
    pub name: String,
    /// Cancelled on rollback and shutdown
    pub token: CancellationToken,
    pub counters: Arc<StreamCounters>,
}

/// Central registry for all known streams
///
/// Thread-safe via `RwLock`. Fan-out only takes read locks, mutation of the
/// table happens on discovery, connect, disconnect and cleanup.
pub struct StreamRegistry {
    /// Map of stream key to stream entry
    streams: RwLock<HashMap<String, Arc<RwLock<StreamEntry>>>>,

    /// Global client set, client id to subscription key
    clients: RwLock<HashMap<ClientId, String>>,

    /// Bare camera name to the one stream that serves it
    ///
    /// Locked after `streams` when both are held.
    aliases: RwLock<HashMap<String, String>>,

    next_client_id: AtomicU64,

    shut_down: AtomicBool,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Move a stream from unknown to active
    ///
    /// This is the single transition point. Concurrent and repeated calls for
    /// the same name are serialized by the table lock, exactly one of them
    /// gets [`Activation::Started`].
    pub async fn begin_activation(&self, name: &str) -> Result<Activation, RegistryError> {
        let mut streams = self.streams.write().await;
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }

        let entry_arc = Arc::clone(
            streams
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(StreamEntry::new(name)))),
        );
        let mut entry = entry_arc.write().await;

        match entry.state {
            StreamState::Active => {
                tracing::debug!(stream = %name, "Stream already active, discovery ignored");
                Ok(Activation::AlreadyActive)
            }
            StreamState::Unknown => {
                let token = CancellationToken::new();
                let counters = Arc::new(StreamCounters::new());

                entry.state = StreamState::Active;
                entry.token = Some(token.clone());
                entry.counters = Arc::clone(&counters);
                entry.activated_at = Some(Instant::now());

                if let Some(alias) = camera_alias(name) {
                    self.claim_alias(alias, name).await;
                }

                tracing::info!(
                    stream = %name,
                    subscribers = entry.subscriber_count(),
                    "Stream activating"
                );

                Ok(Activation::Started(ActivationTicket {
                    name: name.to_string(),
                    token,
                    counters,
                }))
            }
        }
    }

    /// Attach the consumption tasks of a started activation
    ///
    /// If the activation was rolled back or the registry shut down meanwhile,
    /// the tasks are aborted and an error is returned.
    pub async fn complete_activation(
        &self,
        name: &str,
        tasks: Vec<JoinHandle<()>>,
    ) -> Result<(), RegistryError> {
        let entry_arc = self.streams.read().await.get(name).cloned();

        let mut pending = Some(tasks);
        if let Some(entry_arc) = entry_arc {
            let mut entry = entry_arc.write().await;
            if entry.state == StreamState::Active && entry.consumer.is_none() {
                if let (Some(token), Some(tasks)) = (entry.token.clone(), pending.take()) {
                    entry.consumer = Some(ConsumerHandle { token, tasks });
                    tracing::info!(stream = %name, "Stream active");
                    return Ok(());
                }
            }
        }

        for task in pending.into_iter().flatten() {
            task.abort();
        }
        Err(RegistryError::NotActivating(name.to_string()))
    }

    /// Return a stream to unknown after a failed attach
    ///
    /// Its consumption is cancelled so a later discovery can retry cleanly.
    /// Subscribed clients stay and keep waiting.
    pub async fn rollback_activation(&self, name: &str) -> Result<(), RegistryError> {
        let entry_arc = self
            .streams
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::StreamNotFound(name.to_string()))?;

        let consumer = {
            let mut entry = entry_arc.write().await;
            if entry.state != StreamState::Active {
                return Err(RegistryError::NotActivating(name.to_string()));
            }
            entry.state = StreamState::Unknown;
            entry.activated_at = None;
            if let Some(token) = entry.token.take() {
                token.cancel();
            }
            entry.consumer.take()
        };

        if let Some(consumer) = consumer {
            consumer.stop().await;
        }

        if let Some(alias) = camera_alias(name) {
            let mut aliases = self.aliases.write().await;
            if aliases.get(alias).is_some_and(|owner| owner == name) {
                aliases.remove(alias);
            }
        }

        tracing::warn!(stream = %name, "Stream activation rolled back");
        Ok(())
    }

    /// Subscribe a new client under `key`
    ///
    /// The key does not have to be known yet. The client waits on an unknown
    /// entry until a stream with that key (or alias) becomes active.
    pub async fn add_client(
        &self,
        key: &str,
        sink: Box<dyn SegmentSink>,
    ) -> Result<Arc<Client>, RegistryError> {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(Client::new(id, key, sink));

        let subscribers = {
            let mut streams = self.streams.write().await;
            if self.is_shut_down() {
                return Err(RegistryError::ShutDown);
            }
            let entry_arc = streams
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(StreamEntry::new(key))));
            let entry = entry_arc.read().await;
            entry.subscribers.insert(Arc::clone(&client));
            entry.subscriber_count()
        };

        self.clients.write().await.insert(id, key.to_string());

        tracing::info!(
            stream = %key,
            client_id = id,
            subscribers,
            "Client subscribed"
        );

        Ok(client)
    }

    /// Remove a client from its stream and the global set, then close it
    ///
    /// Returns `false` if the client was already removed.
    pub async fn remove_client(&self, client: &Client) -> bool {
        let removed = self.clients.write().await.remove(&client.id()).is_some();

        if let Some(entry_arc) = self.streams.read().await.get(client.stream()) {
            entry_arc.read().await.subscribers.remove(client.id());
        }

        client.close().await;

        if removed {
            tracing::info!(
                stream = %client.stream(),
                client_id = client.id(),
                connected_secs = client.connected_for().as_secs(),
                "Client removed"
            );
        }
        removed
    }

    /// Bind a bare camera name to `stream` unless another stream holds it
    async fn claim_alias(&self, alias: &str, stream: &str) {
        let mut aliases = self.aliases.write().await;
        match aliases.get(alias) {
            Some(owner) if owner != stream => {
                tracing::warn!(
                    stream = %stream,
                    alias = %alias,
                    bound_to = %owner,
                    "Camera name already served by another hub, alias not bound"
                );
            }
            Some(_) => {}
            None => {
                aliases.insert(alias.to_string(), stream.to_string());
            }
        }
    }

    /// Stream currently serving the bare camera name `alias`
    pub async fn alias_target(&self, alias: &str) -> Option<String> {
        self.aliases.read().await.get(alias).cloned()
    }

    /// Clients that should receive segments of stream `name`
    ///
    /// Includes clients subscribed under the bare camera name of `name` when
    /// `name` is the active stream bound to it. Several hubs may share a
    /// camera name; only the first to activate serves the bare name.
    pub async fn subscriber_snapshot(&self, name: &str) -> Vec<Arc<Client>> {
        let streams = self.streams.read().await;
        let mut snapshot = Vec::new();

        if let Some(entry_arc) = streams.get(name) {
            snapshot.extend(entry_arc.read().await.subscribers.snapshot());
        }
        if let Some(alias) = camera_alias(name) {
            let bound = self
                .aliases
                .read()
                .await
                .get(alias)
                .is_some_and(|owner| owner == name);
            if bound {
                if let Some(entry_arc) = streams.get(alias) {
                    snapshot.extend(entry_arc.read().await.subscribers.snapshot());
                }
            }
        }

        snapshot
    }

    /// Get the state of a stream key
    pub async fn stream_state(&self, name: &str) -> Option<StreamState> {
        let entry_arc = self.streams.read().await.get(name).cloned()?;
        let state = entry_arc.read().await.state;
        Some(state)
    }

    /// Get statistics of one stream key
    pub async fn stream_stats(&self, name: &str) -> Option<StreamStats> {
        let entry_arc = self.streams.read().await.get(name).cloned()?;
        let stats = entry_arc.read().await.stats();
        Some(stats)
    }

    /// Get registry-wide statistics
    pub async fn stats(&self) -> RegistryStats {
        let mut streams = Vec::new();
        for entry_arc in self.streams.read().await.values() {
            streams.push(entry_arc.read().await.stats());
        }
        streams.sort_by(|a, b| a.name.cmp(&b.name));

        RegistryStats {
            active_streams: streams
                .iter()
                .filter(|s| s.state == StreamState::Active)
                .count(),
            connected_clients: self.clients.read().await.len(),
            streams,
        }
    }

    /// Number of streams with an attached consumer
    pub async fn consumer_count(&self) -> usize {
        let mut count = 0;
        for entry_arc in self.streams.read().await.values() {
            if entry_arc.read().await.has_consumer() {
                count += 1;
            }
        }
        count
    }

    /// Get total number of stream keys
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Run cleanup task once
    ///
    /// Removes unknown streams without subscribers that are older than
    /// `idle_stream_timeout`. Active streams are never removed.
    pub async fn cleanup(&self) {
        let mut streams = self.streams.write().await;
        let now = Instant::now();

        let keys_to_remove: Vec<String> = streams
            .iter()
            .filter_map(|(key, entry_arc)| {
                // Entries busy with activation are skipped this round
                let entry = entry_arc.try_read().ok()?;
                let idle = entry.state == StreamState::Unknown
                    && entry.subscribers.is_empty()
                    && now.duration_since(entry.created_at) > self.config.idle_stream_timeout;
                idle.then(|| key.clone())
            })
            .collect();

        for key in keys_to_remove {
            streams.remove(&key);
            tracing::info!(stream = %key, "Stream removed by cleanup");
        }
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if registry.is_shut_down() {
                    break;
                }
                registry.cleanup().await;
            }
        })
    }

    /// Stop every consumer and close every client
    ///
    /// Later activations and subscriptions fail with [`RegistryError::ShutDown`].
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<RwLock<StreamEntry>>> = {
            let mut streams = self.streams.write().await;
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
            streams.drain().map(|(_, entry)| entry).collect()
        };

        let mut consumers = 0;
        let mut clients = 0;
        for entry_arc in entries {
            let (consumer, subscribers) = {
                let mut entry = entry_arc.write().await;
                if let Some(token) = entry.token.take() {
                    token.cancel();
                }
                (entry.consumer.take(), entry.subscribers.drain())
            };

            if let Some(consumer) = consumer {
                consumer.stop().await;
                consumers += 1;
            }
            for client in subscribers {
                client.close().await;
                clients += 1;
            }
        }
        self.clients.write().await.clear();
        self.aliases.write().await.clear();

        tracing::info!(consumers, clients, "Stream registry shut down");
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::registry::DeliveryError;

    #[derive(Default, Clone)]
    struct TestSink {
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl SegmentSink for TestSink {
        async fn send_segment(&mut self, _segment: Bytes) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    const STREAM: &str = "video_stream.hub_id.hub-1.front-door";

    #[tokio::test]
    async fn test_activation_happens_once() {
        let registry = StreamRegistry::new();

        let first = registry.begin_activation(STREAM).await.unwrap();
        assert!(matches!(first, Activation::Started(_)));
        assert_eq!(registry.stream_state(STREAM).await, Some(StreamState::Active));

        let second = registry.begin_activation(STREAM).await.unwrap();
        assert!(matches!(second, Activation::AlreadyActive));

        registry
            .complete_activation(STREAM, vec![tokio::spawn(async {})])
            .await
            .unwrap();
        assert_eq!(registry.consumer_count().await, 1);

        let third = registry.begin_activation(STREAM).await.unwrap();
        assert!(matches!(third, Activation::AlreadyActive));
        assert_eq!(registry.consumer_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_activation() {
        let registry = Arc::new(StreamRegistry::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                matches!(
                    registry.begin_activation(STREAM).await,
                    Ok(Activation::Started(_))
                )
            }));
        }

        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_rollback_allows_retry() {
        let registry = StreamRegistry::new();

        let Activation::Started(ticket) = registry.begin_activation(STREAM).await.unwrap() else {
            panic!("expected activation");
        };
        registry.rollback_activation(STREAM).await.unwrap();
        assert!(ticket.token.is_cancelled());
        assert_eq!(registry.stream_state(STREAM).await, Some(StreamState::Unknown));

        // Completing a rolled back activation fails
        let result = registry.complete_activation(STREAM, Vec::new()).await;
        assert!(matches!(result, Err(RegistryError::NotActivating(_))));

        let retry = registry.begin_activation(STREAM).await.unwrap();
        assert!(matches!(retry, Activation::Started(_)));
    }

    #[tokio::test]
    async fn test_lazy_binding_and_alias() {
        let registry = StreamRegistry::new();

        let full = registry.add_client(STREAM, Box::new(TestSink::default())).await.unwrap();
        let alias = registry
            .add_client("front-door", Box::new(TestSink::default()))
            .await
            .unwrap();
        let other = registry
            .add_client("garage", Box::new(TestSink::default()))
            .await
            .unwrap();

        assert_eq!(registry.stream_state(STREAM).await, Some(StreamState::Unknown));
        assert_eq!(registry.subscriber_snapshot(STREAM).await.len(), 1);

        // Activation keeps the waiting clients and binds the bare name
        registry.begin_activation(STREAM).await.unwrap();
        let ids: Vec<ClientId> = registry
            .subscriber_snapshot(STREAM)
            .await
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(ids, vec![full.id(), alias.id()]);
        assert!(!ids.contains(&other.id()));
    }

    #[tokio::test]
    async fn test_alias_bound_to_first_active_hub() {
        const OTHER_HUB: &str = "video_stream.hub_id.hub-2.front-door";
        let registry = StreamRegistry::new();

        let alias = registry
            .add_client("front-door", Box::new(TestSink::default()))
            .await
            .unwrap();
        registry.begin_activation(STREAM).await.unwrap();
        registry.begin_activation(OTHER_HUB).await.unwrap();

        assert_eq!(registry.alias_target("front-door").await.as_deref(), Some(STREAM));
        assert_eq!(registry.subscriber_snapshot(STREAM).await[0].id(), alias.id());
        assert!(registry.subscriber_snapshot(OTHER_HUB).await.is_empty());

        // A rolled back owner frees the name for the other hub
        registry.rollback_activation(STREAM).await.unwrap();
        assert!(registry.alias_target("front-door").await.is_none());
        registry.rollback_activation(OTHER_HUB).await.unwrap();
        registry.begin_activation(OTHER_HUB).await.unwrap();
        assert_eq!(
            registry.alias_target("front-door").await.as_deref(),
            Some(OTHER_HUB)
        );
        assert_eq!(registry.subscriber_snapshot(OTHER_HUB).await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_client() {
        let registry = StreamRegistry::new();
        let sink = TestSink::default();
        let client = registry.add_client(STREAM, Box::new(sink.clone())).await.unwrap();

        assert!(registry.remove_client(&client).await);
        assert!(!registry.remove_client(&client).await);
        assert!(*sink.closed.lock().unwrap());
        assert!(registry.subscriber_snapshot(STREAM).await.is_empty());
        assert_eq!(registry.stats().await.connected_clients, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = StreamRegistry::new();
        registry.begin_activation(STREAM).await.unwrap();
        registry.add_client(STREAM, Box::new(TestSink::default())).await.unwrap();
        registry.add_client("lobby", Box::new(TestSink::default())).await.unwrap();

        let stats = registry.stats().await;
        assert_eq!(stats.active_streams, 1);
        assert_eq!(stats.connected_clients, 2);
        assert_eq!(stats.streams.len(), 2);
        assert_eq!(stats.streams[0].name, "lobby");
        assert_eq!(stats.streams[0].state, StreamState::Unknown);
        assert_eq!(stats.streams[1].subscribers, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_idle_unknown_streams() {
        let config = RegistryConfig::default().idle_stream_timeout(Duration::from_millis(10));
        let registry = StreamRegistry::with_config(config);

        let client = registry.add_client("lobby", Box::new(TestSink::default())).await.unwrap();
        registry.add_client("garage", Box::new(TestSink::default())).await.unwrap();
        registry.begin_activation(STREAM).await.unwrap();
        registry.remove_client(&client).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.cleanup().await;

        // lobby is idle, garage has a client, the active stream is kept
        assert_eq!(registry.stream_count().await, 2);
        assert!(registry.stream_state("lobby").await.is_none());
        assert!(registry.stream_state("garage").await.is_some());
        assert!(registry.stream_state(STREAM).await.is_some());
    }

    #[tokio::test]
    async fn test_shutdown() {
        let registry = StreamRegistry::new();
        let sink = TestSink::default();
        registry.add_client(STREAM, Box::new(sink.clone())).await.unwrap();

        let Activation::Started(ticket) = registry.begin_activation(STREAM).await.unwrap() else {
            panic!("expected activation");
        };
        let token = ticket.token.clone();
        let task = tokio::spawn(async move { token.cancelled().await });
        registry.complete_activation(STREAM, vec![task]).await.unwrap();

        registry.shutdown().await;

        assert!(ticket.token.is_cancelled());
        assert!(*sink.closed.lock().unwrap());
        assert_eq!(registry.stream_count().await, 0);
        assert!(matches!(
            registry.begin_activation(STREAM).await,
            Err(RegistryError::ShutDown)
        ));
        assert!(matches!(
            registry.add_client(STREAM, Box::new(TestSink::default())).await,
            Err(RegistryError::ShutDown)
        ));
    }
}
