//! Viewer clients and per-stream subscriber sets

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::error::DeliveryError;

/// Unique id of a connected client
pub type ClientId = u64;

/// Outbound side of a viewer connection
#[async_trait]
pub trait SegmentSink: Send {
    /// Write one segment as one frame
    async fn send_segment(&mut self, segment: Bytes) -> Result<(), DeliveryError>;

    /// Close the connection
    async fn close(&mut self);
}

/// A connected viewer
///
/// Writes to the connection are serialized by the sink lock, so a segment is
/// always written completely before the next one starts.
pub struct Client {
    id: ClientId,
    stream: String,
    sink: tokio::sync::Mutex<Box<dyn SegmentSink>>,
    closing: AtomicBool,
    closed: CancellationToken,
    connected_at: Instant,
}

impl Client {
    pub fn new(id: ClientId, stream: impl Into<String>, sink: Box<dyn SegmentSink>) -> Self {
        Self {
            id,
            stream: stream.into(),
            sink: tokio::sync::Mutex::new(sink),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Subscription key the client connected with
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Resolves once [`Client::close`] has been called
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Write a segment, bounded by `timeout`
    pub async fn deliver(&self, segment: Bytes, timeout: Duration) -> Result<(), DeliveryError> {
        if self.is_closing() {
            return Err(DeliveryError::Closed);
        }

        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(timeout, sink.send_segment(segment)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::TimedOut(timeout)),
        }
    }

    /// Close the connection once, later calls are no-ops
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        self.sink.lock().await.close().await;
        tracing::debug!(client_id = self.id, stream = %self.stream, "Client connection closed");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// Clients subscribed to one stream key
///
/// Guarded by its own lock so fan-out on one stream never contends with
/// another stream's subscribers.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    clients: RwLock<BTreeMap<ClientId, Arc<Client>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<Client>) {
        self.clients.write().insert(client.id(), client);
    }

    pub fn remove(&self, id: ClientId) -> Option<Arc<Client>> {
        self.clients.write().remove(&id)
    }

    /// Current subscribers, copied out under the read lock
    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.read().values().cloned().collect()
    }

    /// Remove and return every subscriber
    pub fn drain(&self) -> Vec<Arc<Client>> {
        std::mem::take(&mut *self.clients.write())
            .into_values()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
