//! In-process durable stream broker
//!
//! Each stream is an append-only log with monotonically increasing offsets.
//! Retention is byte-bounded: once a stream holds more than
//! `max_length_bytes`, the oldest messages are evicted, but the newest one is
//! always kept. Consumers block on a watch channel until new data arrives.
//!
//! Discovery announcements are kept and replayed to every new discovery
//! subscriber before live ones, so a server that starts after the hub still
//! learns every stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};

use super::config::RetentionPolicy;
use super::message::{Delivery, Discovery, Message};
use super::{OffsetSpec, StreamTransport, Subscription, TransportError};

struct LogInner {
    entries: VecDeque<(u64, Message)>,
    bytes: u64,
    next_offset: u64,
}

impl LogInner {
    fn first_offset(&self) -> u64 {
        self.entries
            .front()
            .map(|(offset, _)| *offset)
            .unwrap_or(self.next_offset)
    }
}

/// One stream's log
struct StreamLog {
    name: String,
    retention: RetentionPolicy,
    inner: Mutex<LogInner>,
    /// Next offset to be written, bumped on every append and on close
    tail: watch::Sender<u64>,
    closed: AtomicBool,
}

impl StreamLog {
    fn new(name: &str, retention: RetentionPolicy) -> Self {
        let (tail, _) = watch::channel(0);
        Self {
            name: name.to_string(),
            retention,
            inner: Mutex::new(LogInner {
                entries: VecDeque::new(),
                bytes: 0,
                next_offset: 0,
            }),
            tail,
            closed: AtomicBool::new(false),
        }
    }

    fn append(&self, message: Message) -> Result<u64, TransportError> {
        if self.is_closed() {
            return Err(TransportError::StreamNotFound(self.name.clone()));
        }

        let offset = {
            let mut inner = self.inner.lock();
            let offset = inner.next_offset;
            inner.bytes += message.len() as u64;
            inner.entries.push_back((offset, message));
            inner.next_offset += 1;

            while inner.bytes > self.retention.max_length_bytes && inner.entries.len() > 1 {
                if let Some((evicted, msg)) = inner.entries.pop_front() {
                    inner.bytes -= msg.len() as u64;
                    tracing::trace!(stream = %self.name, offset = evicted, "Evicted by retention");
                }
            }
            offset
        };

        self.tail.send_replace(offset + 1);
        Ok(offset)
    }

    fn resolve(&self, spec: OffsetSpec) -> u64 {
        let inner = self.inner.lock();
        let first = inner.first_offset();
        match spec {
            OffsetSpec::First => first,
            OffsetSpec::Last => inner.next_offset.saturating_sub(1).max(first),
            OffsetSpec::Next => inner.next_offset,
            OffsetSpec::Offset(n) => n.max(first),
        }
    }

    /// Read the message at `cursor`, advancing it
    ///
    /// A cursor that fell behind retention skips ahead to the oldest
    /// retained message.
    fn read(&self, cursor: &mut u64) -> Option<Delivery> {
        let inner = self.inner.lock();
        let first = inner.first_offset();
        if *cursor < first {
            tracing::debug!(
                stream = %self.name,
                from = *cursor,
                to = first,
                "Consumer fell behind retention, skipping ahead"
            );
            *cursor = first;
        }

        let index = usize::try_from(*cursor - first).ok()?;
        let (offset, message) = inner.entries.get(index)?;
        *cursor = offset + 1;
        Some(Delivery {
            offset: *offset,
            message: message.clone(),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Wake every waiting consumer so it observes the close
        self.tail.send_modify(|_| {});
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn bytes(&self) -> u64 {
        self.inner.lock().bytes
    }
}

/// Consumer handle of a [`MemoryBroker`] stream
pub struct MemorySubscription {
    log: Arc<StreamLog>,
    cursor: u64,
    tail: watch::Receiver<u64>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            // Mark the current tail seen before reading so no append is missed
            self.tail.borrow_and_update();

            if let Some(delivery) = self.log.read(&mut self.cursor) {
                return Some(delivery);
            }
            if self.log.is_closed() {
                return None;
            }
            if self.tail.changed().await.is_err() {
                return None;
            }
        }
    }

    fn stream(&self) -> &str {
        &self.log.name
    }
}

#[derive(Default)]
struct DiscoveryState {
    history: Vec<Discovery>,
    subscribers: Vec<mpsc::UnboundedSender<Discovery>>,
}

/// In-process implementation of [`StreamTransport`]
#[derive(Default)]
pub struct MemoryBroker {
    streams: RwLock<HashMap<String, Arc<StreamLog>>>,
    discovery: Mutex<DiscoveryState>,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all declared streams, sorted
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of retained messages of a stream
    pub fn stream_len(&self, name: &str) -> Option<usize> {
        self.streams.read().get(name).map(|log| log.len())
    }

    /// Retained payload bytes of a stream
    pub fn retained_bytes(&self, name: &str) -> Option<u64> {
        self.streams.read().get(name).map(|log| log.bytes())
    }

    /// Delete a stream, ending all of its subscriptions
    pub fn delete_stream(&self, name: &str) -> bool {
        let removed = self.streams.write().remove(name);
        match removed {
            Some(log) => {
                log.close();
                tracing::info!(stream = %name, "Stream deleted");
                true
            }
            None => false,
        }
    }

    /// Shut the broker down
    ///
    /// Every stream subscription and discovery subscription ends.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for (_, log) in self.streams.write().drain() {
            log.close();
        }
        self.discovery.lock().subscribers.clear();
        tracing::info!("Broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn log(&self, name: &str) -> Result<Arc<StreamLog>, TransportError> {
        self.streams
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::StreamNotFound(name.to_string()))
    }
}

#[async_trait]
impl StreamTransport for MemoryBroker {
    async fn declare_stream(
        &self,
        name: &str,
        retention: &RetentionPolicy,
    ) -> Result<bool, TransportError> {
        self.ensure_open()?;

        let mut streams = self.streams.write();
        if streams.contains_key(name) {
            return Ok(false);
        }
        streams.insert(
            name.to_string(),
            Arc::new(StreamLog::new(name, retention.clone())),
        );

        tracing::info!(
            stream = %name,
            max_length_bytes = retention.max_length_bytes,
            "Stream declared"
        );
        Ok(true)
    }

    async fn publish(&self, stream: &str, message: Message) -> Result<u64, TransportError> {
        self.ensure_open()?;
        self.log(stream)?.append(message)
    }

    async fn consume(
        &self,
        stream: &str,
        offset: OffsetSpec,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        self.ensure_open()?;
        let log = self.log(stream)?;
        let cursor = log.resolve(offset);
        let tail = log.tail.subscribe();

        tracing::debug!(stream = %stream, offset = cursor, "Consumer attached");

        Ok(Box::new(MemorySubscription { log, cursor, tail }))
    }

    async fn announce(&self, discovery: Discovery) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut state = self.discovery.lock();
        state
            .subscribers
            .retain(|tx| tx.send(discovery.clone()).is_ok());
        state.history.push(discovery);
        Ok(())
    }

    async fn discoveries(&self) -> Result<mpsc::UnboundedReceiver<Discovery>, TransportError> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.discovery.lock();
        for discovery in &state.history {
            // Receiver is alive, it is held right here
            let _ = tx.send(discovery.clone());
        }
        state.subscribers.push(tx);
        Ok(rx)
    }
}
