//! Durable stream transport
//!
//! The hub publishes each camera's segments to its own append-only stream and
//! announces the stream name once on the discovery channel. The server
//! discovers streams from those announcements and reads them from an offset.
//!
//! ```text
//!   StreamPublisher ──declare/publish──►  stream "video_stream.hub_id.<hub>.<cam>"
//!         │                                     │  offsets 0, 1, 2, ...
//!         └──announce──► discovery channel      │
//!                              │                ▼
//!                              └──────► StreamConsumer ──consume(First)
//! ```
//!
//! [`StreamTransport`] is the seam to the broker. [`MemoryBroker`] implements
//! it in-process with byte-bounded retention.

pub mod broker;
pub mod config;
pub mod identity;
pub mod message;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use broker::MemoryBroker;
pub use config::RetentionPolicy;
pub use identity::{
    camera_alias, StreamIdentity, DEFAULT_STREAM, DISCOVERY_EXCHANGE, ROUTING_PREFIX, STREAM_PREFIX,
};
pub use message::{Delivery, Discovery, Message};

/// Errors raised by a stream transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The stream was never declared or has been deleted
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The transport has been shut down
    #[error("transport closed")]
    Closed,

    /// The broker rejected or failed the operation
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Where a new consumer starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetSpec {
    /// Oldest retained message
    #[default]
    First,
    /// Most recent message
    Last,
    /// Only messages published after attaching
    Next,
    /// A specific offset, clamped to the retained window
    Offset(u64),
}

/// An attached consumer of one stream
#[async_trait]
pub trait Subscription: Send {
    /// Next message in offset order, `None` once the stream is closed
    async fn next(&mut self) -> Option<Delivery>;

    /// Name of the consumed stream
    fn stream(&self) -> &str;
}

/// Durable stream broker seam
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Declare a stream, returns `true` if it was created by this call
    async fn declare_stream(
        &self,
        name: &str,
        retention: &RetentionPolicy,
    ) -> Result<bool, TransportError>;

    /// Append a message, returns its offset
    async fn publish(&self, stream: &str, message: Message) -> Result<u64, TransportError>;

    /// Attach a consumer to a stream
    async fn consume(
        &self,
        stream: &str,
        offset: OffsetSpec,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Publish a discovery announcement
    async fn announce(&self, discovery: Discovery) -> Result<(), TransportError>;

    /// Subscribe to discovery announcements
    async fn discoveries(&self) -> Result<mpsc::UnboundedReceiver<Discovery>, TransportError>;
}

/// Shared handle to a transport
pub type SharedTransport = Arc<dyn StreamTransport>;
