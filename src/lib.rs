//! camrelay: live camera distribution for smart-building hubs
//!
//! This library provides the video path of a building hub:
//! - Supervised transcoder processes that turn RTSP cameras into segment files
//! - A segment watcher that forwards finished segments and keeps the disk bounded
//! - Durable per-camera transport streams with one-shot discovery announcements
//! - Server-side consumption with idempotent attach and WebSocket fan-out
//! - Lightweight scene-change motion detection with per-camera cooldown
//!
//! # Data flow
//!
//! ```text
//!  RTSP ─► CaptureSupervisor ─► segment files ─► SegmentWatcher ─► StreamPublisher
//!                                                                       │
//!                                        transport stream + discovery ◄─┘
//!                                                   │
//!              StreamConsumer ◄─────────────────────┘
//!                    │
//!                    ▼
//!              BroadcastHub ─► Client ─► WebSocket viewer (xN)
//! ```
//!
//! # Example: hub and server in one process
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use camrelay::camera::CameraList;
//! use camrelay::hub::{Hub, HubConfig};
//! use camrelay::motion::TracingAlertSink;
//! use camrelay::server::{ServerConfig, VideoServer};
//! use camrelay::transport::MemoryBroker;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cameras = CameraList::load("cameras.json")?;
//!     let broker = Arc::new(MemoryBroker::new());
//!     let shutdown = CancellationToken::new();
//!
//!     let hub = Hub::new(HubConfig::default(), cameras, broker.clone(), Arc::new(TracingAlertSink));
//!     let server = VideoServer::new(ServerConfig::default(), broker);
//!
//!     let hub_task = tokio::spawn({
//!         let shutdown = shutdown.clone();
//!         async move { hub.run(shutdown).await }
//!     });
//!     server.run_until(shutdown).await?;
//!     hub_task.await?;
//!     Ok(())
//! }
//! ```

pub mod camera;
pub mod capture;
pub mod error;
pub mod hub;
pub mod motion;
pub mod registry;
pub mod server;
pub mod stats;
pub mod transport;

// Re-export main types for convenience
pub use camera::{CameraConfig, CameraList, CameraType};
pub use error::{Error, Result};
pub use hub::{Hub, HubConfig};
pub use server::{ServerConfig, VideoServer};
pub use transport::{MemoryBroker, StreamIdentity, StreamTransport};
