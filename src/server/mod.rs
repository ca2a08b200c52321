//! Server side: discovery, consumption and viewer fan-out
//!
//! ```text
//!   discoveries ─► StreamConsumer ─► StreamRegistry (Unknown → Active)
//!                        │
//!                        ▼ per active stream
//!                  consume_stream ─► BroadcastHub::run_stream ─► Client (xN)
//!                                                                   ▲
//!                  gateway /ws?stream=<name> ── add_client ─────────┘
//! ```
//!
//! Viewers may connect before their stream is announced; they wait on an
//! unknown registry entry until the stream becomes active.

pub mod broadcast;
pub mod config;
pub mod consumer;
pub mod gateway;
pub mod listener;

pub use broadcast::{BroadcastHub, BroadcastReport};
pub use config::ServerConfig;
pub use consumer::{DiscoveryOutcome, StreamConsumer};
pub use gateway::{GatewayState, WsSink};
pub use listener::VideoServer;
