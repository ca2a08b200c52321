//! Server-side stream registry
//!
//! The registry tracks every stream key that discovery or a viewer has named.
//! Each key is a two-state machine:
//!
//! ```text
//!            add_client (lazy binding)
//!                   │
//!                   ▼
//!   ┌─────────┐  begin_activation  ┌────────┐
//!   │ Unknown │ ─────────────────► │ Active │ ── complete_activation (consumer attached)
//!   └─────────┘ ◄───────────────── └────────┘
//!                rollback_activation
//! ```
//!
//! `begin_activation` is the only way into `Active`, and it succeeds once per
//! key unless the attach fails and is rolled back. Duplicate discovery
//! announcements therefore never create a second consumer.
//!
//! # Locking
//!
//! The stream table is guarded by one `RwLock`, held only for lookup and
//! mutation. Each key's subscriber set has its own lock, and fan-out copies
//! the set out before writing to any client.

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use client::{Client, ClientId, SegmentSink, SubscriberSet};
pub use config::RegistryConfig;
pub use entry::{ConsumerHandle, RegistryStats, StreamEntry, StreamState, StreamStats};
pub use error::{DeliveryError, RegistryError};
pub use store::{Activation, ActivationTicket, StreamRegistry};
