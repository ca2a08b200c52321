//! Delivery statistics
//!
//! Lock-free counters updated on the data path and serializable snapshots for
//! the diagnostic route.

pub mod metrics;

pub use metrics::{PublishCounters, PublishStats, StreamCounters, StreamCountersSnapshot};
