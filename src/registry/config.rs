//! Registry configuration

use std::time::Duration;

/// Stream registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often the cleanup task runs
    pub cleanup_interval: Duration,

    /// Age after which an unknown stream without subscribers is dropped
    pub idle_stream_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(30),
            idle_stream_timeout: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the idle timeout of unknown streams
    pub fn idle_stream_timeout(mut self, timeout: Duration) -> Self {
        self.idle_stream_timeout = timeout;
        self
    }
}
