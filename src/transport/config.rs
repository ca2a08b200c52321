//! Stream retention configuration

/// Retention of one durable stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Total payload bytes kept per stream before the oldest messages are evicted
    ///
    /// Default: 256 MiB
    pub max_length_bytes: u64,

    /// Largest data chunk of a published message
    ///
    /// Default: 1 MiB
    pub max_chunk_size: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_length_bytes: 256 * 1024 * 1024,
            max_chunk_size: 1024 * 1024,
        }
    }
}

impl RetentionPolicy {
    /// Set the retained byte limit
    pub fn max_length_bytes(mut self, bytes: u64) -> Self {
        self.max_length_bytes = bytes;
        self
    }

    /// Set the chunk size limit
    pub fn max_chunk_size(mut self, bytes: usize) -> Self {
        self.max_chunk_size = bytes;
        self
    }
}
