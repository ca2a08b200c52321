//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::RegistryConfig;
use crate::transport::{OffsetSpec, DEFAULT_STREAM};

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Upper bound of one segment write to one client
    pub write_timeout: Duration,

    /// Capacity of the consumer-to-broadcaster channel per stream
    pub fanout_capacity: usize,

    /// Where new consumers start reading
    pub start_offset: OffsetSpec,

    /// Root of the per-stream HLS directories, served under `/hls/`
    pub hls_root: PathBuf,

    /// Static assets served for every other path
    pub static_dir: PathBuf,

    /// Write segments over 1000 bytes here for inspection (disabled when `None`)
    pub debug_dump_dir: Option<PathBuf>,

    /// Subscription key of viewers that do not name a stream
    pub default_stream: String,

    /// Registry tuning
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            write_timeout: Duration::from_secs(10),
            fanout_capacity: 100,
            start_offset: OffsetSpec::First,
            hls_root: PathBuf::from("/tmp/data"),
            static_dir: PathBuf::from("static"),
            debug_dump_dir: None,
            default_stream: DEFAULT_STREAM.to_string(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the per-client write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the fan-out channel capacity
    pub fn fanout_capacity(mut self, capacity: usize) -> Self {
        self.fanout_capacity = capacity.max(1);
        self
    }

    /// Set where new consumers start reading
    pub fn start_offset(mut self, offset: OffsetSpec) -> Self {
        self.start_offset = offset;
        self
    }

    /// Set the HLS root
    pub fn hls_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.hls_root = root.into();
        self
    }

    /// Set the static asset directory
    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    /// Enable segment dumps into `dir`
    pub fn debug_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dump_dir = Some(dir.into());
        self
    }

    /// Set the default subscription key
    pub fn default_stream(mut self, name: impl Into<String>) -> Self {
        self.default_stream = name.into();
        self
    }

    /// Set the registry configuration
    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }
}
