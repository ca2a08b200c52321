//! Video server listener
//!
//! Binds the viewer gateway and runs the discovery loop next to it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::StreamRegistry;
use crate::server::broadcast::BroadcastHub;
use crate::server::config::ServerConfig;
use crate::server::consumer::StreamConsumer;
use crate::server::gateway::{self, GatewayState};
use crate::transport::SharedTransport;

/// Live video server
pub struct VideoServer {
    config: ServerConfig,
    transport: SharedTransport,
    registry: Arc<StreamRegistry>,
    hub: Arc<BroadcastHub>,
    consumer: Arc<StreamConsumer>,
}

impl VideoServer {
    /// Create a new server reading streams from `transport`
    pub fn new(config: ServerConfig, transport: SharedTransport) -> Self {
        let registry = Arc::new(StreamRegistry::with_config(config.registry.clone()));
        let hub = Arc::new(BroadcastHub::new(
            Arc::clone(&registry),
            config.write_timeout,
            config.debug_dump_dir.clone(),
        ));
        let consumer = Arc::new(StreamConsumer::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&hub),
            &config,
        ));

        Self {
            config,
            transport,
            registry,
            hub,
            consumer,
        }
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn broadcast_hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn consumer(&self) -> &Arc<StreamConsumer> {
        &self.consumer
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Viewer routes, open connections end when `shutdown` fires
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = GatewayState {
            registry: Arc::clone(&self.registry),
            default_stream: self.config.default_stream.clone(),
            hls_root: self.config.hls_root.clone(),
            shutdown,
        };
        gateway::router(state, &self.config.static_dir)
    }

    /// Run the server with graceful shutdown
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires
    ///
    /// On return every consumer is stopped and every viewer closed.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        let discoveries = self.transport.discoveries().await?;

        tracing::info!(addr = %addr, "Video server listening");

        // Spawn cleanup task for stream registry
        let cleanup_handle = self.registry.spawn_cleanup_task();

        let discovery_token = shutdown.child_token();
        let discovery_task = tokio::spawn({
            let consumer = Arc::clone(&self.consumer);
            let token = discovery_token.clone();
            async move { consumer.run(discoveries, token).await }
        });

        let app = self.router(shutdown.clone());
        let signal = shutdown.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;

        if result.is_ok() {
            tracing::info!("Shutdown signal received");
        }

        // The loop must not start consumers once the registry is shut down
        discovery_token.cancel();
        if let Err(e) = discovery_task.await {
            tracing::error!(error = %e, "Discovery loop failed");
        }
        cleanup_handle.abort();
        self.registry.shutdown().await;

        result?;
        Ok(())
    }
}
