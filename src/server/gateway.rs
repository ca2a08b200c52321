//! HTTP and WebSocket routes for viewers
//!
//! | Route               | Purpose                                           |
//! |---------------------|---------------------------------------------------|
//! | `GET /ws?stream=`   | live segments, one binary frame per segment       |
//! | `GET /debug`        | registry statistics as JSON                       |
//! | `GET /download/*p`  | raw file below the HLS root, as an attachment     |
//! | `/hls/*`            | HLS playlists and segments                        |
//! | anything else       | static assets                                     |

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{self, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::registry::{DeliveryError, SegmentSink, StreamRegistry};

/// Upper bound for the close handshake of one viewer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state of all routes
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<StreamRegistry>,
    pub default_stream: String,
    pub hls_root: PathBuf,
    /// Ends every open viewer connection
    pub shutdown: CancellationToken,
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewerQuery {
    pub stream: Option<String>,
}

/// Build the viewer router
pub fn router(state: GatewayState, static_dir: &Path) -> Router {
    let hls = ServeDir::new(&state.hls_root);

    Router::new()
        .route("/ws", get(viewer_upgrade))
        .route("/debug", get(debug_stats))
        .route("/download/*path", get(download))
        .nest_service("/hls", hls)
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn viewer_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<ViewerQuery>,
    State(state): State<GatewayState>,
) -> Response {
    let stream = query
        .stream
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| state.default_stream.clone());

    ws.on_upgrade(move |socket| serve_viewer(socket, stream, state))
}

/// Keep one viewer subscribed until it leaves, fails or the server stops
///
/// Segments are written by the broadcaster through [`WsSink`]; this task
/// only watches the inbound half for the close.
async fn serve_viewer(socket: WebSocket, stream: String, state: GatewayState) {
    let (sender, mut receiver) = socket.split();

    let client = match state
        .registry
        .add_client(&stream, Box::new(WsSink::new(sender)))
        .await
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(stream = %stream, error = %e, "Viewer rejected");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = client.closed() => break,
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client_id = client.id(), error = %e, "Viewer read failed");
                    break;
                }
            },
        }
    }

    state.registry.remove_client(&client).await;
}

/// WebSocket write half as a segment sink
pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl SegmentSink for WsSink {
    async fn send_segment(&mut self, segment: Bytes) -> Result<(), DeliveryError> {
        self.sender
            .send(Message::Binary(segment.to_vec()))
            .await
            .map_err(|e| DeliveryError::Sink(e.to_string()))
    }

    async fn close(&mut self) {
        let close = async {
            let _ = self.sender.send(Message::Close(None)).await;
            let _ = self.sender.close().await;
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
            tracing::debug!("Viewer close timed out");
        }
    }
}

async fn debug_stats(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.registry.stats().await)
}

async fn download(
    State(state): State<GatewayState>,
    extract::Path(path): extract::Path<String>,
) -> Response {
    let Some(relative) = sanitize_download_path(&path) else {
        return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
    };
    let full = state.hls_root.join(&relative);

    let data = match tokio::fs::read(&full).await {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!(path = %full.display(), error = %e, "Download failed");
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    let filename = relative
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
        ],
        data,
    )
        .into_response()
}

/// Relative path below the HLS root, `None` if it could escape it
fn sanitize_download_path(path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            _ => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(root: &Path) -> GatewayState {
        GatewayState {
            registry: Arc::new(StreamRegistry::new()),
            default_stream: "default".into(),
            hls_root: root.to_path_buf(),
            shutdown: CancellationToken::new(),
        }
    }

    #[test]
    fn test_sanitize_download_path() {
        assert_eq!(
            sanitize_download_path("front-door/segment-001.mp4"),
            Some(PathBuf::from("front-door/segment-001.mp4"))
        );
        assert_eq!(sanitize_download_path("../etc/passwd"), None);
        assert_eq!(sanitize_download_path("front-door/../../x"), None);
        assert_eq!(sanitize_download_path("/etc/passwd"), None);
        assert_eq!(sanitize_download_path(""), None);
    }

    #[tokio::test]
    async fn test_download_attachment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("front-door")).unwrap();
        std::fs::write(dir.path().join("front-door/segment-001.mp4"), b"moov").unwrap();

        let response = download(
            State(state(dir.path())),
            extract::Path("front-door/segment-001.mp4".to_string()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=segment-001.mp4"
        );
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_download_missing_and_traversal() {
        let dir = tempfile::tempdir().unwrap();

        let missing = download(
            State(state(dir.path())),
            extract::Path("front-door/none.mp4".to_string()),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let traversal = download(
            State(state(dir.path())),
            extract::Path("../secret".to_string()),
        )
        .await;
        assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_router_builds() {
        let dir = tempfile::tempdir().unwrap();
        let _router = router(state(dir.path()), dir.path());
    }
}
