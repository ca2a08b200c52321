//! Stream naming
//!
//! Every camera maps to exactly one transport stream. The same name is used
//! as the viewer subscription key.

use std::fmt;

/// Prefix of every camera stream name
pub const STREAM_PREFIX: &str = "video_stream.hub_id";

/// Prefix of every discovery routing key
pub const ROUTING_PREFIX: &str = "videostream.hubid";

/// Well-known channel carrying discovery announcements
pub const DISCOVERY_EXCHANGE: &str = "videostream";

/// Subscription key used when a viewer does not name a stream
pub const DEFAULT_STREAM: &str = "default";

/// Deterministic identity of one camera stream
///
/// Format: `video_stream.hub_id.<hub>.<camera>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamIdentity {
    hub_id: String,
    camera: String,
}

impl StreamIdentity {
    pub fn new(hub_id: impl Into<String>, camera: impl Into<String>) -> Self {
        Self {
            hub_id: hub_id.into(),
            camera: camera.into(),
        }
    }

    /// Parse a stream name back into its identity
    ///
    /// The camera is everything after the last dot, the hub id everything
    /// between the prefix and that dot.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(STREAM_PREFIX)?.strip_prefix('.')?;
        let (hub_id, camera) = rest.rsplit_once('.')?;
        if hub_id.is_empty() || camera.is_empty() {
            return None;
        }
        Some(Self::new(hub_id, camera))
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Transport stream name
    pub fn name(&self) -> String {
        format!("{}.{}.{}", STREAM_PREFIX, self.hub_id, self.camera)
    }

    /// Routing key of this stream's discovery announcement
    pub fn routing_key(&self) -> String {
        format!("{}.{}.{}", ROUTING_PREFIX, self.hub_id, self.camera)
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", STREAM_PREFIX, self.hub_id, self.camera)
    }
}

/// Bare camera name of a stream name, if it is a camera stream
pub fn camera_alias(stream_name: &str) -> Option<&str> {
    let rest = stream_name.strip_prefix(STREAM_PREFIX)?.strip_prefix('.')?;
    let (_, camera) = rest.rsplit_once('.')?;
    (!camera.is_empty()).then_some(camera)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_deterministic() {
        let a = StreamIdentity::new("hub-1", "front-door");
        let b = StreamIdentity::new("hub-1", "front-door");
        assert_eq!(a.name(), b.name());
        assert_eq!(a.name(), "video_stream.hub_id.hub-1.front-door");
        assert_eq!(a.to_string(), a.name());
        assert_eq!(a.routing_key(), "videostream.hubid.hub-1.front-door");
    }

    #[test]
    fn test_parse() {
        let id = StreamIdentity::parse("video_stream.hub_id.hub-1.front-door").unwrap();
        assert_eq!(id.hub_id(), "hub-1");
        assert_eq!(id.camera(), "front-door");

        // Dotted hub ids keep everything before the camera
        let id = StreamIdentity::parse("video_stream.hub_id.site.a.lobby").unwrap();
        assert_eq!(id.hub_id(), "site.a");
        assert_eq!(id.camera(), "lobby");

        assert!(StreamIdentity::parse("front-door").is_none());
        assert!(StreamIdentity::parse("video_stream.hub_id.hub-1").is_none());
        assert!(StreamIdentity::parse("video_stream.hub_idx.hub.cam").is_none());
    }

    #[test]
    fn test_camera_alias() {
        assert_eq!(
            camera_alias("video_stream.hub_id.hub-1.front-door"),
            Some("front-door")
        );
        assert_eq!(camera_alias("front-door"), None);
        assert_eq!(camera_alias(DEFAULT_STREAM), None);
    }
}
