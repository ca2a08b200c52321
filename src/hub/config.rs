//! Hub configuration

use std::path::PathBuf;

use crate::capture::RetryPolicy;
use crate::motion::MotionConfig;
use crate::transport::RetentionPolicy;

/// Hub-side configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub id, part of every stream identity
    pub hub_id: String,

    /// Parent of the per-camera segment directories
    pub data_root: PathBuf,

    /// Transcoder program used for capture and motion analysis
    pub ffmpeg: String,

    /// Default restart policy, cameras may override attempts and delay
    pub retry: RetryPolicy,

    /// Retention of every declared stream
    pub retention: RetentionPolicy,

    /// Capacity of the watcher-to-publisher channel per camera
    pub channel_capacity: usize,

    /// Use filesystem notifications in segment watchers
    pub watcher_notify: bool,

    /// Motion detection settings
    pub motion: MotionConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_id: "local".to_string(),
            data_root: PathBuf::from("/tmp/data"),
            ffmpeg: "ffmpeg".to_string(),
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
            channel_capacity: 16,
            watcher_notify: true,
            motion: MotionConfig::default(),
        }
    }
}

impl HubConfig {
    /// Set the hub id
    pub fn hub_id(mut self, hub_id: impl Into<String>) -> Self {
        self.hub_id = hub_id.into();
        self
    }

    /// Set the data root
    pub fn data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    /// Set the transcoder program
    pub fn ffmpeg(mut self, program: impl Into<String>) -> Self {
        self.ffmpeg = program.into();
        self
    }

    /// Set the default retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the stream retention
    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Set the per-camera channel capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Enable or disable filesystem notifications
    pub fn watcher_notify(mut self, enabled: bool) -> Self {
        self.watcher_notify = enabled;
        self
    }

    /// Set the motion detection settings
    pub fn motion(mut self, motion: MotionConfig) -> Self {
        self.motion = motion;
        self
    }

    /// Disable motion detection
    pub fn disable_motion(mut self) -> Self {
        self.motion.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.data_root, PathBuf::from("/tmp/data"));
        assert_eq!(config.ffmpeg, "ffmpeg");
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.motion.enabled);
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::default()
            .hub_id("hub-7")
            .data_root("/var/lib/camrelay")
            .ffmpeg("/usr/local/bin/ffmpeg")
            .retry(RetryPolicy::default().max_attempts(2).delay(Duration::from_secs(1)))
            .channel_capacity(0)
            .disable_motion();

        assert_eq!(config.hub_id, "hub-7");
        assert_eq!(config.data_root, PathBuf::from("/var/lib/camrelay"));
        assert_eq!(config.ffmpeg, "/usr/local/bin/ffmpeg");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.channel_capacity, 1);
        assert!(!config.motion.enabled);
    }
}
