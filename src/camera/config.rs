//! Camera configuration records

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::RetryPolicy;
use crate::error::ConfigError;

/// Default segment duration in seconds
pub const DEFAULT_SEGMENT_TIME: u32 = 2;

/// Kind of camera, selects the transcoder profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraType {
    /// Production camera
    Real,
    /// Alternative hardware camera
    #[serde(alias = "ANT")]
    AltHardware,
    /// Simulated RTSP source
    Mock,
    /// Simulated source using the low-latency profile
    #[serde(alias = "ANTMOCK")]
    AltMock,
}

impl std::fmt::Display for CameraType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraType::Real => "REAL",
            CameraType::AltHardware => "ALT_HARDWARE",
            CameraType::Mock => "MOCK",
            CameraType::AltMock => "ALT_MOCK",
        };
        f.write_str(name)
    }
}

fn default_segment_time() -> u32 {
    DEFAULT_SEGMENT_TIME
}

/// A single configured camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Unique camera name, also the last component of the stream identity
    pub name: String,

    /// Camera kind
    #[serde(rename = "type")]
    pub camera_type: CameraType,

    /// RTSP source address
    #[serde(alias = "streamURL")]
    pub source_url: String,

    /// Segment duration in seconds
    #[serde(default = "default_segment_time")]
    pub segment_time: u32,

    /// Override for the number of capture start attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Override for the delay between capture attempts, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
}

impl CameraConfig {
    /// Create a camera with default segment time and retry policy
    pub fn new(name: impl Into<String>, camera_type: CameraType, source_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            camera_type,
            source_url: source_url.into(),
            segment_time: DEFAULT_SEGMENT_TIME,
            max_retries: None,
            retry_delay_secs: None,
        }
    }

    /// Set the segment time in seconds
    pub fn segment_time(mut self, secs: u32) -> Self {
        self.segment_time = secs;
        self
    }

    /// Segment duration
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.segment_time))
    }

    /// Retry policy for this camera, applying per-camera overrides to `default`
    pub fn retry_policy(&self, default: &RetryPolicy) -> RetryPolicy {
        let mut policy = default.clone();
        if let Some(max) = self.max_retries {
            policy.max_attempts = max;
        }
        if let Some(delay) = self.retry_delay_secs {
            policy.delay = Duration::from_secs(delay);
        }
        policy
    }

    /// Check the record for values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidCamera {
            camera: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name is empty"));
        }
        // The name is embedded in dotted stream identities and in directory paths
        if self
            .name
            .chars()
            .any(|c| c == '.' || c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(invalid("name must not contain '.', '/', '\\' or whitespace"));
        }
        if self.source_url.trim().is_empty() {
            return Err(invalid("source address is empty"));
        }
        if self.segment_time == 0 {
            return Err(invalid("segment_time must be greater than zero"));
        }
        Ok(())
    }
}

/// Ordered list of cameras for one hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraList {
    pub cameras: Vec<CameraConfig>,
}

impl CameraList {
    /// Build a list from camera records, validating them
    pub fn new(cameras: Vec<CameraConfig>) -> Result<Self, ConfigError> {
        let list = Self { cameras };
        list.validate()?;
        Ok(list)
    }

    /// Parse a JSON camera document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let list: CameraList = serde_json::from_str(json)?;
        list.validate()?;
        Ok(list)
    }

    /// Load and validate a JSON camera document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            camera.validate()?;
            if !seen.insert(camera.name.as_str()) {
                return Err(ConfigError::DuplicateCamera(camera.name.clone()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CameraConfig> {
        self.cameras.iter()
    }
}
