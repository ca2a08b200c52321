//! Camera configuration
//!
//! The camera list is loaded once at startup and is read-only afterwards.

pub mod config;

pub use config::{CameraConfig, CameraList, CameraType, DEFAULT_SEGMENT_TIME};
