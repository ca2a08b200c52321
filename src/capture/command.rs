//! Transcoder command lines
//!
//! Each camera type maps to a fixed ffmpeg profile. All capture profiles write
//! fixed-duration segments plus a rolling HLS manifest into the camera's
//! private directory.

use std::path::Path;

use crate::camera::{CameraConfig, CameraType};

/// Rolling manifest written next to the segments
pub const MANIFEST_NAME: &str = "segments.m3u8";

/// Segment file name pattern passed to the segment muxer
pub const SEGMENT_PATTERN: &str = "segment-%03d.mp4";

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the capture command for a camera writing into `directory`
    pub fn capture(program: &str, camera: &CameraConfig, directory: &Path) -> Self {
        let dir = directory.display();
        let segment_time = camera.segment_time.to_string();
        let manifest = format!("{}/{}", dir, MANIFEST_NAME);
        let output = format!("{}/{}", dir, SEGMENT_PATTERN);

        let mut args: Vec<String> = Vec::with_capacity(64);
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        match camera.camera_type {
            CameraType::Real | CameraType::AltHardware | CameraType::Mock => {
                push(&["-rtsp_transport", "tcp", "-i", &camera.source_url]);
                push(&[
                    "-buffer_size",
                    "1024000",
                    "-probesize",
                    "50M",
                    "-analyzeduration",
                    "20000000",
                    "-avoid_negative_ts",
                    "make_zero",
                ]);
                push(&[
                    "-c:v", "libx264", "-preset", "fast", "-crf", "23", "-r", "15", "-g", "30",
                ]);
                push(&["-b:a", "64k"]);
                push(&[
                    "-f",
                    "segment",
                    "-segment_time",
                    &segment_time,
                    "-segment_format",
                    "mp4",
                    "-reset_timestamps",
                    "1",
                ]);
            }
            CameraType::AltMock => {
                push(&["-rtsp_transport", "tcp", "-i", &camera.source_url]);
                push(&[
                    "-c:v",
                    "libx264",
                    "-preset",
                    "ultrafast",
                    "-tune",
                    "zerolatency",
                    "-profile:v",
                    "baseline",
                    "-level",
                    "3.0",
                    "-pix_fmt",
                    "yuv420p",
                    "-maxrate",
                    "2000k",
                    "-bufsize",
                    "2000k",
                ]);
                push(&[
                    "-g",
                    "30",
                    "-keyint_min",
                    "30",
                    "-force_key_frames",
                    "expr:gte(t,n_forced*1)",
                    "-x264-params",
                    "keyint=30:min-keyint=30",
                    "-sc_threshold",
                    "0",
                    "-an",
                ]);
                push(&[
                    "-f",
                    "segment",
                    "-segment_time",
                    &segment_time,
                    "-segment_format",
                    "mp4",
                    "-segment_format_options",
                    "movflags=frag_keyframe+empty_moov+default_base_moof",
                    "-reset_timestamps",
                    "1",
                ]);
            }
        }

        push(&[
            "-segment_list",
            &manifest,
            "-segment_list_type",
            "m3u8",
            "-segment_list_size",
            "0",
            "-segment_list_flags",
            "+live",
            &output,
        ]);

        Self::new(program, args)
    }

    /// Build the scene-change analysis command for a camera
    ///
    /// Scores are printed to stdout as `lavfi.scene_score=<float>` lines.
    pub fn motion(program: &str, camera: &CameraConfig) -> Self {
        Self::new(
            program,
            [
                "-fflags",
                "nobuffer",
                "-flags",
                "low_delay",
                "-i",
                camera.source_url.as_str(),
                "-filter:v",
                "select='gt(scene,0.0)',metadata=print:file=-",
                "-f",
                "null",
                "-",
                "-progress",
                "pipe:1",
            ],
        )
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
