//! Segment directory watcher
//!
//! Forwards finished segment files from a camera's private directory to the
//! publisher and deletes them afterwards, so disk use stays bounded by the
//! handful of segments the transcoder is still writing.
//!
//! A file counts as finished once it is no longer the newest segment in the
//! directory, or once it has not been modified for `settle_after` (the
//! transcoder is gone). Files are forwarded oldest first.
//!
//! Filesystem notifications only wake the loop early. The polling interval is
//! always kept, so forwarding behaves the same when notifications are missing.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::command::MANIFEST_NAME;
use super::CaptureError;

/// Watcher timing
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Polling interval, normally the segment duration
    pub interval: Duration,

    /// Age after which the newest file is considered finished
    pub settle_after: Duration,

    /// Number of re-reads of a file that came back empty
    pub empty_retries: u32,

    /// Delay between re-reads of an empty file
    pub empty_retry_delay: Duration,

    /// Install a filesystem watcher for early wakeups
    pub notify: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::for_segment(Duration::from_secs(2))
    }
}

impl WatcherConfig {
    /// Timing derived from the segment duration
    pub fn for_segment(segment: Duration) -> Self {
        Self {
            interval: segment,
            settle_after: segment * 2,
            empty_retries: 3,
            empty_retry_delay: Duration::from_millis(200),
            notify: true,
        }
    }

    /// Set the polling interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the settle age of the newest file
    pub fn settle_after(mut self, age: Duration) -> Self {
        self.settle_after = age;
        self
    }

    /// Set the empty-read retry count and delay
    pub fn empty_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.empty_retries = retries;
        self.empty_retry_delay = delay;
        self
    }

    /// Enable or disable filesystem notifications
    pub fn notify(mut self, enabled: bool) -> Self {
        self.notify = enabled;
        self
    }
}

struct Candidate {
    path: PathBuf,
    name: String,
    modified: SystemTime,
}

/// Result of one directory pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Pass {
    forwarded: usize,
    /// The segment receiver is gone, nothing more can be forwarded
    closed: bool,
}

/// Watches one camera directory
pub struct SegmentWatcher {
    camera: String,
    directory: PathBuf,
    config: WatcherConfig,
}

impl SegmentWatcher {
    pub fn new(camera: impl Into<String>, directory: PathBuf, config: WatcherConfig) -> Self {
        Self {
            camera: camera.into(),
            directory,
            config,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Forward segments until `done` fires, then make one final pass
    ///
    /// Dropping `segments` on return is what tells the publisher to drain and
    /// stop. Returns the number of forwarded segments.
    pub async fn run(
        self,
        segments: mpsc::Sender<Bytes>,
        errors: mpsc::Sender<CaptureError>,
        done: CancellationToken,
    ) -> u64 {
        let (_notifier, mut wakeups) = match self.install_notifier() {
            Some((notifier, rx)) => (Some(notifier), Some(rx)),
            None => (None, None),
        };

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut forwarded: u64 = 0;

        tracing::debug!(
            camera = %self.camera,
            directory = %self.directory.display(),
            notify = wakeups.is_some(),
            "Segment watcher started"
        );

        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = next_wakeup(&mut wakeups) => {}
            }

            let pass = self.scan(&segments, &errors).await;
            forwarded += pass.forwarded as u64;
            if pass.closed {
                tracing::warn!(camera = %self.camera, "Segment receiver closed, watcher stopping");
                return forwarded;
            }
        }

        let pass = self.scan(&segments, &errors).await;
        forwarded += pass.forwarded as u64;

        tracing::debug!(camera = %self.camera, forwarded, "Segment watcher stopped");
        forwarded
    }

    fn install_notifier(&self) -> Option<(RecommendedWatcher, mpsc::Receiver<()>)> {
        if !self.config.notify {
            return None;
        }

        let (tx, rx) = mpsc::channel(1);
        let handler = move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if event.kind.is_create() || event.kind.is_modify() {
                    // A pending wakeup already covers this event
                    let _ = tx.try_send(());
                }
            }
        };

        let mut watcher = match notify::recommended_watcher(handler) {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::debug!(camera = %self.camera, error = %e, "Filesystem notifications unavailable");
                return None;
            }
        };

        if let Err(e) = watcher.watch(&self.directory, RecursiveMode::NonRecursive) {
            tracing::debug!(camera = %self.camera, error = %e, "Filesystem notifications unavailable");
            return None;
        }

        Some((watcher, rx))
    }

    /// One pass over the directory
    async fn scan(&self, segments: &mpsc::Sender<Bytes>, errors: &mpsc::Sender<CaptureError>) -> Pass {
        let mut pass = Pass::default();

        let candidates = match self.list().await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(camera = %self.camera, error = %err, "Segment directory scan failed");
                let _ = errors.try_send(err);
                return pass;
            }
        };

        let newest = candidates.len().saturating_sub(1);
        let now = SystemTime::now();

        for (index, candidate) in candidates.into_iter().enumerate() {
            if index == newest {
                let age = now
                    .duration_since(candidate.modified)
                    .unwrap_or(Duration::ZERO);
                if age < self.config.settle_after {
                    tracing::trace!(camera = %self.camera, file = %candidate.name, "Newest segment still open");
                    continue;
                }
            }

            let data = match self.read_segment(&candidate.path).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    tracing::debug!(camera = %self.camera, file = %candidate.name, "Segment still empty, leaving for next pass");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(camera = %self.camera, file = %candidate.name, error = %err, "Skipping segment");
                    let _ = errors.try_send(err);
                    continue;
                }
            };

            let size = data.len();
            if segments.send(data).await.is_err() {
                pass.closed = true;
                return pass;
            }
            pass.forwarded += 1;

            tracing::trace!(camera = %self.camera, file = %candidate.name, bytes = size, "Segment forwarded");

            if let Err(e) = tokio::fs::remove_file(&candidate.path).await {
                tracing::warn!(camera = %self.camera, file = %candidate.name, error = %e, "Failed to delete forwarded segment");
            }
        }

        pass
    }

    /// Segment files in forwarding order
    async fn list(&self) -> Result<Vec<Candidate>, CaptureError> {
        let list_err = |source| CaptureError::ListDirectory {
            path: self.directory.clone(),
            source,
        };

        let mut dir = tokio::fs::read_dir(&self.directory).await.map_err(list_err)?;
        let mut candidates = Vec::new();

        while let Some(entry) = dir.next_entry().await.map_err(list_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name == MANIFEST_NAME {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(camera = %self.camera, file = %name, error = %e, "Failed to stat segment");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            candidates.push(Candidate {
                path: entry.path(),
                name,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(candidates)
    }

    /// Read a whole segment, `None` if it stayed empty through all retries
    async fn read_segment(&self, path: &Path) -> Result<Option<Bytes>, CaptureError> {
        let mut attempt = 0;
        loop {
            let data = tokio::fs::read(path)
                .await
                .map_err(|source| CaptureError::ReadSegment {
                    path: path.to_path_buf(),
                    source,
                })?;

            if !data.is_empty() {
                return Ok(Some(Bytes::from(data)));
            }
            if attempt >= self.config.empty_retries {
                return Ok(None);
            }
            attempt += 1;
            tokio::time::sleep(self.config.empty_retry_delay).await;
        }
    }
}

async fn next_wakeup(wakeups: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match wakeups {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
