//! Scene score parsing and debounce

use std::time::Duration;

use tokio::time::Instant;

/// Marker preceding the score in analysis output lines
pub const SCORE_MARKER: &str = "lavfi.scene_score=";

/// Extract the scene score from one line of analysis output
pub fn parse_score_line(line: &str) -> Option<f64> {
    let (_, value) = line.split_once(SCORE_MARKER)?;
    value.trim().parse::<f64>().ok()
}

/// Motion detection settings
#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    /// Run a detector per camera
    pub enabled: bool,

    /// Score a frame must exceed to count as motion
    ///
    /// Default: 0.02
    pub threshold: f64,

    /// Minimum time between two events of one camera
    ///
    /// Default: 30 seconds
    pub cooldown: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.02,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl MotionConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Per-camera debounce state
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionState {
    /// When the last event was raised
    pub last_triggered: Option<Instant>,
}

/// Turns a score sequence into debounced triggers
#[derive(Debug, Clone)]
pub struct MotionDebouncer {
    threshold: f64,
    cooldown: Duration,
    state: MotionState,
}

impl MotionDebouncer {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            threshold: config.threshold,
            cooldown: config.cooldown,
            state: MotionState::default(),
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Feed one score observed at `now`, returns `true` if an event fires
    pub fn observe(&mut self, score: f64, now: Instant) -> bool {
        if score.is_nan() || score <= self.threshold {
            return false;
        }
        if let Some(last) = self.state.last_triggered {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.state.last_triggered = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score_line() {
        assert_eq!(parse_score_line("lavfi.scene_score=0.043210"), Some(0.04321));
        assert_eq!(
            parse_score_line("frame:12 pts:480 lavfi.scene_score=0.5 "),
            Some(0.5)
        );
        assert_eq!(parse_score_line("lavfi.scene_score=abc"), None);
        assert_eq!(parse_score_line("frame=12"), None);
        assert_eq!(parse_score_line("progress=continue"), None);
    }

    #[test]
    fn test_below_threshold_ignored() {
        let mut debouncer = MotionDebouncer::new(&MotionConfig::default());
        let now = Instant::now();
        assert!(!debouncer.observe(0.02, now));
        assert!(!debouncer.observe(0.001, now));
        assert!(debouncer.state().last_triggered.is_none());
    }

    #[test]
    fn test_cooldown() {
        let mut debouncer = MotionDebouncer::new(&MotionConfig::default());
        let start = Instant::now();

        assert!(debouncer.observe(0.5, start));
        assert!(!debouncer.observe(0.5, start + Duration::from_secs(1)));
        assert!(!debouncer.observe(0.9, start + Duration::from_secs(29)));
        assert!(debouncer.observe(0.5, start + Duration::from_secs(30)));
        assert!(!debouncer.observe(0.5, start + Duration::from_secs(45)));
    }

    #[test]
    fn test_continuous_motion_once_per_window() {
        let mut debouncer = MotionDebouncer::new(&MotionConfig::default());
        let start = Instant::now();

        // One above-threshold score every 100ms for two minutes
        let fired = (0..1200u64)
            .filter(|i| debouncer.observe(0.3, start + Duration::from_millis(i * 100)))
            .count();
        assert_eq!(fired, 4);
    }

    #[test]
    fn test_config_builder() {
        let config = MotionConfig::default()
            .enabled(false)
            .threshold(0.1)
            .cooldown(Duration::from_secs(5));
        assert!(!config.enabled);
        assert_eq!(config.threshold, 0.1);
        assert_eq!(config.cooldown, Duration::from_secs(5));
    }
}
