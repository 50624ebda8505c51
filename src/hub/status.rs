use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Number of frame timestamps used for the measured rate
pub const FPS_WINDOW: usize = 100;

/// Why the hub is not delivering device frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedMode {
    /// Generated frames until `open()` is called again
    Synthetic,
}

/// Connection state of the camera hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Uninitialized,
    Opening,
    Streaming,
    Degraded(DegradedMode),
    Reconnecting,
}

impl HubState {
    pub fn is_connected(&self) -> bool {
        matches!(self, HubState::Streaming)
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, HubState::Degraded(DegradedMode::Synthetic))
    }
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubState::Uninitialized => write!(f, "uninitialized"),
            HubState::Opening => write!(f, "opening"),
            HubState::Streaming => write!(f, "streaming"),
            HubState::Degraded(DegradedMode::Synthetic) => write!(f, "degraded (synthetic)"),
            HubState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Counters written by the capture worker and read by status callers
#[derive(Debug)]
pub(crate) struct Telemetry {
    pub state: HubState,
    pub device: Option<String>,
    pub frame_times: VecDeque<Instant>,
    pub reconnect_count: u64,
    pub open_retry_count: u32,
    pub consecutive_read_failures: u32,
    pub read_failures: u64,
    pub frames_produced: u64,
    pub started_at: Option<Instant>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            state: HubState::Uninitialized,
            device: None,
            frame_times: VecDeque::with_capacity(FPS_WINDOW),
            reconnect_count: 0,
            open_retry_count: 0,
            consecutive_read_failures: 0,
            read_failures: 0,
            frames_produced: 0,
            started_at: None,
        }
    }

    pub fn record_frame(&mut self, now: Instant) {
        if self.frame_times.len() >= FPS_WINDOW {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(now);
        self.frames_produced += 1;
    }

    /// Frame rate over the timestamp window
    pub fn measured_fps(&self) -> f64 {
        match (self.frame_times.front(), self.frame_times.back()) {
            (Some(first), Some(last)) if self.frame_times.len() > 1 => {
                let span = last.saturating_duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.frame_times.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

/// Snapshot of the hub for dashboards and logs
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub connected: bool,
    pub is_synthetic: bool,
    pub measured_fps: f64,
    pub consumer_count: usize,
    pub reconnect_count: u64,
    pub running: bool,
    pub state: HubState,
    pub device: Option<String>,
    pub target_fps: u32,
    pub resolution: (u32, u32),
    pub consumers: Vec<String>,
    pub open_retry_count: u32,
    pub read_failures: u64,
    pub frames_produced: u64,
    pub uptime: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measured_fps_uses_window() {
        let mut telemetry = Telemetry::new();
        assert_eq!(telemetry.measured_fps(), 0.0);

        let start = Instant::now();
        for i in 0..(FPS_WINDOW as u64 + 50) {
            telemetry.record_frame(start + Duration::from_millis(i * 40));
        }

        assert_eq!(telemetry.frame_times.len(), FPS_WINDOW);
        assert_eq!(telemetry.frames_produced, FPS_WINDOW as u64 + 50);
        assert!((telemetry.measured_fps() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_state_flags() {
        assert!(HubState::Streaming.is_connected());
        assert!(!HubState::Reconnecting.is_connected());
        assert!(HubState::Degraded(DegradedMode::Synthetic).is_synthetic());
        assert_eq!(
            HubState::Degraded(DegradedMode::Synthetic).to_string(),
            "degraded (synthetic)"
        );
    }
}
