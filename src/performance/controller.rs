use crate::config::PerformanceConfig;
use crate::error::{LampcamError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Skip threshold as a share of the frame interval
const SKIP_LOAD_FACTOR: f64 = 0.9;
/// Frame interval assumed when no usable target rate is given
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Read-only view of the controller for dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub skipped_frames: u64,
    pub camera_errors: u64,
    pub avg_processing_time_ms: f64,
    pub current_resolution: (u32, u32),
    pub current_level: usize,
    pub adjustments: u64,
    pub adaptive_mode: bool,
    pub skip_frames_enabled: bool,
    pub max_consecutive_skips: u32,
}

/// Trades processing resolution and frame skips against measured throughput
///
/// Resolution moves one level at a time and at most once per adjust
/// interval. Skips are capped so that some frame is always processed.
#[derive(Debug)]
pub struct ResolutionController {
    levels: Vec<(u32, u32)>,
    current_index: usize,
    last_adjust: Instant,
    adjust_interval: Duration,
    fps_low: f64,
    fps_high: f64,
    adaptive: bool,
    skip_when_slow: bool,
    skip_count: u32,
    max_consecutive_skips: u32,
    processing_times: VecDeque<Duration>,
    window: usize,
    skipped_frames: u64,
    camera_errors: u64,
    adjustments: u64,
}

impl ResolutionController {
    pub fn new(config: &PerformanceConfig) -> Result<Self> {
        Self::new_at(config, Instant::now())
    }

    /// Create a controller whose debounce window starts at `now`
    pub fn new_at(config: &PerformanceConfig, now: Instant) -> Result<Self> {
        if config.resolution_levels.is_empty() {
            return Err(LampcamError::component(
                "resolution_controller",
                "at least one resolution level is required",
            ));
        }

        let current_index = config
            .initial_level
            .min(config.resolution_levels.len() - 1);

        Ok(Self {
            levels: config.resolution_levels.clone(),
            current_index,
            last_adjust: now,
            adjust_interval: config.adjust_interval(),
            fps_low: config.fps_low_threshold,
            fps_high: config.fps_high_threshold,
            adaptive: config.adaptive_resolution,
            skip_when_slow: config.skip_frames_when_slow,
            skip_count: 0,
            max_consecutive_skips: config.max_consecutive_skips,
            processing_times: VecDeque::with_capacity(config.processing_window),
            window: config.processing_window.max(1),
            skipped_frames: 0,
            camera_errors: 0,
            adjustments: 0,
        })
    }

    pub fn current_resolution(&self) -> (u32, u32) {
        self.levels[self.current_index]
    }

    /// Index into the level list; 0 is the highest resolution
    pub fn current_level(&self) -> usize {
        self.current_index
    }

    pub fn levels(&self) -> &[(u32, u32)] {
        &self.levels
    }

    /// Step the resolution one level based on the observed rate
    ///
    /// Returns whether the resolution changed, in which case callers should
    /// discard rate measurements taken at the old resolution.
    pub fn maybe_adjust(&mut self, observed_fps: f64) -> bool {
        self.maybe_adjust_at(observed_fps, Instant::now())
    }

    pub fn maybe_adjust_at(&mut self, observed_fps: f64, now: Instant) -> bool {
        if !self.adaptive {
            return false;
        }

        if now.saturating_duration_since(self.last_adjust) < self.adjust_interval {
            return false;
        }

        let previous = self.current_resolution();
        if observed_fps < self.fps_low && self.current_index + 1 < self.levels.len() {
            self.current_index += 1;
        } else if observed_fps > self.fps_high && self.current_index > 0 {
            self.current_index -= 1;
        } else {
            return false;
        }

        self.last_adjust = now;
        self.adjustments += 1;

        let (width, height) = self.current_resolution();
        info!(
            "Processing resolution {}x{} -> {}x{} ({:.1} fps observed)",
            previous.0, previous.1, width, height, observed_fps
        );
        true
    }

    /// Decide whether the next frame should be skipped
    ///
    /// Skips when the average processing time exceeds 90% of the target frame
    /// interval, but never more than the consecutive skip cap.
    pub fn should_skip_frame(&mut self, target_fps: f64) -> bool {
        if !self.skip_when_slow {
            self.skip_count = 0;
            return false;
        }

        let interval_secs = if target_fps.is_finite() && target_fps > 0.0 {
            1.0 / target_fps
        } else {
            DEFAULT_FRAME_INTERVAL.as_secs_f64()
        };

        let overloaded = self
            .average_processing_time()
            .map_or(false, |avg| avg.as_secs_f64() > interval_secs * SKIP_LOAD_FACTOR);

        if !overloaded {
            self.skip_count = 0;
            return false;
        }

        if self.skip_count < self.max_consecutive_skips {
            self.skip_count += 1;
            self.skipped_frames += 1;
            debug!(
                "Skipping frame ({}/{} consecutive)",
                self.skip_count, self.max_consecutive_skips
            );
            true
        } else {
            // Cap reached: process this one
            self.skip_count = 0;
            false
        }
    }

    pub fn record_processing_time(&mut self, duration: Duration) {
        if self.processing_times.len() >= self.window {
            self.processing_times.pop_front();
        }
        self.processing_times.push_back(duration);
    }

    /// Mean of the processing-time window
    pub fn average_processing_time(&self) -> Option<Duration> {
        if self.processing_times.is_empty() {
            return None;
        }
        let total: Duration = self.processing_times.iter().sum();
        Some(total / self.processing_times.len() as u32)
    }

    pub fn record_error(&mut self) {
        self.camera_errors += 1;
    }

    pub fn camera_errors(&self) -> u64 {
        self.camera_errors
    }

    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// Enable or disable adaptation, optionally pinning a level
    ///
    /// An out-of-range index leaves the level unchanged and returns `false`.
    pub fn set_resolution_mode(&mut self, adaptive: bool, level: Option<usize>) -> bool {
        self.adaptive = adaptive;

        match level {
            Some(index) if index < self.levels.len() => {
                self.current_index = index;
                info!(
                    "Processing resolution pinned to {:?} (adaptive: {})",
                    self.levels[index], adaptive
                );
                true
            }
            Some(index) => {
                debug!("Ignoring out-of-range resolution level {}", index);
                false
            }
            None => true,
        }
    }

    /// Change skipping behaviour; a zero skip cap is ignored
    pub fn set_performance_mode(&mut self, skip_frames: Option<bool>, max_skips: Option<u32>) {
        if let Some(skip) = skip_frames {
            self.skip_when_slow = skip;
            if !skip {
                self.skip_count = 0;
            }
        }

        if let Some(max) = max_skips.filter(|&max| max > 0) {
            self.max_consecutive_skips = max;
        }
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let avg_ms = self
            .average_processing_time()
            .map(|avg| (avg.as_secs_f64() * 100_000.0).round() / 100.0)
            .unwrap_or(0.0);

        PerformanceSummary {
            skipped_frames: self.skipped_frames,
            camera_errors: self.camera_errors,
            avg_processing_time_ms: avg_ms,
            current_resolution: self.current_resolution(),
            current_level: self.current_index,
            adjustments: self.adjustments,
            adaptive_mode: self.adaptive,
            skip_frames_enabled: self.skip_when_slow,
            max_consecutive_skips: self.max_consecutive_skips,
        }
    }
}
