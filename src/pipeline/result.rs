use crate::frame::FrameOrigin;
use crate::performance::PerformanceSummary;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Analysis output for one processed frame
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResults {
    pub frame_id: u64,
    pub origin: FrameOrigin,
    pub captured_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub resolution: (u32, u32),
    pub processing_time_ms: f64,
    /// Results of the stages that succeeded
    pub stages: BTreeMap<String, serde_json::Value>,
    /// Stages that produced no result for this frame
    pub failed_stages: Vec<String>,
}

impl PipelineResults {
    pub fn stage(&self, name: &str) -> Option<&serde_json::Value> {
        self.stages.get(name)
    }
}

/// Single-slot holder for the most recent results
///
/// Last write wins. Readers never block the pipeline and may see a result
/// that is one cycle old.
#[derive(Default)]
pub struct LatestResult {
    slot: ArcSwapOption<PipelineResults>,
}

impl LatestResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, results: PipelineResults) {
        self.slot.store(Some(Arc::new(results)));
    }

    pub fn load(&self) -> Option<Arc<PipelineResults>> {
        self.slot.load_full()
    }

    pub fn clear(&self) {
        self.slot.store(None);
    }
}

/// Rates measured by the pipeline, refreshed periodically
#[derive(Debug, Clone, Default, Serialize)]
pub struct FpsInfo {
    pub capture_fps: f64,
    pub stage_fps: BTreeMap<String, f64>,
    pub processing_resolution: (u32, u32),
    pub avg_processing_time_ms: f64,
}

impl FpsInfo {
    /// Rate of the slowest stage
    pub fn bottleneck_fps(&self) -> Option<f64> {
        self.stage_fps.values().copied().reduce(f64::min)
    }
}

/// Pipeline counters combined with the controller summary
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub fps: FpsInfo,
    pub performance: PerformanceSummary,
    pub frames_received: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub signal_lost_frames: u64,
    pub stage_errors: BTreeMap<String, u64>,
}

/// Round to one decimal place for display
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
