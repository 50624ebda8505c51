use super::result::{round1, FpsInfo, LatestResult, PipelineResults, PipelineStats};
use super::stage::AnalysisStage;
use crate::error::LampcamError;
use crate::frame::{FrameData, FrameOrigin};
use crate::performance::{FpsCounter, ResolutionController};
use crate::registry::QueueHandle;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Longest pause taken when processing runs well ahead of the target rate
const IDLE_PAUSE: Duration = Duration::from_millis(1);

/// What happened to one frame taken from the queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FrameOutcome {
    Processed(Duration),
    Skipped,
    SignalLost,
    Unusable,
}

/// Timing knobs of the driver loop
#[derive(Debug, Clone)]
pub(crate) struct LoopSettings {
    pub target_fps: f64,
    pub fps_window: usize,
    pub pop_timeout: Duration,
    pub fps_update_interval: Duration,
}

struct StageSlot {
    stage: Box<dyn AnalysisStage>,
    name: String,
    fps: FpsCounter,
    errors: u64,
}

/// Per-frame work of the processing pipeline
///
/// Runs on the pipeline thread, which is the only writer of the controller
/// in normal operation.
pub(crate) struct PipelineLoop {
    stages: Vec<StageSlot>,
    capture_fps: FpsCounter,
    controller: Arc<Mutex<ResolutionController>>,
    latest: Arc<LatestResult>,
    stats: Arc<ArcSwap<PipelineStats>>,
    settings: LoopSettings,
    last_fps_update: Option<Instant>,
    fps_info: FpsInfo,
    frames_received: u64,
    frames_processed: u64,
    frames_skipped: u64,
    signal_lost_frames: u64,
}

impl PipelineLoop {
    pub fn new(
        stages: Vec<Box<dyn AnalysisStage>>,
        controller: Arc<Mutex<ResolutionController>>,
        latest: Arc<LatestResult>,
        stats: Arc<ArcSwap<PipelineStats>>,
        settings: LoopSettings,
    ) -> Self {
        let stages = stages
            .into_iter()
            .map(|stage| StageSlot {
                name: stage.name().to_string(),
                stage,
                fps: FpsCounter::new(settings.fps_window),
                errors: 0,
            })
            .collect();

        Self {
            stages,
            capture_fps: FpsCounter::new(settings.fps_window),
            controller,
            latest,
            stats,
            settings,
            last_fps_update: None,
            fps_info: FpsInfo::default(),
            frames_received: 0,
            frames_processed: 0,
            frames_skipped: 0,
            signal_lost_frames: 0,
        }
    }

    /// Pull frames until the running flag clears, then hand the stages back
    pub fn run(mut self, queue: QueueHandle, running: Arc<AtomicBool>) -> Vec<Box<dyn AnalysisStage>> {
        info!(
            "Processing pipeline started with {} stage(s)",
            self.stages.len()
        );
        let target_interval = Duration::from_secs_f64(1.0 / self.settings.target_fps.max(1.0));

        while running.load(Ordering::Acquire) {
            match queue.pop_timeout(self.settings.pop_timeout) {
                Some(frame) => {
                    if let FrameOutcome::Processed(elapsed) = self.handle_frame(frame, Instant::now()) {
                        // Ease off the CPU when far ahead of the target rate
                        if elapsed < target_interval.mul_f64(0.8) {
                            std::thread::sleep(IDLE_PAUSE.min((target_interval - elapsed) / 2));
                        }
                    }
                }
                None => self.maybe_update_fps(Instant::now()),
            }
        }

        self.publish_stats();
        info!(
            "Processing pipeline stopped ({} processed, {} skipped)",
            self.frames_processed, self.frames_skipped
        );
        self.stages.into_iter().map(|slot| slot.stage).collect()
    }

    /// Run one frame through skip check, resize and every stage
    pub fn handle_frame(&mut self, frame: FrameData, now: Instant) -> FrameOutcome {
        self.frames_received += 1;
        self.capture_fps.tick_at(now);

        let outcome = self.process(frame, now);
        self.maybe_update_fps(now);
        outcome
    }

    fn process(&mut self, frame: FrameData, now: Instant) -> FrameOutcome {
        if frame.origin == FrameOrigin::SignalLost {
            self.signal_lost_frames += 1;
            self.controller.lock().record_error();
            trace!("Frame {} is a signal-lost stand-in, not analysed", frame.id);
            return FrameOutcome::SignalLost;
        }

        let (width, height) = {
            let mut controller = self.controller.lock();
            if controller.should_skip_frame(self.settings.target_fps) {
                self.frames_skipped += 1;
                return FrameOutcome::Skipped;
            }
            controller.current_resolution()
        };

        let started = Instant::now();
        let resized = match frame.resize(width, height) {
            Ok(resized) => resized,
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Frame {} could not be prepared: {}", frame.id, e);
                } else {
                    error!("Frame {} could not be prepared: {}", frame.id, e);
                }
                self.controller.lock().record_error();
                return FrameOutcome::Unusable;
            }
        };

        let mut stages = BTreeMap::new();
        let mut failed_stages = Vec::new();

        for slot in &mut self.stages {
            let stage = &mut slot.stage;
            let outcome = catch_unwind(AssertUnwindSafe(|| stage.analyze(&resized)));
            slot.fps.tick_at(now);

            let failure = match outcome {
                Ok(Ok(value)) => {
                    stages.insert(slot.name.clone(), value);
                    continue;
                }
                Ok(Err(e)) => LampcamError::analysis(slot.name.as_str(), format!("{:#}", e)),
                Err(_) => LampcamError::analysis(slot.name.as_str(), "stage panicked"),
            };

            slot.errors += 1;
            failed_stages.push(slot.name.clone());
            warn!("Frame {}: {}", frame.id, failure);
        }

        let elapsed = started.elapsed();
        self.controller.lock().record_processing_time(elapsed);
        self.frames_processed += 1;

        self.latest.publish(PipelineResults {
            frame_id: frame.id,
            origin: frame.origin,
            captured_at: DateTime::<Utc>::from(frame.timestamp),
            processed_at: Utc::now(),
            resolution: (width, height),
            processing_time_ms: elapsed.as_secs_f64() * 1000.0,
            stages,
            failed_stages,
        });

        FrameOutcome::Processed(elapsed)
    }

    /// Refresh rates and let the controller react to the slowest stage
    pub fn maybe_update_fps(&mut self, now: Instant) {
        match self.last_fps_update {
            None => {
                self.last_fps_update = Some(now);
                return;
            }
            Some(last) if now.saturating_duration_since(last) < self.settings.fps_update_interval => {
                return;
            }
            Some(_) => self.last_fps_update = Some(now),
        }

        let bottleneck = self
            .stages
            .iter()
            .map(|slot| slot.fps.fps())
            .reduce(f64::min)
            .unwrap_or_else(|| self.capture_fps.fps());

        let changed = {
            let mut controller = self.controller.lock();
            // No rate yet, e.g. right after a resolution change
            bottleneck > 0.0 && controller.maybe_adjust_at(bottleneck, now)
        };

        if changed {
            debug!("Resolution changed, resetting rate counters");
            for slot in &mut self.stages {
                slot.fps.reset();
            }
            self.capture_fps.reset();
        }

        self.publish_stats();
    }

    fn publish_stats(&mut self) {
        let performance = self.controller.lock().performance_summary();

        self.fps_info = FpsInfo {
            capture_fps: round1(self.capture_fps.fps()),
            stage_fps: self
                .stages
                .iter()
                .map(|slot| (slot.name.clone(), round1(slot.fps.fps())))
                .collect(),
            processing_resolution: performance.current_resolution,
            avg_processing_time_ms: performance.avg_processing_time_ms,
        };

        self.stats.store(Arc::new(PipelineStats {
            fps: self.fps_info.clone(),
            performance,
            frames_received: self.frames_received,
            frames_processed: self.frames_processed,
            frames_skipped: self.frames_skipped,
            signal_lost_frames: self.signal_lost_frames,
            stage_errors: self
                .stages
                .iter()
                .map(|slot| (slot.name.clone(), slot.errors))
                .collect(),
        }));
    }

    pub fn fps_info(&self) -> &FpsInfo {
        &self.fps_info
    }
}
