//! Processing pipeline: a hub consumer that runs analysis stages at the
//! resolution chosen by the [`ResolutionController`].

use crate::config::LampcamConfig;
use crate::error::{LampcamError, Result};
use crate::hub::CameraHub;
use crate::performance::{PerformanceSummary, ResolutionController};
use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod driver;
mod result;
mod stage;


pub use result::{FpsInfo, LatestResult, PipelineResults, PipelineStats};
pub use stage::{stage_fn, AnalysisStage, FnStage};

use driver::{LoopSettings, PipelineLoop};

enum PipelineSlot {
    Idle(Vec<Box<dyn AnalysisStage>>),
    Running {
        handle: JoinHandle<Vec<Box<dyn AnalysisStage>>>,
        done: Receiver<()>,
    },
    Lost,
}

/// Pipeline worker consuming frames from a [`CameraHub`]
pub struct ProcessingPipeline {
    hub: Arc<CameraHub>,
    consumer_id: String,
    queue_capacity: usize,
    stop_timeout: Duration,
    settings: LoopSettings,
    controller: Arc<Mutex<ResolutionController>>,
    latest: Arc<LatestResult>,
    stats: Arc<ArcSwap<PipelineStats>>,
    running: Arc<AtomicBool>,
    slot: Mutex<PipelineSlot>,
}

impl ProcessingPipeline {
    pub fn new(
        hub: Arc<CameraHub>,
        config: &LampcamConfig,
        stages: Vec<Box<dyn AnalysisStage>>,
    ) -> Result<Self> {
        let controller = ResolutionController::new(&config.performance)?;
        let stats = PipelineStats {
            fps: FpsInfo {
                processing_resolution: controller.current_resolution(),
                ..FpsInfo::default()
            },
            performance: controller.performance_summary(),
            frames_received: 0,
            frames_processed: 0,
            frames_skipped: 0,
            signal_lost_frames: 0,
            stage_errors: BTreeMap::new(),
        };

        let names: Vec<&str> = stages.iter().map(|stage| stage.name()).collect();
        info!(
            "Processing pipeline '{}' created with stages {:?}, starting at {:?}",
            config.pipeline.consumer_id,
            names,
            controller.current_resolution()
        );

        Ok(Self {
            hub,
            consumer_id: config.pipeline.consumer_id.clone(),
            queue_capacity: config.pipeline.queue_capacity,
            stop_timeout: config.pipeline.stop_timeout(),
            settings: LoopSettings {
                target_fps: config.performance.target_fps,
                fps_window: config.performance.fps_window,
                pop_timeout: config.pipeline.pop_timeout(),
                fps_update_interval: config.pipeline.fps_update_interval(),
            },
            controller: Arc::new(Mutex::new(controller)),
            latest: Arc::new(LatestResult::new()),
            stats: Arc::new(ArcSwap::from_pointee(stats)),
            running: Arc::new(AtomicBool::new(false)),
            slot: Mutex::new(PipelineSlot::Idle(stages)),
        })
    }

    /// Register with the hub and spawn the pipeline thread; idempotent
    pub fn start(&self) -> Result<()> {
        let mut slot = self.slot.lock();

        let stages = match std::mem::replace(&mut *slot, PipelineSlot::Lost) {
            PipelineSlot::Idle(stages) => stages,
            running @ PipelineSlot::Running { .. } => {
                *slot = running;
                debug!("Pipeline '{}' already running", self.consumer_id);
                return Ok(());
            }
            PipelineSlot::Lost => {
                return Err(LampcamError::component(
                    "pipeline",
                    "pipeline stages were lost by an earlier stop timeout",
                ));
            }
        };

        let queue = match self
            .hub
            .register_consumer(&self.consumer_id, Some(self.queue_capacity))
        {
            Ok(queue) => queue,
            Err(e) => {
                *slot = PipelineSlot::Idle(stages);
                return Err(e);
            }
        };

        let driver = PipelineLoop::new(
            stages,
            Arc::clone(&self.controller),
            Arc::clone(&self.latest),
            Arc::clone(&self.stats),
            self.settings.clone(),
        );
        let running = Arc::clone(&self.running);
        let (done_tx, done_rx) = channel::bounded(1);

        self.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name(format!("pipeline-{}", self.consumer_id))
            .spawn(move || {
                let stages = driver.run(queue, running);
                let _ = done_tx.send(());
                stages
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                self.hub.unregister(&self.consumer_id);
                error!("Failed to spawn pipeline thread: {}", e);
                LampcamError::Io(e)
            })?;

        *slot = PipelineSlot::Running {
            handle,
            done: done_rx,
        };
        info!("Pipeline '{}' started", self.consumer_id);
        Ok(())
    }

    /// Stop the pipeline thread with a bounded wait and leave the hub
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.slot.lock();

        let (handle, done) = match std::mem::replace(&mut *slot, PipelineSlot::Lost) {
            PipelineSlot::Running { handle, done } => (handle, done),
            other => {
                *slot = other;
                debug!("Pipeline '{}' is not running", self.consumer_id);
                return Ok(());
            }
        };

        info!("Stopping pipeline '{}'", self.consumer_id);
        self.running.store(false, Ordering::Release);

        let outcome = match done.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match handle.join() {
                Ok(stages) => {
                    *slot = PipelineSlot::Idle(stages);
                    Ok(())
                }
                Err(_) => {
                    error!("Pipeline thread panicked");
                    Err(LampcamError::component("pipeline", "pipeline thread panicked"))
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Pipeline thread did not stop within {:?}, abandoning it",
                    self.stop_timeout
                );
                Err(LampcamError::component(
                    "pipeline",
                    format!("pipeline thread did not stop within {:?}", self.stop_timeout),
                ))
            }
        };

        self.hub.unregister(&self.consumer_id);
        info!("Pipeline '{}' stopped", self.consumer_id);
        outcome
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Most recent analysis results, possibly one cycle old
    pub fn latest_result(&self) -> Option<Arc<PipelineResults>> {
        self.latest.load()
    }

    /// Shared holder for read-only result consumers
    pub fn result_holder(&self) -> Arc<LatestResult> {
        Arc::clone(&self.latest)
    }

    pub fn stats(&self) -> PipelineStats {
        (**self.stats.load()).clone()
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        self.controller.lock().performance_summary()
    }

    pub fn current_resolution(&self) -> (u32, u32) {
        self.controller.lock().current_resolution()
    }

    /// See [`ResolutionController::set_resolution_mode`]
    pub fn set_resolution_mode(&self, adaptive: bool, level: Option<usize>) -> bool {
        self.controller.lock().set_resolution_mode(adaptive, level)
    }

    /// See [`ResolutionController::set_performance_mode`]
    pub fn set_performance_mode(&self, skip_frames: Option<bool>, max_skips: Option<u32>) {
        self.controller
            .lock()
            .set_performance_mode(skip_frames, max_skips)
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }
}

impl Drop for ProcessingPipeline {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("Pipeline did not stop cleanly on drop: {}", e);
            }
        }
    }
}
