//! Camera hub: one capture device shared by many consumers.
//!
//! The hub owns a single [`FrameSource`] and drives it from one capture
//! thread. Every cycle produces exactly one frame (device, synthetic, or a
//! stand-in when the device gave nothing) and fans it out to the registered
//! consumers. Device trouble degrades delivery but never stops it.

use crate::config::LampcamConfig;
use crate::error::{CameraError, LampcamError, Result};
use crate::frame::{FrameData, FrameOverlay, SyntheticFrames};
use crate::reconnect::ReconnectPolicy;
use crate::registry::{ConsumerRegistry, ConsumerSnapshot, QueueHandle};
use crate::source::{self, FrameSource};
use arc_swap::ArcSwapOption;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

mod status;
mod worker;

#[cfg(test)]
mod tests;

pub use status::{DegradedMode, HubState, HubStatus, FPS_WINDOW};

use status::Telemetry;
use worker::{CaptureWorker, WorkerCommand};

/// State shared between the hub handle and its capture thread
pub(crate) struct HubShared {
    pub registry: ConsumerRegistry,
    pub latest: ArcSwapOption<FrameData>,
    pub running: AtomicBool,
    pub telemetry: Mutex<Telemetry>,
}

struct ActiveWorker {
    handle: JoinHandle<CaptureWorker>,
    commands: Sender<WorkerCommand>,
    done: Receiver<()>,
}

enum WorkerSlot {
    Idle(Box<CaptureWorker>),
    Running(ActiveWorker),
    /// The capture thread could not be reclaimed
    Lost,
}

/// Shared camera with drop-oldest fan-out to named consumers
pub struct CameraHub {
    shared: Arc<HubShared>,
    slot: Mutex<WorkerSlot>,
    placeholder: SyntheticFrames,
    target_fps: u32,
    resolution: (u32, u32),
    stop_timeout: Duration,
}

impl CameraHub {
    /// Create a hub around the given source; nothing is opened yet
    pub fn new(config: &LampcamConfig, source: Box<dyn FrameSource>) -> Self {
        let camera = &config.camera;
        let overlay = FrameOverlay::new(
            camera.overlay_font_path.as_deref(),
            &camera.overlay_timezone,
        );
        let (width, height) = camera.resolution;

        let shared = Arc::new(HubShared {
            registry: ConsumerRegistry::new(
                config.consumers.default_capacity,
                config.consumers.callback_budget(),
            ),
            latest: ArcSwapOption::empty(),
            running: AtomicBool::new(false),
            telemetry: Mutex::new(Telemetry::new()),
        });

        let worker = CaptureWorker::new(
            source,
            camera.candidate_devices(),
            ReconnectPolicy::from_config(&config.reconnect),
            SyntheticFrames::new(width, height, overlay.clone()),
            Arc::clone(&shared),
            camera.frame_interval(),
            camera.status_log_interval(),
        );

        info!(
            "Camera hub created ({}x{} @ {}fps, candidates: {:?})",
            width,
            height,
            camera.fps,
            camera.candidate_devices()
        );

        Self {
            shared,
            slot: Mutex::new(WorkerSlot::Idle(Box::new(worker))),
            placeholder: SyntheticFrames::new(width, height, overlay),
            target_fps: camera.fps,
            resolution: camera.resolution,
            stop_timeout: config.reconnect.stop_timeout(),
        }
    }

    /// Create a hub around the capture backend of this build
    pub fn with_default_source(config: &LampcamConfig) -> Self {
        Self::new(config, source::default_source(&config.camera))
    }

    /// Open the first working candidate device
    ///
    /// Also leaves synthetic mode. When the hub is running the request is
    /// handed to the capture thread, which owns the device.
    pub fn open(&self) -> std::result::Result<String, CameraError> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            WorkerSlot::Idle(worker) => worker.reopen(Instant::now()),
            WorkerSlot::Running(active) => {
                let (reply_tx, reply_rx) = channel::bounded(1);
                active
                    .commands
                    .send(WorkerCommand::Reopen(reply_tx))
                    .map_err(|_| CameraError::Disconnected)?;

                // Opening tries every candidate with a test read each
                match reply_rx.recv_timeout(self.stop_timeout.max(Duration::from_secs(10))) {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Capture thread did not answer the open request");
                        Err(CameraError::NotAvailable)
                    }
                }
            }
            WorkerSlot::Lost => Err(CameraError::NotAvailable),
        }
    }

    /// Spawn the capture thread; a no-op when it is already running
    pub fn start(&self) -> Result<()> {
        let mut slot = self.slot.lock();

        let worker = match std::mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Idle(worker) => worker,
            running @ WorkerSlot::Running(_) => {
                *slot = running;
                debug!("Camera hub already running");
                return Ok(());
            }
            WorkerSlot::Lost => {
                return Err(LampcamError::component(
                    "camera_hub",
                    "capture worker was lost by an earlier stop timeout",
                ));
            }
        };

        let (command_tx, command_rx) = channel::unbounded();
        let (done_tx, done_rx) = channel::bounded(1);

        self.shared.running.store(true, Ordering::Release);
        self.shared.telemetry.lock().started_at = Some(Instant::now());

        let handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                let worker = worker.run(command_rx);
                let _ = done_tx.send(());
                worker
            })
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                error!("Failed to spawn capture thread: {}", e);
                LampcamError::Io(e)
            })?;

        *slot = WorkerSlot::Running(ActiveWorker {
            handle,
            commands: command_tx,
            done: done_rx,
        });

        info!("Camera hub started");
        Ok(())
    }

    /// Stop the capture thread and wait a bounded time for it to exit
    ///
    /// The device is released by the capture thread after its last read.
    /// Consumer queues are drained.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.slot.lock();

        let active = match std::mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Running(active) => active,
            other => {
                *slot = other;
                debug!("Camera hub is not running");
                return Ok(());
            }
        };

        info!("Stopping camera hub");
        self.shared.running.store(false, Ordering::Release);

        let outcome = match active.done.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match active.handle.join() {
                Ok(worker) => {
                    *slot = WorkerSlot::Idle(Box::new(worker));
                    Ok(())
                }
                Err(_) => {
                    error!("Capture thread panicked");
                    Err(LampcamError::component("camera_hub", "capture thread panicked"))
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Capture thread did not stop within {:?}, abandoning it",
                    self.stop_timeout
                );
                Err(LampcamError::component(
                    "camera_hub",
                    &format!("capture thread did not stop within {:?}", self.stop_timeout),
                ))
            }
        };

        let drained = self.shared.registry.clear_queues();
        self.shared.telemetry.lock().started_at = None;
        info!("Camera hub stopped ({} queued frames discarded)", drained);
        outcome
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Register a queue consumer, or get the queue of an existing one
    pub fn register_consumer(&self, id: &str, capacity: Option<usize>) -> Result<QueueHandle> {
        self.shared.registry.register_queue(id, capacity)
    }

    /// Register a callback run on the capture thread for every frame
    ///
    /// The callback must return well within one frame interval; while it
    /// runs, no other consumer is served.
    pub fn register_callback<F>(&self, id: &str, callback: F) -> bool
    where
        F: Fn(FrameData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.registry.register_callback(id, callback)
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.shared.registry.unregister(id)
    }

    /// Most recent frame, or a placeholder if nothing was captured yet
    pub fn latest_frame(&self) -> FrameData {
        match self.shared.latest.load_full() {
            Some(frame) => (*frame).clone(),
            None => self
                .placeholder
                .stand_in(0, SystemTime::now(), "Waiting for camera..."),
        }
    }

    pub fn state(&self) -> HubState {
        self.shared.telemetry.lock().state
    }

    pub fn status(&self) -> HubStatus {
        let consumers = self.shared.registry.ids();
        let telemetry = self.shared.telemetry.lock();

        HubStatus {
            connected: telemetry.state.is_connected(),
            is_synthetic: telemetry.state.is_synthetic(),
            measured_fps: telemetry.measured_fps(),
            consumer_count: consumers.len(),
            reconnect_count: telemetry.reconnect_count,
            running: self.is_running(),
            state: telemetry.state,
            device: telemetry.device.clone(),
            target_fps: self.target_fps,
            resolution: self.resolution,
            consumers,
            open_retry_count: telemetry.open_retry_count,
            read_failures: telemetry.read_failures,
            frames_produced: telemetry.frames_produced,
            uptime: telemetry.started_at.map(|started| started.elapsed()),
        }
    }

    /// Delivery counters per consumer
    pub fn consumers(&self) -> Vec<ConsumerSnapshot> {
        self.shared.registry.snapshot()
    }

    /// Run one capture iteration on the calling thread
    #[cfg(test)]
    pub(crate) fn step_at(&self, now: Instant) -> Option<FrameData> {
        match &mut *self.slot.lock() {
            WorkerSlot::Idle(worker) => Some(worker.step(now)),
            _ => None,
        }
    }
}

impl Drop for CameraHub {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("Camera hub did not stop cleanly on drop: {}", e);
            }
        }
    }
}
