use super::status::{DegradedMode, HubState};
use super::HubShared;
use crate::error::{CameraError, LampcamError};
use crate::frame::{FrameData, SyntheticFrames};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::source::FrameSource;
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, trace, warn};

const SLOW_READ: Duration = Duration::from_millis(500);

/// Requests the hub sends to a running worker
pub(crate) enum WorkerCommand {
    Reopen(Sender<Result<String, CameraError>>),
}

/// Capture loop state, owned by exactly one thread at a time
///
/// While the hub is stopped the worker is parked inside the hub; `start`
/// moves it onto the capture thread and `stop` takes it back.
pub(crate) struct CaptureWorker {
    source: Box<dyn FrameSource>,
    candidates: Vec<String>,
    policy: ReconnectPolicy,
    generator: SyntheticFrames,
    shared: Arc<HubShared>,
    frame_interval: Duration,
    status_log_interval: Duration,
    last_attempt: Option<Instant>,
    last_status_log: Option<Instant>,
    next_frame_id: u64,
}

impl CaptureWorker {
    pub fn new(
        source: Box<dyn FrameSource>,
        candidates: Vec<String>,
        policy: ReconnectPolicy,
        generator: SyntheticFrames,
        shared: Arc<HubShared>,
        frame_interval: Duration,
        status_log_interval: Duration,
    ) -> Self {
        Self {
            source,
            candidates,
            policy,
            generator,
            shared,
            frame_interval,
            status_log_interval,
            last_attempt: None,
            last_status_log: None,
            next_frame_id: 0,
        }
    }

    /// Paced capture loop; returns itself once the running flag clears
    pub fn run(mut self, commands: Receiver<WorkerCommand>) -> Self {
        info!(
            "Capture worker started ({:?} frame interval, source {})",
            self.frame_interval,
            self.source.describe()
        );

        let mut next_tick = Instant::now();

        while self.shared.running.load(Ordering::Acquire) {
            while let Ok(command) = commands.try_recv() {
                match command {
                    WorkerCommand::Reopen(reply) => {
                        let result = self.reopen(Instant::now());
                        if reply.send(result).is_err() {
                            debug!("Reopen requester went away before the reply");
                        }
                    }
                }
            }

            self.step(Instant::now());

            next_tick += self.frame_interval;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                // Running behind; do not try to catch up with a burst
                next_tick = now;
            }
        }

        self.release();
        info!("Capture worker stopped");
        self
    }

    /// Explicit open: clears synthetic mode and tries every candidate
    pub fn reopen(&mut self, now: Instant) -> Result<String, CameraError> {
        self.set_state(HubState::Opening);
        let result = self.source.open(&self.candidates);

        let mut telemetry = self.shared.telemetry.lock();
        telemetry.consecutive_read_failures = 0;
        match &result {
            Ok(device) => {
                info!("Camera opened on device {}", device);
                telemetry.state = HubState::Streaming;
                telemetry.device = Some(device.clone());
                telemetry.open_retry_count = 0;
                self.last_attempt = None;
            }
            Err(e) => {
                log_camera_error("Camera open failed", e);
                telemetry.state = HubState::Reconnecting;
                telemetry.device = None;
                telemetry.open_retry_count = 1;
                self.last_attempt = Some(now);
            }
        }

        result
    }

    /// One capture iteration: produce exactly one frame and fan it out
    pub fn step(&mut self, now: Instant) -> FrameData {
        let state = self.shared.telemetry.lock().state;

        let frame = match state {
            HubState::Streaming => self.read_cycle(now),
            HubState::Degraded(DegradedMode::Synthetic) => self.synthetic_frame(),
            HubState::Uninitialized | HubState::Opening | HubState::Reconnecting => {
                self.reconnect_cycle(now, state)
            }
        };

        self.publish(frame, now)
    }

    fn read_cycle(&mut self, now: Instant) -> FrameData {
        let started = Instant::now();
        let result = self.source.read_frame();
        let elapsed = started.elapsed();

        if elapsed > SLOW_READ {
            warn!("Camera frame read took {:.3}s", elapsed.as_secs_f64());
        }

        match result {
            Ok(frame) => {
                self.shared.telemetry.lock().consecutive_read_failures = 0;
                frame
            }
            Err(e) => {
                let failures = {
                    let mut telemetry = self.shared.telemetry.lock();
                    telemetry.consecutive_read_failures += 1;
                    telemetry.read_failures += 1;
                    telemetry.consecutive_read_failures
                };
                log_camera_error(&format!("Frame read failed ({} consecutive)", failures), &e);

                if self.policy.should_escalate(failures) {
                    error!(
                        "{} consecutive read failures, reconnecting camera",
                        failures
                    );
                    self.source.close();
                    self.last_attempt = None;

                    let mut telemetry = self.shared.telemetry.lock();
                    telemetry.state = HubState::Reconnecting;
                    telemetry.device = None;
                    telemetry.consecutive_read_failures = 0;
                    telemetry.open_retry_count = 0;
                }

                trace!("Emitting signal-lost frame at {:?}", now);
                self.generator
                    .stand_in(0, SystemTime::now(), "Video signal lost")
            }
        }
    }

    fn reconnect_cycle(&mut self, now: Instant, state: HubState) -> FrameData {
        let failed = self.shared.telemetry.lock().open_retry_count;
        let since_last = self
            .last_attempt
            .map(|last| now.saturating_duration_since(last));

        match self.policy.decide(failed, since_last) {
            ReconnectDecision::Attempt => {
                if state == HubState::Reconnecting {
                    info!(
                        "Attempting camera reconnect ({}/{})",
                        failed + 1,
                        self.policy.max_open_retries()
                    );
                    self.shared.telemetry.lock().reconnect_count += 1;
                } else {
                    self.set_state(HubState::Opening);
                }

                match self.source.open(&self.candidates) {
                    Ok(device) => {
                        info!("Camera connected on device {}", device);
                        self.last_attempt = None;
                        {
                            let mut telemetry = self.shared.telemetry.lock();
                            telemetry.state = HubState::Streaming;
                            telemetry.device = Some(device);
                            telemetry.open_retry_count = 0;
                            telemetry.consecutive_read_failures = 0;
                        }
                        self.read_cycle(now)
                    }
                    Err(e) => {
                        self.last_attempt = Some(now);
                        let failed = {
                            let mut telemetry = self.shared.telemetry.lock();
                            telemetry.open_retry_count += 1;
                            telemetry.open_retry_count
                        };
                        log_camera_error(&format!("Camera open attempt {} failed", failed), &e);

                        if self.policy.has_exhausted(failed) {
                            self.enter_synthetic(failed);
                            self.synthetic_frame()
                        } else {
                            self.set_state(HubState::Reconnecting);
                            self.reconnecting_frame()
                        }
                    }
                }
            }
            ReconnectDecision::Wait(remaining) => {
                trace!("Next reconnect attempt in {:?}", remaining);
                self.reconnecting_frame()
            }
            ReconnectDecision::GiveUp => {
                self.enter_synthetic(failed);
                self.synthetic_frame()
            }
        }
    }

    fn enter_synthetic(&mut self, failed: u32) {
        warn!(
            "Camera failed to open {} times in a row, switching to synthetic frames",
            failed
        );
        self.source.close();
        let mut telemetry = self.shared.telemetry.lock();
        telemetry.state = HubState::Degraded(DegradedMode::Synthetic);
        telemetry.device = None;
    }

    fn synthetic_frame(&mut self) -> FrameData {
        self.generator.next_frame(0, SystemTime::now())
    }

    fn reconnecting_frame(&self) -> FrameData {
        self.generator
            .stand_in(0, SystemTime::now(), "Reconnecting to camera...")
    }

    fn publish(&mut self, frame: FrameData, now: Instant) -> FrameData {
        self.next_frame_id += 1;
        let frame = frame.with_id(self.next_frame_id);

        self.shared.latest.store(Some(Arc::new(frame.clone())));
        let report = self.shared.registry.fan_out(&frame);
        if report.failed > 0 {
            debug!("Frame {}: {} consumer callbacks failed", frame.id, report.failed);
        }

        self.shared.telemetry.lock().record_frame(now);
        self.maybe_log_status(now);
        frame
    }

    fn maybe_log_status(&mut self, now: Instant) {
        let due = self
            .last_status_log
            .map_or(true, |last| now.saturating_duration_since(last) >= self.status_log_interval);
        if !due {
            return;
        }
        self.last_status_log = Some(now);

        let telemetry = self.shared.telemetry.lock();
        info!(
            "Camera hub: {}, {:.1} fps, {} consumers, {} frames, {} reconnects",
            telemetry.state,
            telemetry.measured_fps(),
            self.shared.registry.len(),
            telemetry.frames_produced,
            telemetry.reconnect_count
        );
    }

    fn set_state(&self, state: HubState) {
        self.shared.telemetry.lock().state = state;
    }

    /// Close the device once no read can be in flight
    fn release(&mut self) {
        if self.source.is_open() {
            self.source.close();
            info!("Camera device released");
        }

        let mut telemetry = self.shared.telemetry.lock();
        telemetry.device = None;
        telemetry.consecutive_read_failures = 0;
        if !telemetry.state.is_synthetic() {
            telemetry.state = HubState::Uninitialized;
            telemetry.open_retry_count = 0;
            self.last_attempt = None;
        }
    }
}

/// Errors that retrying cannot fix are logged louder
fn log_camera_error(context: &str, err: &CameraError) {
    if LampcamError::from(err.clone()).is_recoverable() {
        warn!("{}: {}", context, err);
    } else {
        error!("{}: {}", context, err);
    }
}
