use super::types::{HUB, PIPELINE};
use super::{ComponentState, LampcamOrchestrator};
use crate::error::{LampcamError, Result};
use crate::pipeline::ProcessingPipeline;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

impl LampcamOrchestrator {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Lampcam components");

        let mut states = self.component_states.lock().await;
        states.insert(HUB.to_string(), ComponentState::Stopped);
        states.insert(PIPELINE.to_string(), ComponentState::Stopped);
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Open the camera and start the hub, then the pipeline
    ///
    /// A camera that cannot be opened is not fatal: the capture thread keeps
    /// reconnecting and falls back to synthetic frames.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Lampcam system");

        self.set_component_state(HUB, ComponentState::Starting).await;

        let hub = Arc::clone(&self.hub);
        let started = tokio::task::spawn_blocking(move || {
            match hub.open() {
                Ok(device) => info!("Camera opened on device {}", device),
                Err(e) => warn!("Camera not available at startup: {}", e),
            }
            hub.start()
        })
        .await
        .map_err(|e| LampcamError::system(format!("Hub startup task failed: {}", e)))?;

        if let Err(e) = started {
            self.set_component_state(HUB, ComponentState::Failed).await;
            error!("Failed to start camera hub: {}", e);
            return Err(e);
        }

        self.set_component_state(HUB, ComponentState::Running).await;
        info!("Camera hub running in state {}", self.hub.state());

        self.set_component_state(PIPELINE, ComponentState::Starting)
            .await;
        if let Err(e) = self.pipeline.start() {
            self.set_component_state(PIPELINE, ComponentState::Failed)
                .await;
            error!("Failed to start processing pipeline: {}", e);
            return Err(e);
        }
        self.set_component_state(PIPELINE, ComponentState::Running)
            .await;
        info!("Processing pipeline started");

        self.status_task = Some(spawn_status_logger(
            Arc::clone(&self.pipeline),
            self.config.camera.status_log_interval(),
            self.stop_signal.subscribe(),
        ));

        info!("Lampcam system started");
        Ok(())
    }
}

fn spawn_status_logger(
    pipeline: Arc<ProcessingPipeline>,
    period: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period.max(std::time::Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = pipeline.stats();
                    info!(
                        "Pipeline: {} received, {} processed, {} skipped, {:.1} capture fps, processing at {:?}",
                        stats.frames_received,
                        stats.frames_processed,
                        stats.frames_skipped,
                        stats.fps.capture_fps,
                        stats.fps.processing_resolution
                    );
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
