use super::types::{ComponentState, ShutdownReason};
use crate::analysis::PresenceStage;
use crate::config::LampcamConfig;
use crate::error::Result;
use crate::hub::CameraHub;
use crate::pipeline::{AnalysisStage, ProcessingPipeline};
use crate::source::{self, FrameSource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Composition root: owns the camera hub and the processing pipeline
///
/// The hub and pipeline are plain values handed to each other here; nothing
/// in the crate reaches for a global instance.
pub struct LampcamOrchestrator {
    pub(super) config: LampcamConfig,
    pub(super) hub: Arc<CameraHub>,
    pub(super) pipeline: Arc<ProcessingPipeline>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) stop_signal: watch::Sender<bool>,
    pub(super) status_task: Option<JoinHandle<()>>,
}

impl LampcamOrchestrator {
    /// Create an orchestrator around the capture backend of this build
    pub async fn new(config: LampcamConfig) -> Result<Self> {
        let source = source::default_source(&config.camera);
        Self::with_source(config, source).await
    }

    /// Create an orchestrator around an explicit frame source
    pub async fn with_source(config: LampcamConfig, source: Box<dyn FrameSource>) -> Result<Self> {
        let stages: Vec<Box<dyn AnalysisStage>> =
            vec![Box::new(PresenceStage::new(&config.pipeline))];
        Self::with_stages(config, source, stages).await
    }

    /// Create an orchestrator with a custom stage list
    pub async fn with_stages(
        config: LampcamConfig,
        source: Box<dyn FrameSource>,
        stages: Vec<Box<dyn AnalysisStage>>,
    ) -> Result<Self> {
        let hub = Arc::new(CameraHub::new(&config, source));
        let pipeline = Arc::new(ProcessingPipeline::new(Arc::clone(&hub), &config, stages)?);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (stop_signal, _) = watch::channel(false);

        info!("Lampcam orchestrator created");

        Ok(Self {
            config,
            hub,
            pipeline,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            stop_signal,
            status_task: None,
        })
    }

    pub fn hub(&self) -> Arc<CameraHub> {
        Arc::clone(&self.hub)
    }

    pub fn pipeline(&self) -> Arc<ProcessingPipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn config(&self) -> &LampcamConfig {
        &self.config
    }
}
