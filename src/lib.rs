pub mod analysis;
pub mod app;
pub mod config;
pub mod error;
pub mod frame;
pub mod hub;
pub mod performance;
pub mod pipeline;
pub mod reconnect;
pub mod registry;
pub mod source;

pub use analysis::{PresenceReport, PresenceStage};
pub use app::{ComponentState, LampcamOrchestrator, ShutdownReason, ShutdownTrigger};
pub use config::LampcamConfig;
pub use error::{CameraError, LampcamError, Result};
pub use frame::{FrameData, FrameFormat, FrameOrigin};
pub use hub::{CameraHub, HubState, HubStatus};
pub use performance::{FpsCounter, PerformanceSummary, ResolutionController};
pub use pipeline::{
    stage_fn, AnalysisStage, FpsInfo, LatestResult, PipelineResults, PipelineStats,
    ProcessingPipeline,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use registry::{ConsumerRegistry, ConsumerSnapshot, FrameQueue, QueueHandle};
pub use source::{FrameSource, SimulatedHandle, SimulatedSource};
