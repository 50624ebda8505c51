use crate::frame::FrameData;

/// One analysis step run by the pipeline on every processed frame
///
/// Stages are called from the pipeline thread at pipeline rate. The frame is
/// only borrowed for the duration of the call. An error only drops this
/// stage's result for the current frame.
pub trait AnalysisStage: Send {
    /// Key under which results are published
    fn name(&self) -> &str;

    fn analyze(&mut self, frame: &FrameData) -> anyhow::Result<serde_json::Value>;
}

/// Closure-backed stage
pub struct FnStage<F> {
    name: String,
    analyze: F,
}

impl<F> FnStage<F>
where
    F: FnMut(&FrameData) -> anyhow::Result<serde_json::Value> + Send,
{
    pub fn new(name: &str, analyze: F) -> Self {
        Self {
            name: name.to_string(),
            analyze,
        }
    }
}

impl<F> AnalysisStage for FnStage<F>
where
    F: FnMut(&FrameData) -> anyhow::Result<serde_json::Value> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn analyze(&mut self, frame: &FrameData) -> anyhow::Result<serde_json::Value> {
        (self.analyze)(frame)
    }
}

/// Box a closure as a named stage
pub fn stage_fn<F>(name: &str, analyze: F) -> Box<dyn AnalysisStage>
where
    F: FnMut(&FrameData) -> anyhow::Result<serde_json::Value> + Send + 'static,
{
    Box::new(FnStage::new(name, analyze))
}
