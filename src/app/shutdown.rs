use super::types::{HUB, PIPELINE};
use super::{ComponentState, LampcamOrchestrator};
use crate::error::{LampcamError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl LampcamOrchestrator {
    /// Stop the pipeline, then the hub; returns the process exit code
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let _ = self.stop_signal.send(true);
        if let Some(task) = self.status_task.take() {
            let _ = task.await;
        }

        let mut exit_code = 0;

        // Consumers go first so nothing waits on a hub that is going away
        if let Err(e) = self.stop_component(PIPELINE).await {
            error!("Error stopping pipeline: {}", e);
            exit_code = 1;
        }

        if let Err(e) = self.stop_component(HUB).await {
            error!("Error stopping camera hub: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_component(&self, component: &'static str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let (stop, limit): (Box<dyn FnOnce() -> Result<()> + Send>, Duration) = match component {
            PIPELINE => {
                let pipeline = Arc::clone(&self.pipeline);
                (
                    Box::new(move || pipeline.stop()),
                    self.config.pipeline.stop_timeout(),
                )
            }
            _ => {
                let hub = Arc::clone(&self.hub);
                (
                    Box::new(move || hub.stop()),
                    self.config.reconnect.stop_timeout(),
                )
            }
        };

        // The components bound their own joins; this is a backstop for the task
        let outcome = timeout(limit * 2, tokio::task::spawn_blocking(stop)).await;

        let result = match outcome {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(LampcamError::system(format!(
                "{} stop task failed: {}",
                component, join_error
            ))),
            Err(_) => Err(LampcamError::system(format!(
                "{} component stop timeout",
                component
            ))),
        };

        match &result {
            Ok(()) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
            }
            Err(e) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
            }
        }

        result
    }
}
