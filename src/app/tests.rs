use super::*;
use crate::config::LampcamConfig;
use crate::source::SimulatedSource;
use std::time::Duration;

fn test_config() -> LampcamConfig {
    let mut config = LampcamConfig::default();
    config.camera.device = "0".to_string();
    config.camera.fallback_devices = Vec::new();
    config.camera.resolution = (64, 48);
    config.camera.fps = 30;
    config.performance.resolution_levels = vec![(64, 48), (32, 24)];
    config.performance.initial_level = 0;
    config.reconnect.stop_timeout_ms = 2000;
    config.pipeline.stop_timeout_ms = 2000;
    config
}

async fn orchestrator(source: SimulatedSource) -> LampcamOrchestrator {
    LampcamOrchestrator::with_source(test_config(), Box::new(source))
        .await
        .unwrap()
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let mut orchestrator = orchestrator(SimulatedSource::new(64, 48)).await;
    assert!(orchestrator.get_all_component_states().await.is_empty());

    orchestrator.initialize().await.unwrap();
    assert_eq!(
        orchestrator.get_component_state("camera_hub").await,
        Some(ComponentState::Stopped)
    );
    assert_eq!(
        orchestrator.get_component_state("pipeline").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_start_produces_presence_results() {
    let mut orchestrator = orchestrator(SimulatedSource::new(64, 48)).await;
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let hub = orchestrator.hub();
    let pipeline = orchestrator.pipeline();
    assert!(hub.is_running());
    assert!(pipeline.is_running());
    assert!(hub.status().consumers.contains(&"pipeline".to_string()));

    let got_result = wait_until(Duration::from_secs(3), || {
        pipeline
            .latest_result()
            .map(|result| result.stage("presence").is_some())
            .unwrap_or(false)
    })
    .await;
    assert!(got_result);

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    assert!(!hub.is_running());
    assert!(!pipeline.is_running());
    assert_eq!(
        orchestrator.get_component_state("camera_hub").await,
        Some(ComponentState::Stopped)
    );
    assert_eq!(
        orchestrator.get_component_state("pipeline").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_missing_camera_is_not_fatal() {
    let mut orchestrator = orchestrator(SimulatedSource::new(64, 48).unplugged()).await;
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let hub = orchestrator.hub();
    assert!(hub.is_running());
    assert!(!hub.status().connected);

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_run_returns_after_shutdown_request() {
    let mut orchestrator = orchestrator(SimulatedSource::new(64, 48)).await;
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let trigger = orchestrator.shutdown_trigger();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger(ShutdownReason::UserRequest).await;
    });

    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit_code, 0);
    assert!(!orchestrator.hub().is_running());
}

#[tokio::test]
async fn test_shutdown_trigger_fires_once() {
    let orchestrator = orchestrator(SimulatedSource::new(64, 48)).await;
    let trigger = orchestrator.shutdown_trigger();

    assert!(trigger.trigger(ShutdownReason::UserRequest).await);
    assert!(!trigger.trigger(ShutdownReason::UserRequest).await);
}

#[tokio::test]
async fn test_run_twice_is_an_error() {
    let mut orchestrator = orchestrator(SimulatedSource::new(64, 48)).await;
    orchestrator
        .shutdown_trigger()
        .trigger(ShutdownReason::UserRequest)
        .await;

    assert_eq!(orchestrator.run().await.unwrap(), 0);
    assert!(orchestrator.run().await.is_err());
}
