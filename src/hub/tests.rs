use super::*;
use crate::frame::FrameOrigin;
use crate::source::{SimulatedHandle, SimulatedSource};
use std::sync::atomic::{AtomicBool, AtomicUsize};

fn test_config() -> LampcamConfig {
    let mut config = LampcamConfig::default();
    config.camera.device = "0".to_string();
    config.camera.fallback_devices = Vec::new();
    config.camera.resolution = (64, 48);
    config.camera.fps = 50;
    config.reconnect.interval_ms = 1000;
    config.reconnect.max_interval_ms = 8000;
    config.reconnect.max_open_retries = 3;
    config.reconnect.read_failure_threshold = 5;
    config.reconnect.stop_timeout_ms = 2000;
    config
}

fn hub_with(source: SimulatedSource) -> (CameraHub, SimulatedHandle) {
    let handle = source.handle();
    (CameraHub::new(&test_config(), Box::new(source)), handle)
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(ms(5));
    }
    condition()
}

#[test]
fn test_failures_below_threshold_do_not_reconnect() {
    let (hub, handle) = hub_with(SimulatedSource::new(64, 48));
    hub.open().unwrap();
    let queue = hub.register_consumer("posture", Some(10)).unwrap();
    handle.fail_next_reads(3);

    let t0 = Instant::now();
    for i in 0..3 {
        let frame = hub.step_at(t0 + ms(20 * i)).unwrap();
        assert_eq!(frame.origin, FrameOrigin::SignalLost);
    }
    let frame = hub.step_at(t0 + ms(60)).unwrap();
    assert_eq!(frame.origin, FrameOrigin::Camera);

    let status = hub.status();
    assert_eq!(status.reconnect_count, 0);
    assert_eq!(status.state, HubState::Streaming);
    assert_eq!(status.read_failures, 3);
    // One frame per cycle, stand-ins included
    assert_eq!(queue.len(), 4);
}

#[test]
fn test_failures_beyond_threshold_reconnect_once() {
    let (hub, handle) = hub_with(SimulatedSource::new(64, 48));
    hub.open().unwrap();
    handle.fail_next_reads(6);

    let t0 = Instant::now();
    for i in 0..5 {
        hub.step_at(t0 + ms(20 * i)).unwrap();
        assert_eq!(hub.state(), HubState::Streaming);
    }
    hub.step_at(t0 + ms(100)).unwrap();
    assert_eq!(hub.state(), HubState::Reconnecting);
    assert_eq!(hub.status().reconnect_count, 0);

    let opens_before = handle.open_attempts();
    let frame = hub.step_at(t0 + ms(120)).unwrap();

    assert_eq!(hub.status().reconnect_count, 1);
    assert_eq!(handle.open_attempts(), opens_before + 1);
    assert_eq!(hub.state(), HubState::Streaming);
    assert_eq!(frame.origin, FrameOrigin::Camera);
}

#[test]
fn test_reconnect_attempts_are_rate_limited() {
    let (hub, handle) = hub_with(SimulatedSource::new(64, 48));
    hub.open().unwrap();
    handle.fail_next_reads(6);
    handle.set_available(false);

    let t0 = Instant::now();
    for i in 0..6 {
        hub.step_at(t0 + ms(20 * i)).unwrap();
    }

    let t1 = t0 + ms(200);
    hub.step_at(t1).unwrap();
    assert_eq!(hub.status().reconnect_count, 1);

    for i in 1..10 {
        let frame = hub.step_at(t1 + ms(100 * i)).unwrap();
        assert_eq!(frame.origin, FrameOrigin::SignalLost);
    }
    assert_eq!(hub.status().reconnect_count, 1);

    hub.step_at(t1 + ms(1000)).unwrap();
    assert_eq!(hub.status().reconnect_count, 2);

    // Spacing doubles after the second failure
    hub.step_at(t1 + ms(2500)).unwrap();
    assert_eq!(hub.status().reconnect_count, 2);
    hub.step_at(t1 + ms(3000)).unwrap();
    assert_eq!(hub.status().reconnect_count, 3);
}

#[test]
fn test_total_device_loss_settles_in_synthetic_mode() {
    let (hub, handle) = hub_with(SimulatedSource::new(64, 48).unplugged());
    let queue = hub.register_consumer("preview", Some(50)).unwrap();

    let t0 = Instant::now();
    let first = hub.step_at(t0).unwrap();
    assert_eq!(first.origin, FrameOrigin::SignalLost);
    assert_eq!(hub.state(), HubState::Reconnecting);

    hub.step_at(t0 + ms(1000)).unwrap();
    let frame = hub.step_at(t0 + ms(3000)).unwrap();
    assert_eq!(frame.origin, FrameOrigin::Synthetic);
    assert_eq!(hub.state(), HubState::Degraded(DegradedMode::Synthetic));

    let attempts = handle.open_attempts();
    assert_eq!(attempts, 3);

    // Even once the device is back, synthetic mode holds until open()
    handle.set_available(true);
    for i in 0..20 {
        let frame = hub.step_at(t0 + ms(10_000 + 1000 * i)).unwrap();
        assert_eq!(frame.origin, FrameOrigin::Synthetic);
    }
    assert_eq!(handle.open_attempts(), attempts);
    assert_eq!(queue.len(), 23);

    let status = hub.status();
    assert!(status.is_synthetic);
    assert!(!status.connected);

    assert_eq!(hub.open().unwrap(), "0");
    let frame = hub.step_at(t0 + ms(40_000)).unwrap();
    assert_eq!(frame.origin, FrameOrigin::Camera);
    assert!(hub.status().connected);
}

#[test]
fn test_open_falls_back_through_candidates() {
    let mut config = test_config();
    config.camera.device = "0".to_string();
    config.camera.fallback_devices = vec!["1".to_string(), "/dev/video2".to_string()];
    let source = SimulatedSource::new(64, 48).with_devices(&["/dev/video2"]);
    let hub = CameraHub::new(&config, Box::new(source));

    assert_eq!(hub.open().unwrap(), "/dev/video2");
    assert_eq!(hub.status().device.as_deref(), Some("/dev/video2"));
}

#[test]
fn test_open_failure_lists_candidates() {
    let (hub, _handle) = hub_with(SimulatedSource::new(64, 48).unplugged());
    let err = hub.open().unwrap_err();

    assert_eq!(
        err,
        CameraError::DeviceOpen {
            candidates: vec!["0".to_string()]
        }
    );
    assert_eq!(hub.state(), HubState::Reconnecting);
}

#[test]
fn test_latest_frame_before_and_after_capture() {
    let (hub, _handle) = hub_with(SimulatedSource::new(64, 48));

    let placeholder = hub.latest_frame();
    assert_eq!(placeholder.origin, FrameOrigin::SignalLost);
    assert_eq!(placeholder.dimensions(), (64, 48));

    hub.open().unwrap();
    let produced = hub.step_at(Instant::now()).unwrap();
    let latest = hub.latest_frame();
    assert_eq!(latest.id, produced.id);
    assert_eq!(latest.origin, FrameOrigin::Camera);
}

#[test]
fn test_callback_consumers_receive_every_frame() {
    let (hub, _handle) = hub_with(SimulatedSource::new(64, 48));
    hub.open().unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    assert!(hub.register_callback("stats", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    hub.register_callback("broken", |_| Err(anyhow::anyhow!("not today")));

    let t0 = Instant::now();
    for i in 0..5 {
        hub.step_at(t0 + ms(20 * i)).unwrap();
    }

    assert_eq!(seen.load(Ordering::SeqCst), 5);
    let status = hub.status();
    assert_eq!(status.consumer_count, 2);
    assert_eq!(status.frames_produced, 5);

    assert!(hub.unregister("broken"));
    assert_eq!(hub.status().consumers, vec!["stats".to_string()]);
}

#[test]
fn test_frame_ids_increase() {
    let (hub, _handle) = hub_with(SimulatedSource::new(64, 48));
    hub.open().unwrap();

    let t0 = Instant::now();
    let ids: Vec<u64> = (0..4)
        .map(|i| hub.step_at(t0 + ms(20 * i)).unwrap().id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn test_measured_fps_follows_cadence() {
    let (hub, _handle) = hub_with(SimulatedSource::new(64, 48));
    hub.open().unwrap();

    let t0 = Instant::now();
    for i in 0..30 {
        hub.step_at(t0 + ms(40 * i)).unwrap();
    }

    assert!((hub.status().measured_fps - 25.0).abs() < 0.1);
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let (hub, handle) = hub_with(SimulatedSource::new(64, 48));
    let queue = hub.register_consumer("posture", Some(100)).unwrap();

    hub.stop().unwrap();
    hub.start().unwrap();
    hub.start().unwrap();
    assert!(hub.is_running());
    assert!(hub.step_at(Instant::now()).is_none());

    assert!(wait_for(Duration::from_secs(3), || queue.len() >= 5));
    assert!(hub.status().connected);
    assert!(hub.status().uptime.is_some());

    hub.stop().unwrap();
    hub.stop().unwrap();
    assert!(!hub.is_running());
    assert!(queue.is_empty());
    assert_eq!(handle.closes(), 1);
    assert_eq!(hub.state(), HubState::Uninitialized);

    // Restart reopens the device
    hub.start().unwrap();
    assert!(wait_for(Duration::from_secs(3), || hub.status().connected));
    hub.stop().unwrap();
}

#[test]
fn test_stalled_worker_is_abandoned_and_not_restarted() {
    let mut config = test_config();
    config.reconnect.stop_timeout_ms = 50;
    let hub = CameraHub::new(&config, Box::new(SimulatedSource::new(64, 48)));

    let entered = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&entered);
    hub.register_callback("slow", move |_| {
        flag.store(true, Ordering::SeqCst);
        std::thread::sleep(ms(600));
        Ok(())
    });

    hub.start().unwrap();
    assert!(wait_for(Duration::from_secs(3), || entered.load(Ordering::SeqCst)));

    let started = Instant::now();
    assert!(hub.stop().is_err());
    assert!(started.elapsed() < ms(400));
    assert!(!hub.is_running());

    // The abandoned thread may still own the device
    assert!(hub.start().is_err());
    assert!(!hub.is_running());
    assert_eq!(hub.open().unwrap_err(), CameraError::NotAvailable);
}

#[test]
fn test_open_while_running_goes_through_worker() {
    let (hub, handle) = hub_with(SimulatedSource::new(64, 48));
    hub.start().unwrap();
    assert!(wait_for(Duration::from_secs(3), || hub.status().connected));

    let opens_before = handle.open_attempts();
    assert_eq!(hub.open().unwrap(), "0");
    assert!(handle.open_attempts() > opens_before);

    hub.stop().unwrap();
}

#[test]
fn test_no_starvation_under_sporadic_read_failures() {
    let (hub, handle) = hub_with(SimulatedSource::new(64, 48));
    let queue = hub.register_consumer("posture", Some(200)).unwrap();
    hub.start().unwrap();
    assert!(wait_for(Duration::from_secs(3), || hub.status().connected));

    for _ in 0..5 {
        let pushed = queue.stats().pushed;
        handle.fail_next_reads(4);
        assert!(wait_for(Duration::from_secs(3), || {
            queue.stats().pushed >= pushed + 6
        }));
    }

    let status = hub.status();
    hub.stop().unwrap();

    assert_eq!(status.reconnect_count, 0);
    assert!(status.read_failures > 0);
    assert!(status.frames_produced >= 30);
}
