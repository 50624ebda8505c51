use super::*;
use crate::frame::FrameFormat;
use std::sync::atomic::AtomicUsize;
use std::time::SystemTime;

fn frame(id: u64) -> FrameData {
    FrameData::new(id, SystemTime::now(), vec![0u8; 12], 2, 2, FrameFormat::Rgb24)
}

fn registry() -> ConsumerRegistry {
    ConsumerRegistry::new(5, Duration::from_millis(50))
}

#[test]
fn test_queue_keeps_newest_frames() {
    let registry = registry();
    let queue = registry.register_queue("posture", Some(5)).unwrap();

    for id in 1..=20 {
        registry.fan_out(&frame(id));
    }

    assert_eq!(queue.len(), 5);
    let ids: Vec<u64> = queue.peek_all().iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![16, 17, 18, 19, 20]);
    assert_eq!(queue.stats().dropped, 15);
}

#[test]
fn test_capacity_plus_one_evicts_oldest() {
    let queue = FrameQueue::new(3);
    assert!(!queue.push(frame(1)));
    assert!(!queue.push(frame(2)));
    assert!(!queue.push(frame(3)));
    assert!(queue.push(frame(4)));

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.pop().map(|f| f.id), Some(2));
    assert_eq!(queue.pop().map(|f| f.id), Some(3));
    assert_eq!(queue.pop().map(|f| f.id), Some(4));
    assert!(queue.pop().is_none());
}

#[test]
fn test_register_existing_id_returns_same_queue() {
    let registry = registry();
    let first = registry.register_queue("preview", Some(2)).unwrap();
    let second = registry.register_queue("preview", Some(10)).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.capacity(), 2);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_default_capacity() {
    let registry = registry();
    let queue = registry.register_queue("emotion", None).unwrap();
    assert_eq!(queue.capacity(), 5);
}

#[test]
fn test_queue_id_taken_by_callback() {
    let registry = registry();
    assert!(registry.register_callback("stats", |_| Ok(())));
    assert!(registry.register_queue("stats", None).is_err());
    assert!(!registry.register_callback("stats", |_| Ok(())));
}

#[test]
fn test_unregister_unknown_is_harmless() {
    let registry = registry();
    assert!(!registry.unregister("missing"));

    registry.register_queue("posture", None).unwrap();
    assert!(registry.unregister("posture"));
    assert!(registry.is_empty());

    // Unregistered queues stop receiving frames
    registry.fan_out(&frame(1));
    assert!(registry.queue("posture").is_none());
}

#[test]
fn test_failing_callbacks_do_not_disturb_others() {
    let registry = registry();
    let queue = registry.register_queue("posture", None).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    registry.register_callback("erroring", |_| Err(anyhow::anyhow!("boom")));
    registry.register_callback("panicking", |_| panic!("callback panic"));
    let counter = Arc::clone(&calls);
    registry.register_callback("counting", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let report = registry.fan_out(&frame(1));
    let report_two = registry.fan_out(&frame(2));

    assert_eq!(report.failed, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(report_two, report);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.len(), 2);

    let snapshot = registry.snapshot();
    let panicking = snapshot.iter().find(|c| c.id == "panicking").unwrap();
    assert_eq!(panicking.failures, 2);
    assert_eq!(panicking.kind, ConsumerKind::Callback);
}

#[test]
fn test_slow_callback_is_counted() {
    let registry = ConsumerRegistry::new(5, Duration::from_millis(1));
    registry.register_callback("slow", |_| {
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    });

    registry.fan_out(&frame(1));
    assert_eq!(registry.snapshot()[0].slow_calls, 1);
}

#[test]
fn test_consumers_receive_independent_copies() {
    let registry = registry();
    let a = registry.register_queue("a", None).unwrap();
    let b = registry.register_queue("b", None).unwrap();

    registry.fan_out(&frame(7));

    let mut from_a = a.pop().unwrap();
    let from_b = b.pop().unwrap();
    Arc::make_mut(&mut from_a.data)[0] = 255;

    assert_eq!(from_b.data[0], 0);
}

#[test]
fn test_pop_timeout_waits_for_producer() {
    let queue = Arc::new(FrameQueue::new(2));
    assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());

    let producer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            queue.push(frame(9));
        })
    };

    let received = queue.pop_timeout(Duration::from_secs(2));
    producer.join().unwrap();
    assert_eq!(received.map(|f| f.id), Some(9));
}

#[test]
fn test_clear_queues() {
    let registry = registry();
    let queue = registry.register_queue("posture", None).unwrap();
    registry.register_callback("noop", |_| Ok(()));

    registry.fan_out(&frame(1));
    registry.fan_out(&frame(2));

    assert_eq!(registry.clear_queues(), 2);
    assert!(queue.is_empty());
}
