//! Named frame consumers and per-cycle fan-out.

use crate::error::{LampcamError, Result};
use crate::frame::FrameData;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

mod queue;
#[cfg(test)]
mod tests;

pub use queue::{FrameQueue, QueueHandle, QueueStatsSnapshot};

/// Push-delivery sink run on the capture worker
///
/// Must return quickly: while it runs, no other consumer receives the frame.
pub type FrameCallback = Arc<dyn Fn(FrameData) -> anyhow::Result<()> + Send + Sync>;

enum Sink {
    Queue(QueueHandle),
    Callback(FrameCallback),
}

struct ConsumerEntry {
    id: String,
    sink: Sink,
    delivered: AtomicU64,
    failures: AtomicU64,
    slow_calls: AtomicU64,
}

impl ConsumerEntry {
    fn new(id: &str, sink: Sink) -> Self {
        Self {
            id: id.to_string(),
            sink,
            delivered: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            slow_calls: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerKind {
    Queue,
    Callback,
}

/// Per-consumer delivery counters
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerSnapshot {
    pub id: String,
    pub kind: ConsumerKind,
    pub capacity: Option<usize>,
    pub queued: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub failures: u64,
    pub slow_calls: u64,
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
    pub failed: usize,
}

/// Registry of named consumers
///
/// Registration changes take the registry lock and publish a new consumer
/// list. Fan-out reads the published list without locking the registry, so
/// each queue is only guarded by its own lock.
pub struct ConsumerRegistry {
    entries: Mutex<Vec<Arc<ConsumerEntry>>>,
    published: ArcSwap<Vec<Arc<ConsumerEntry>>>,
    default_capacity: usize,
    callback_budget: Duration,
}

impl ConsumerRegistry {
    pub fn new(default_capacity: usize, callback_budget: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            published: ArcSwap::from_pointee(Vec::new()),
            default_capacity: default_capacity.max(1),
            callback_budget,
        }
    }

    /// Register a queue-backed consumer
    ///
    /// An id that is already registered as a queue returns the existing queue,
    /// whatever capacity is asked for. `None` uses the default capacity.
    pub fn register_queue(&self, id: &str, capacity: Option<usize>) -> Result<QueueHandle> {
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.iter().find(|entry| entry.id == id) {
            return match &existing.sink {
                Sink::Queue(queue) => {
                    debug!("Consumer '{}' already registered, reusing its queue", id);
                    Ok(Arc::clone(queue))
                }
                Sink::Callback(_) => Err(LampcamError::component(
                    "registry",
                    &format!("consumer '{}' is registered as a callback", id),
                )),
            };
        }

        let capacity = capacity.unwrap_or(self.default_capacity);
        let queue = Arc::new(FrameQueue::new(capacity));
        entries.push(Arc::new(ConsumerEntry::new(id, Sink::Queue(Arc::clone(&queue)))));
        self.publish(&entries);

        info!("Registered queue consumer '{}' (capacity {})", id, queue.capacity());
        Ok(queue)
    }

    /// Register a callback consumer
    ///
    /// Returns `false` and keeps the existing sink when the id is taken.
    pub fn register_callback<F>(&self, id: &str, callback: F) -> bool
    where
        F: Fn(FrameData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock();

        if entries.iter().any(|entry| entry.id == id) {
            warn!("Consumer '{}' already registered, keeping existing sink", id);
            return false;
        }

        entries.push(Arc::new(ConsumerEntry::new(
            id,
            Sink::Callback(Arc::new(callback)),
        )));
        self.publish(&entries);

        info!("Registered callback consumer '{}'", id);
        true
    }

    /// Remove a consumer; unknown ids are ignored
    pub fn unregister(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);

        if entries.len() == before {
            debug!("Unregister of unknown consumer '{}' ignored", id);
            return false;
        }

        self.publish(&entries);
        info!("Unregistered consumer '{}'", id);
        true
    }

    fn publish(&self, entries: &[Arc<ConsumerEntry>]) {
        self.published.store(Arc::new(entries.to_vec()));
    }

    /// Deliver one frame to every consumer
    ///
    /// Each consumer gets its own copy. Queue consumers never block the
    /// caller. Callback errors and panics are logged and contained.
    pub fn fan_out(&self, frame: &FrameData) -> FanOutReport {
        let consumers = self.published.load();
        let mut report = FanOutReport::default();

        for entry in consumers.iter() {
            match &entry.sink {
                Sink::Queue(queue) => {
                    if queue.push(frame.clone()) {
                        report.dropped += 1;
                    }
                    entry.delivered.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Sink::Callback(callback) => {
                    if self.invoke_callback(entry, callback, frame) {
                        entry.delivered.fetch_add(1, Ordering::Relaxed);
                        report.delivered += 1;
                    } else {
                        entry.failures.fetch_add(1, Ordering::Relaxed);
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    fn invoke_callback(
        &self,
        entry: &ConsumerEntry,
        callback: &FrameCallback,
        frame: &FrameData,
    ) -> bool {
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(frame.clone())));
        let elapsed = started.elapsed();

        if elapsed > self.callback_budget {
            entry.slow_calls.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Callback '{}' took {:?} (budget {:?}), fan-out was stalled",
                entry.id, elapsed, self.callback_budget
            );
        }

        let failure = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => LampcamError::ConsumerCallback {
                consumer: entry.id.clone(),
                message: format!("{:#}", e),
            },
            Err(panic) => LampcamError::ConsumerCallback {
                consumer: entry.id.clone(),
                message: panic_message(panic.as_ref()),
            },
        };

        error!("{}", failure);
        false
    }

    /// Queue of a registered consumer
    pub fn queue(&self, id: &str) -> Option<QueueHandle> {
        self.published.load().iter().find_map(|entry| match &entry.sink {
            Sink::Queue(queue) if entry.id == id => Some(Arc::clone(queue)),
            _ => None,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.published.load().iter().any(|entry| entry.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.published
            .load()
            .iter()
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.published.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.load().is_empty()
    }

    /// Empty every consumer queue, returning the number of frames discarded
    pub fn clear_queues(&self) -> usize {
        self.published
            .load()
            .iter()
            .map(|entry| match &entry.sink {
                Sink::Queue(queue) => queue.clear(),
                Sink::Callback(_) => 0,
            })
            .sum()
    }

    pub fn snapshot(&self) -> Vec<ConsumerSnapshot> {
        self.published
            .load()
            .iter()
            .map(|entry| {
                let delivered = entry.delivered.load(Ordering::Relaxed);
                let failures = entry.failures.load(Ordering::Relaxed);
                let slow_calls = entry.slow_calls.load(Ordering::Relaxed);
                match &entry.sink {
                    Sink::Queue(queue) => {
                        let stats = queue.stats();
                        ConsumerSnapshot {
                            id: entry.id.clone(),
                            kind: ConsumerKind::Queue,
                            capacity: Some(queue.capacity()),
                            queued: stats.queued,
                            delivered,
                            dropped: stats.dropped,
                            failures,
                            slow_calls,
                        }
                    }
                    Sink::Callback(_) => ConsumerSnapshot {
                        id: entry.id.clone(),
                        kind: ConsumerKind::Callback,
                        capacity: None,
                        queued: 0,
                        delivered,
                        dropped: 0,
                        failures,
                        slow_calls,
                    },
                }
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
