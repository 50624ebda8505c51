use crate::frame::FrameData;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Shared handle to a consumer queue
pub type QueueHandle = Arc<FrameQueue>;

/// Bounded FIFO of frames with drop-oldest overflow
///
/// The producer never blocks: pushing into a full queue evicts the oldest
/// frame first. Consumers may block on [`FrameQueue::pop_timeout`].
pub struct FrameQueue {
    frames: Mutex<VecDeque<FrameData>>,
    available: Condvar,
    capacity: usize,
    stats: QueueStats,
}

#[derive(Debug, Default)]
struct QueueStats {
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    pub queued: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Append a frame, evicting the oldest one when full
    ///
    /// Returns `true` when a frame was dropped to make room.
    pub fn push(&self, frame: FrameData) -> bool {
        let mut frames = self.frames.lock();
        let dropped = if frames.len() >= self.capacity {
            if let Some(old) = frames.pop_front() {
                trace!("Queue full, dropped frame {}", old.id);
            }
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };

        frames.push_back(frame);
        drop(frames);

        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        dropped
    }

    /// Take the oldest frame without waiting
    pub fn pop(&self) -> Option<FrameData> {
        let frame = self.frames.lock().pop_front();
        if frame.is_some() {
            self.stats.popped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Take the oldest frame, waiting at most `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<FrameData> {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock();

        loop {
            if let Some(frame) = frames.pop_front() {
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                return Some(frame);
            }

            if self.available.wait_until(&mut frames, deadline).timed_out() {
                let frame = frames.pop_front();
                if frame.is_some() {
                    self.stats.popped.fetch_add(1, Ordering::Relaxed);
                }
                return frame;
            }
        }
    }

    /// Frames currently queued, oldest first
    pub fn peek_all(&self) -> Vec<FrameData> {
        self.frames.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard every queued frame
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let cleared = frames.len();
        frames.clear();
        cleared
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            popped: self.stats.popped.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            queued: self.len(),
        }
    }
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
