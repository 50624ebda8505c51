use std::collections::VecDeque;
use std::time::Instant;

/// Frame rate over the most recent timestamps
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: usize,
    timestamps: VecDeque<Instant>,
    last_fps: f64,
    total_frames: u64,
}

impl FpsCounter {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            timestamps: VecDeque::with_capacity(window),
            last_fps: 0.0,
            total_frames: 0,
        }
    }

    /// Record a frame now and return the updated rate
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f64 {
        if self.timestamps.len() >= self.window {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(now);
        self.total_frames += 1;

        if let (Some(first), Some(last)) = (self.timestamps.front(), self.timestamps.back()) {
            let span = last.saturating_duration_since(*first).as_secs_f64();
            if self.timestamps.len() >= 2 && span > 0.0 {
                self.last_fps = (self.timestamps.len() - 1) as f64 / span;
            }
        }

        self.last_fps
    }

    pub fn fps(&self) -> f64 {
        self.last_fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Forget measurements taken under different conditions
    pub fn reset(&mut self) {
        self.timestamps.clear();
        self.last_fps = 0.0;
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(10)
    }
}
