use super::{FrameData, FrameOrigin, FrameOverlay};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use std::f64::consts::PI;
use std::time::SystemTime;
use tracing::info;

/// Number of distinct frames in the synthetic cycle
pub const SYNTHETIC_FRAME_COUNT: usize = 10;

/// Generator for synthetic and stand-in frames
///
/// Synthetic mode cycles through a fixed set of gradient frames with a moving
/// disc; every emitted frame carries the current time. Stand-in frames are a
/// flat red background with a message, used when a cycle yields no device
/// frame.
pub struct SyntheticFrames {
    width: u32,
    height: u32,
    frames: Vec<RgbImage>,
    next_index: usize,
    overlay: FrameOverlay,
}

impl SyntheticFrames {
    pub fn new(width: u32, height: u32, overlay: FrameOverlay) -> Self {
        Self {
            width,
            height,
            frames: Vec::new(),
            next_index: 0,
            overlay,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Index of the pattern the next synthetic frame will use
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Produce the next frame of the synthetic cycle
    pub fn next_frame(&mut self, id: u64, timestamp: SystemTime) -> FrameData {
        if self.frames.is_empty() {
            self.frames = self.build_patterns();
            info!(
                "Generated {} synthetic frames at {}x{}",
                self.frames.len(),
                self.width,
                self.height
            );
        }

        let mut image = self.frames[self.next_index].clone();
        self.next_index = (self.next_index + 1) % self.frames.len();

        self.overlay.stamp_timestamp(&mut image, timestamp);
        FrameData::from_rgb(id, timestamp, image, FrameOrigin::Synthetic)
    }

    /// Produce a stand-in frame carrying a message
    pub fn stand_in(&self, id: u64, timestamp: SystemTime, message: &str) -> FrameData {
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([200, 50, 50]));

        let x = (self.width / 4) as i32;
        let y = (self.height / 2) as i32;
        self.overlay.draw_text(&mut image, message, x, y - 30, 28.0);
        self.overlay.stamp_timestamp(&mut image, timestamp);

        FrameData::from_rgb(id, timestamp, image, FrameOrigin::SignalLost)
    }

    fn build_patterns(&self) -> Vec<RgbImage> {
        let (w, h) = (self.width, self.height);
        let mut patterns = Vec::with_capacity(SYNTHETIC_FRAME_COUNT);

        for i in 0..SYNTHETIC_FRAME_COUNT {
            let mut image = RgbImage::from_fn(w, h, |x, y| {
                let r = 255.0 * (1.0 - (x + y) as f64 / (w + h) as f64);
                let g = 255.0 * y as f64 / h as f64;
                let b = 255.0 * x as f64 / w as f64;
                Rgb([r as u8, g as u8, b as u8])
            });

            let angle = (i as f64 * 36.0) * PI / 180.0;
            let center = (
                (w as f64 / 2.0 + 100.0 * angle.cos()) as i32,
                (h as f64 / 2.0 + 100.0 * angle.sin()) as i32,
            );
            let radius = 50 + 20 * (i as i32 % 5);
            draw_filled_circle_mut(&mut image, center, radius, Rgb([255, 255, 255]));

            self.overlay
                .draw_text(&mut image, &format!("Synthetic camera #{}", i + 1), 50, 30, 28.0);

            patterns.push(image);
        }

        patterns
    }
}
