use crate::config::PipelineConfig;
use crate::error::Result;
use crate::frame::FrameData;
use crate::pipeline::AnalysisStage;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::{dilate, erode},
    region_labelling::{connected_components, Connectivity},
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Background learning rate of the running average
const LEARNING_RATE: f32 = 0.05;

/// Output of one presence check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceReport {
    /// Changed area is above the configured fraction
    pub present: bool,
    /// Share of pixels differing from the background
    pub changed_fraction: f64,
    /// Pixel count of the largest changed region
    pub largest_region: u32,
    /// Frames since the background was (re)initialised
    pub frames_analyzed: u64,
    /// First frame after a reset, nothing to compare against yet
    pub warming_up: bool,
}

/// Detects activity in front of the lamp by background differencing
///
/// Keeps a running-average background per processing resolution; a change
/// of resolution restarts the model.
pub struct PresenceStage {
    delta: u8,
    threshold: f64,
    background: Option<GrayImage>,
    frames_analyzed: u64,
}

impl PresenceStage {
    pub fn new(config: &PipelineConfig) -> Self {
        info!(
            "Presence stage: delta {}, threshold {:.3}",
            config.presence_delta, config.presence_threshold
        );
        Self {
            delta: config.presence_delta,
            threshold: config.presence_threshold,
            background: None,
            frames_analyzed: 0,
        }
    }

    /// Compare a frame with the background and update the model
    pub fn detect(&mut self, frame: &FrameData) -> Result<PresenceReport> {
        let gray = frame.to_gray_image()?;
        let blurred = gaussian_blur_f32(&gray, 2.0);

        let background = match self.background.take() {
            Some(background) if background.dimensions() == blurred.dimensions() => background,
            previous => {
                if previous.is_some() {
                    debug!(
                        "Frame size changed to {}x{}, resetting background",
                        blurred.width(),
                        blurred.height()
                    );
                }
                self.background = Some(blurred);
                self.frames_analyzed = 1;
                return Ok(PresenceReport {
                    present: false,
                    changed_fraction: 0.0,
                    largest_region: 0,
                    frames_analyzed: self.frames_analyzed,
                    warming_up: true,
                });
            }
        };

        let diff = difference(&background, &blurred);
        let mask = threshold(&diff, self.delta);
        let cleaned = dilate(&erode(&mask, Norm::LInf, 1), Norm::LInf, 1);

        let total = (cleaned.width() * cleaned.height()).max(1) as f64;
        let changed = cleaned.pixels().filter(|p| p[0] > 0).count() as f64;
        let changed_fraction = changed / total;

        let components = connected_components(&cleaned, Connectivity::Eight, Luma([0u8]));
        let largest_region = largest_component(&components);

        self.background = Some(blend(background, &blurred));
        self.frames_analyzed += 1;

        let present = changed_fraction >= self.threshold && largest_region > 0;
        debug!(
            "Presence: {:.3} changed, largest region {} px, present {}",
            changed_fraction, largest_region, present
        );

        Ok(PresenceReport {
            present,
            changed_fraction,
            largest_region,
            frames_analyzed: self.frames_analyzed,
            warming_up: false,
        })
    }

    pub fn reset(&mut self) {
        self.background = None;
        self.frames_analyzed = 0;
    }
}

impl AnalysisStage for PresenceStage {
    fn name(&self) -> &str {
        "presence"
    }

    fn analyze(&mut self, frame: &FrameData) -> anyhow::Result<serde_json::Value> {
        let report = self.detect(frame)?;
        Ok(serde_json::to_value(report)?)
    }
}

fn difference(background: &GrayImage, current: &GrayImage) -> GrayImage {
    let (width, height) = background.dimensions();
    let mut diff = GrayImage::new(width, height);

    for (x, y, bg) in background.enumerate_pixels() {
        let value = (bg[0] as i16 - current.get_pixel(x, y)[0] as i16).unsigned_abs() as u8;
        diff.put_pixel(x, y, Luma([value]));
    }

    diff
}

fn largest_component(components: &ImageBuffer<Luma<u32>, Vec<u32>>) -> u32 {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for pixel in components.pixels() {
        if pixel[0] > 0 {
            *counts.entry(pixel[0]).or_insert(0) += 1;
        }
    }
    counts.values().max().copied().unwrap_or(0)
}

fn blend(mut background: GrayImage, current: &GrayImage) -> GrayImage {
    for (bg, cur) in background.pixels_mut().zip(current.pixels()) {
        let value = bg[0] as f32 * (1.0 - LEARNING_RATE) + cur[0] as f32 * LEARNING_RATE;
        bg[0] = value as u8;
    }
    background
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use std::time::SystemTime;

    fn flat(id: u64, value: u8) -> FrameData {
        FrameData::new(
            id,
            SystemTime::now(),
            vec![value; 64 * 48 * 3],
            64,
            48,
            FrameFormat::Rgb24,
        )
    }

    fn with_block(id: u64) -> FrameData {
        let mut data = vec![20u8; 64 * 48 * 3];
        for y in 10..38 {
            for x in 16..48 {
                let i = (y * 64 + x) * 3;
                data[i..i + 3].copy_from_slice(&[240, 240, 240]);
            }
        }
        FrameData::new(id, SystemTime::now(), data, 64, 48, FrameFormat::Rgb24)
    }

    #[test]
    fn test_first_frame_initialises_background() {
        let mut stage = PresenceStage::new(&PipelineConfig::default());
        let report = stage.detect(&flat(1, 20)).unwrap();

        assert!(report.warming_up);
        assert!(!report.present);
    }

    #[test]
    fn test_static_scene_is_empty() {
        let mut stage = PresenceStage::new(&PipelineConfig::default());
        stage.detect(&flat(1, 20)).unwrap();
        let report = stage.detect(&flat(2, 20)).unwrap();

        assert!(!report.present);
        assert_eq!(report.changed_fraction, 0.0);
        assert_eq!(report.largest_region, 0);
    }

    #[test]
    fn test_large_change_reports_presence() {
        let mut stage = PresenceStage::new(&PipelineConfig::default());
        stage.detect(&flat(1, 20)).unwrap();
        let report = stage.detect(&with_block(2)).unwrap();

        assert!(report.present);
        assert!(report.changed_fraction > 0.2);
        assert!(report.largest_region > 500);
    }

    #[test]
    fn test_resolution_change_restarts_model() {
        let mut stage = PresenceStage::new(&PipelineConfig::default());
        stage.detect(&flat(1, 20)).unwrap();

        let smaller = flat(2, 20).resize(32, 24).unwrap();
        let report = stage.detect(&smaller).unwrap();
        assert!(report.warming_up);
        assert_eq!(report.frames_analyzed, 1);
    }

    #[test]
    fn test_stage_output_is_json() {
        let mut stage = PresenceStage::new(&PipelineConfig::default());
        assert_eq!(stage.name(), "presence");

        stage.analyze(&flat(1, 20)).unwrap();
        let value = stage.analyze(&with_block(2)).unwrap();
        assert_eq!(value["present"], serde_json::Value::Bool(true));
    }
}
