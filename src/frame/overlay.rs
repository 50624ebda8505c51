use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Resolve configured timezone, falling back to UTC on parse errors
pub(crate) fn resolve_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Invalid overlay timezone '{}', falling back to UTC", tz_name);
            chrono_tz::UTC
        }
    }
}

/// Draws text and timestamps onto generated frames
///
/// Text needs a TrueType font. Without one, timestamps are rendered as a
/// seconds ticker along the bottom edge so generated frames still change
/// visibly over time.
#[derive(Clone)]
pub struct FrameOverlay {
    font: Option<Font<'static>>,
    timezone: Tz,
}

impl FrameOverlay {
    /// Create an overlay, loading the font if a path is given
    pub fn new(font_path: Option<&str>, timezone: &str) -> Self {
        let font = font_path.and_then(|path| match std::fs::read(path) {
            Ok(data) => {
                let font = Font::try_from_vec(data);
                if font.is_none() {
                    warn!("Failed to parse overlay font '{}'", path);
                }
                font
            }
            Err(e) => {
                warn!("Failed to read overlay font '{}': {}", path, e);
                None
            }
        });

        Self {
            font,
            timezone: resolve_timezone(timezone),
        }
    }

    /// Overlay without a font
    pub fn plain() -> Self {
        Self {
            font: None,
            timezone: chrono_tz::UTC,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn format_timestamp(&self, timestamp: SystemTime) -> String {
        DateTime::<Utc>::from(timestamp)
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// Draw a line of text with its top-left corner at (x, y)
    pub fn draw_text(&self, image: &mut RgbImage, text: &str, x: i32, y: i32, size: f32) {
        let Some(font) = &self.font else {
            return;
        };

        let scale = Scale::uniform(size);
        draw_text_mut(image, Rgb([255, 255, 255]), x, y, scale, font, text);
    }

    /// Stamp the timestamp onto the image, bottom right
    pub fn stamp_timestamp(&self, image: &mut RgbImage, timestamp: SystemTime) {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        match &self.font {
            Some(font) => {
                let text = self.format_timestamp(timestamp);
                let scale = Scale::uniform(20.0);
                let (text_width, text_height) = text_size(scale, font, &text);
                let x = (width as i32 - text_width - 10).max(0);
                let y = (height as i32 - text_height - 10).max(0);

                // Darken the area behind the text so it stays legible
                for py in y.max(0) as u32..((y + text_height + 4) as u32).min(height) {
                    for px in x.max(0) as u32..((x + text_width + 4) as u32).min(width) {
                        let pixel = image.get_pixel(px, py);
                        image.put_pixel(px, py, Rgb([pixel[0] / 3, pixel[1] / 3, pixel[2] / 3]));
                    }
                }

                draw_text_mut(image, Rgb([255, 255, 255]), x, y, scale, font, &text);
            }
            None => {
                let seconds = timestamp
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
                    % 60;
                let bar_height = (height / 40).max(2).min(height);
                let bar_width = ((width as u64 * (seconds + 1)) / 60).max(1) as u32;
                draw_filled_rect_mut(
                    image,
                    Rect::at(0, (height - bar_height) as i32).of_size(width, bar_height),
                    Rgb([0, 0, 0]),
                );
                draw_filled_rect_mut(
                    image,
                    Rect::at(0, (height - bar_height) as i32).of_size(bar_width, bar_height),
                    Rgb([255, 255, 255]),
                );
                debug!("Stamped seconds ticker ({}s) without a font", seconds);
            }
        }
    }
}
