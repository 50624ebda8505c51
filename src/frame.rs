use crate::error::{LampcamError, Result};
use image::imageops::FilterType;
use image::{GrayImage, ImageFormat, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

mod overlay;
mod synthetic;

pub use overlay::FrameOverlay;
pub use synthetic::{SyntheticFrames, SYNTHETIC_FRAME_COUNT};

/// Frame format enumeration supporting different video formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// YUV 4:2:2 format - uncompressed YUV data
    Yuyv,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Yuyv => 2,
            FrameFormat::Rgb24 => 3,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// Where the pixels of a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOrigin {
    /// Read from the capture device
    Camera,
    /// Generated while the hub runs in synthetic mode
    Synthetic,
    /// Placeholder produced for a cycle in which the device gave nothing
    SignalLost,
}

/// Frame data structure containing raw frame data and metadata
///
/// The pixel buffer is shared and immutable, so cloning a frame hands out an
/// independent copy that no other holder can mutate.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
    pub origin: FrameOrigin,
}

impl FrameData {
    /// Create a new camera frame
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
            origin: FrameOrigin::Camera,
        }
    }

    /// Wrap an RGB image as a frame
    pub fn from_rgb(id: u64, timestamp: SystemTime, image: RgbImage, origin: FrameOrigin) -> Self {
        let (width, height) = image.dimensions();
        Self {
            id,
            timestamp,
            data: Arc::new(image.into_raw()),
            width,
            height,
            format: FrameFormat::Rgb24,
            origin,
        }
    }

    pub fn with_origin(mut self, origin: FrameOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => !self.data.is_empty(),
        }
    }

    /// Decode the frame into an RGB image
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        match self.format {
            FrameFormat::Mjpeg => {
                let image = image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)
                    .map_err(|e| {
                        LampcamError::component("frame", &format!("MJPEG decode failed: {}", e))
                    })?;
                Ok(image.to_rgb8())
            }
            FrameFormat::Yuyv => self.yuyv_to_rgb(),
            FrameFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(|| {
                    LampcamError::component(
                        "frame",
                        &format!(
                            "RGB24 buffer of {} bytes does not match {}x{}",
                            self.data.len(),
                            self.width,
                            self.height
                        ),
                    )
                }),
        }
    }

    /// Convert the frame to grayscale
    pub fn to_gray_image(&self) -> Result<GrayImage> {
        let rgb = self.to_rgb_image()?;
        let mut gray = GrayImage::new(rgb.width(), rgb.height());
        for (x, y, px) in rgb.enumerate_pixels() {
            let value = (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) as u8;
            gray.put_pixel(x, y, Luma([value]));
        }
        Ok(gray)
    }

    /// Scale the frame to the given size, producing an RGB24 frame
    ///
    /// The returned frame keeps id, timestamp and origin. A frame already in
    /// RGB24 at the requested size is returned as a cheap clone.
    pub fn resize(&self, width: u32, height: u32) -> Result<FrameData> {
        if width == 0 || height == 0 {
            return Err(LampcamError::component(
                "frame",
                &format!("Cannot resize to {}x{}", width, height),
            ));
        }

        if self.format == FrameFormat::Rgb24 && self.dimensions() == (width, height) {
            return Ok(self.clone());
        }

        let rgb = self.to_rgb_image()?;
        let resized = if rgb.dimensions() == (width, height) {
            rgb
        } else {
            image::imageops::resize(&rgb, width, height, FilterType::Triangle)
        };

        Ok(FrameData::from_rgb(self.id, self.timestamp, resized, self.origin))
    }

    /// Convert YUYV to RGB (Y0 U Y1 V, 4 bytes for 2 pixels)
    fn yuyv_to_rgb(&self) -> Result<RgbImage> {
        let width = self.width;
        let height = self.height;
        let expected = width as usize * height as usize * 2;
        if self.data.len() < expected {
            return Err(LampcamError::component(
                "frame",
                &format!(
                    "YUYV buffer of {} bytes is too small for {}x{}",
                    self.data.len(),
                    width,
                    height
                ),
            ));
        }

        let row_bytes = width as usize * 2;
        let mut rgb = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..(width / 2) {
                let base = y as usize * row_bytes + x as usize * 4;
                let y0 = self.data[base] as f32;
                let u = self.data[base + 1] as f32 - 128.0;
                let y1 = self.data[base + 2] as f32;
                let v = self.data[base + 3] as f32 - 128.0;

                rgb.put_pixel(x * 2, y, yuv_to_rgb(y0, u, v));
                rgb.put_pixel(x * 2 + 1, y, yuv_to_rgb(y1, u, v));
            }

            // Odd widths leave one pixel without a chroma pair
            if width % 2 == 1 && width > 1 {
                let last = *rgb.get_pixel(width - 2, y);
                rgb.put_pixel(width - 1, y, last);
            }
        }

        Ok(rgb)
    }
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> image::Rgb<u8> {
    let r = y + 1.402 * v;
    let g = y - 0.344 * u - 0.714 * v;
    let b = y + 1.772 * u;
    image::Rgb([
        r.clamp(0.0, 255.0) as u8,
        g.clamp(0.0, 255.0) as u8,
        b.clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(id: u64, width: u32, height: u32) -> FrameData {
        FrameData::new(
            id,
            SystemTime::now(),
            vec![128u8; (width * height * 3) as usize],
            width,
            height,
            FrameFormat::Rgb24,
        )
    }

    #[test]
    fn test_frame_format_properties() {
        assert_eq!(FrameFormat::Mjpeg.bytes_per_pixel(), 0);
        assert_eq!(FrameFormat::Yuyv.bytes_per_pixel(), 2);
        assert_eq!(FrameFormat::Rgb24.bytes_per_pixel(), 3);

        assert!(FrameFormat::Mjpeg.is_compressed());
        assert!(!FrameFormat::Rgb24.is_compressed());
    }

    #[test]
    fn test_frame_size_validation() {
        assert!(rgb_frame(1, 64, 48).validate_size());

        let invalid = FrameData::new(2, SystemTime::now(), vec![0u8; 100], 640, 480, FrameFormat::Yuyv);
        assert!(!invalid.validate_size());

        let empty_jpeg = FrameData::new(3, SystemTime::now(), Vec::new(), 640, 480, FrameFormat::Mjpeg);
        assert!(!empty_jpeg.validate_size());
    }

    #[test]
    fn test_resize_keeps_identity() {
        let frame = rgb_frame(7, 64, 48).with_origin(FrameOrigin::Synthetic);
        let resized = frame.resize(32, 24).unwrap();

        assert_eq!(resized.id, 7);
        assert_eq!(resized.dimensions(), (32, 24));
        assert_eq!(resized.format, FrameFormat::Rgb24);
        assert_eq!(resized.origin, FrameOrigin::Synthetic);
        assert!(resized.validate_size());
    }

    #[test]
    fn test_resize_to_same_size_shares_buffer() {
        let frame = rgb_frame(1, 32, 24);
        let same = frame.resize(32, 24).unwrap();
        assert!(Arc::ptr_eq(&frame.data, &same.data));
    }

    #[test]
    fn test_resize_rejects_bad_buffer() {
        let broken = FrameData::new(1, SystemTime::now(), vec![0u8; 10], 64, 48, FrameFormat::Rgb24);
        assert!(broken.resize(32, 24).is_err());
        assert!(rgb_frame(1, 8, 8).resize(0, 8).is_err());
    }

    #[test]
    fn test_yuyv_decodes_to_rgb() {
        // Mid-gray luma with neutral chroma
        let frame = FrameData::new(
            1,
            SystemTime::now(),
            [128u8, 128, 128, 128].repeat(8),
            4,
            4,
            FrameFormat::Yuyv,
        );
        let rgb = frame.to_rgb_image().unwrap();
        assert_eq!(rgb.dimensions(), (4, 4));
        assert_eq!(rgb.get_pixel(3, 3).0, [128, 128, 128]);
    }

    #[test]
    fn test_yuyv_odd_width_uses_row_stride() {
        // 3x2 frame: rows are 6 bytes, first row dark, second row bright
        let mut data = vec![16u8, 128, 16, 128, 16, 128];
        data.extend_from_slice(&[235, 128, 235, 128, 235, 128]);
        let frame = FrameData::new(1, SystemTime::now(), data, 3, 2, FrameFormat::Yuyv);

        let rgb = frame.to_rgb_image().unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [16, 16, 16]);
        assert_eq!(rgb.get_pixel(2, 0).0, [16, 16, 16]);
        assert_eq!(rgb.get_pixel(0, 1).0, [235, 235, 235]);
        assert_eq!(rgb.get_pixel(2, 1).0, [235, 235, 235]);
    }

    #[test]
    fn test_mjpeg_round_trip_through_resize() {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([200, 10, 10]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let frame = FrameData::new(1, SystemTime::now(), jpeg, 16, 16, FrameFormat::Mjpeg);
        let resized = frame.resize(8, 8).unwrap();
        assert_eq!(resized.dimensions(), (8, 8));
        assert_eq!(resized.format, FrameFormat::Rgb24);
    }
}
