use super::FrameSource;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

const STREAM_BUFFERS: u32 = 4;

/// V4L2 capture device
pub struct V4l2Source {
    config: CameraConfig,
    // Declared before `device` so the stream is released first
    stream: Option<Stream<'static>>,
    device: Option<v4l::Device>,
    device_path: Option<String>,
    format: FrameFormat,
    resolution: (u32, u32),
}

impl V4l2Source {
    pub fn new(config: CameraConfig) -> Self {
        let resolution = config.resolution;
        Self {
            config,
            stream: None,
            device: None,
            device_path: None,
            format: FrameFormat::Mjpeg,
            resolution,
        }
    }

    /// Numeric ids map to /dev/videoN, anything else is used as a path
    fn resolve_path(device: &str) -> String {
        match device.parse::<u32>() {
            Ok(index) => format!("/dev/video{}", index),
            Err(_) => device.to_string(),
        }
    }

    fn parse_format(format: &str) -> Result<v4l::FourCC, CameraError> {
        match format.to_uppercase().as_str() {
            "MJPG" | "MJPEG" => Ok(v4l::FourCC::new(b"MJPG")),
            "YUYV" => Ok(v4l::FourCC::new(b"YUYV")),
            "RGB24" => Ok(v4l::FourCC::new(b"RGB3")),
            _ => Err(CameraError::UnsupportedFormat {
                format: format.to_string(),
            }),
        }
    }

    fn fourcc_to_frame_format(fourcc: v4l::FourCC) -> FrameFormat {
        match fourcc.str() {
            Ok("MJPG") => FrameFormat::Mjpeg,
            Ok("YUYV") => FrameFormat::Yuyv,
            Ok("RGB3") => FrameFormat::Rgb24,
            _ => {
                warn!("Unknown FourCC format: {:?}, treating as MJPEG", fourcc);
                FrameFormat::Mjpeg
            }
        }
    }

    fn configure(&self, device: &v4l::Device) -> Result<(FrameFormat, (u32, u32)), CameraError> {
        let mut fmt = device.format().map_err(|e| CameraError::Configuration {
            details: format!("Failed to get format: {}", e),
        })?;

        fmt.width = self.config.resolution.0;
        fmt.height = self.config.resolution.1;
        fmt.fourcc = Self::parse_format(&self.config.format)?;

        let actual = device
            .set_format(&fmt)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to set format: {}", e),
            })?;

        if (actual.width, actual.height) != self.config.resolution {
            warn!(
                "Camera resolution adjusted by driver: requested {}x{}, got {}x{}",
                self.config.resolution.0, self.config.resolution.1, actual.width, actual.height
            );
        }

        let mut params = device.params().map_err(|e| CameraError::Configuration {
            details: format!("Failed to get params: {}", e),
        })?;
        params.interval = v4l::Fraction::new(1, self.config.fps);
        if let Err(e) = device.set_params(&params) {
            // Some drivers reject frame interval changes; capture still works
            warn!("Failed to set frame rate to {}fps: {}", self.config.fps, e);
        }

        Ok((
            Self::fourcc_to_frame_format(actual.fourcc),
            (actual.width, actual.height),
        ))
    }
}

impl FrameSource for V4l2Source {
    fn open_device(&mut self, device: &str) -> Result<(), CameraError> {
        self.close();

        let path = Self::resolve_path(device);
        debug!("Opening V4L2 device: {}", path);

        let handle = v4l::Device::with_path(&path).map_err(|e| {
            CameraError::DeviceOpenWithSource {
                device: path.clone(),
                details: e.to_string(),
            }
        })?;

        let (format, resolution) = self.configure(&handle)?;

        let stream = Stream::with_buffers(&handle, Type::VideoCapture, STREAM_BUFFERS).map_err(
            |e| CameraError::DeviceOpenWithSource {
                device: path.clone(),
                details: format!("Failed to create stream: {}", e),
            },
        )?;

        info!(
            "V4L2 device {} configured: {}x{} {:?}",
            path, resolution.0, resolution.1, format
        );

        self.format = format;
        self.resolution = resolution;
        self.stream = Some(stream);
        self.device = Some(handle);
        self.device_path = Some(path);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::Disconnected)?;

        let started = Instant::now();
        let (buffer, meta) = stream.next().map_err(|e| CameraError::DeviceRead {
            details: e.to_string(),
        })?;

        if buffer.is_empty() {
            return Err(CameraError::DeviceRead {
                details: "driver returned an empty buffer".to_string(),
            });
        }

        trace!(
            "V4L2 frame seq {} ({} bytes) in {:?}",
            meta.sequence,
            buffer.len(),
            started.elapsed()
        );

        Ok(FrameData::new(
            0,
            SystemTime::now(),
            buffer.to_vec(),
            self.resolution.0,
            self.resolution.1,
            self.format,
        ))
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        self.stream = None;
        self.device = None;
        if let Some(path) = self.device_path.take() {
            debug!("Released V4L2 device {}", path);
        }
    }

    fn describe(&self) -> String {
        match &self.device_path {
            Some(path) => format!("v4l2:{}", path),
            None => "v4l2 (closed)".to_string(),
        }
    }
}
