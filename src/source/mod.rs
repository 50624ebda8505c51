//! Capture devices feeding the camera hub.
//!
//! A [`FrameSource`] is owned exclusively by the hub's capture worker. Any
//! error it reports is treated as transient by the hub.

use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::FrameData;
use tracing::{debug, info, warn};

mod simulated;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod v4l2;

pub use simulated::{SimulatedHandle, SimulatedSource};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use v4l2::V4l2Source;

/// A physical or simulated capture device
pub trait FrameSource: Send {
    /// Acquire a single device; on success a frame can be read
    fn open_device(&mut self, device: &str) -> Result<(), CameraError>;

    /// Read one frame from the open device
    fn read_frame(&mut self) -> Result<FrameData, CameraError>;

    fn is_open(&self) -> bool;

    /// Release the device handle
    fn close(&mut self);

    /// Short description used in logs
    fn describe(&self) -> String;

    /// Try each candidate in order and keep the first device that both opens
    /// and yields a test frame. Returns the id of the device that was opened.
    fn open(&mut self, candidates: &[String]) -> Result<String, CameraError> {
        if self.is_open() {
            self.close();
        }

        for device in candidates {
            info!("Trying camera device {}", device);

            if let Err(e) = self.open_device(device) {
                warn!("Camera device {} failed to open: {}", device, e);
                continue;
            }

            match self.read_frame() {
                Ok(frame) if frame.validate_size() => {
                    info!(
                        "Camera device {} opened ({}x{}, {:?})",
                        device, frame.width, frame.height, frame.format
                    );
                    return Ok(device.clone());
                }
                Ok(_) => {
                    warn!("Camera device {} opened but returned an empty frame", device);
                }
                Err(e) => {
                    warn!("Camera device {} opened but cannot read frames: {}", device, e);
                }
            }

            self.close();
        }

        debug!("No camera candidate could be opened: {:?}", candidates);
        Err(CameraError::DeviceOpen {
            candidates: candidates.to_vec(),
        })
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open_device(&mut self, device: &str) -> Result<(), CameraError> {
        (**self).open_device(device)
    }

    fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        (**self).read_frame()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self, candidates: &[String]) -> Result<String, CameraError> {
        (**self).open(candidates)
    }
}

/// Pick the capture backend available in this build
#[cfg(all(feature = "camera", target_os = "linux"))]
pub fn default_source(config: &CameraConfig) -> Box<dyn FrameSource> {
    Box::new(V4l2Source::new(config.clone()))
}

/// Pick the capture backend available in this build
#[cfg(not(all(feature = "camera", target_os = "linux")))]
pub fn default_source(config: &CameraConfig) -> Box<dyn FrameSource> {
    #[cfg(not(target_os = "linux"))]
    warn!("V4L2 capture is only available on Linux, using simulated camera");
    #[cfg(not(feature = "camera"))]
    warn!("Camera feature is disabled, using simulated camera");

    Box::new(SimulatedSource::new(config.resolution.0, config.resolution.1))
}
