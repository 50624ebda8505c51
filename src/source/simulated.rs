use super::FrameSource;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

#[derive(Debug, Default)]
struct SimState {
    /// Devices that can be opened; `None` means any device opens
    available: Option<HashSet<String>>,
    /// Remaining open attempts that fail regardless of device
    failing_opens: u32,
    /// Remaining reads that fail
    failing_reads: u32,
    open_attempts: u64,
    reads: u64,
    read_failures: u64,
    closes: u64,
}

/// Scriptable stand-in for a capture device
///
/// Produces flat RGB24 frames whose shade advances with every read. Failures
/// are injected through a [`SimulatedHandle`], which stays usable after the
/// source has been moved into the hub.
pub struct SimulatedSource {
    width: u32,
    height: u32,
    device: Option<String>,
    state: Arc<Mutex<SimState>>,
}

/// Control and observation handle for a [`SimulatedSource`]
#[derive(Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device: None,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Only the listed devices can be opened
    pub fn with_devices(self, devices: &[&str]) -> Self {
        self.state.lock().available = Some(devices.iter().map(|d| d.to_string()).collect());
        self
    }

    /// No device can ever be opened
    pub fn unplugged(self) -> Self {
        self.state.lock().available = Some(HashSet::new());
        self
    }

    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl SimulatedHandle {
    /// Make the next `count` reads fail
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().failing_reads = count;
    }

    /// Make the next `count` open attempts fail
    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().failing_opens = count;
    }

    /// Plug or unplug every device
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = if available { None } else { Some(HashSet::new()) };
    }

    pub fn open_attempts(&self) -> u64 {
        self.state.lock().open_attempts
    }

    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    pub fn read_failures(&self) -> u64 {
        self.state.lock().read_failures
    }

    pub fn closes(&self) -> u64 {
        self.state.lock().closes
    }
}

impl FrameSource for SimulatedSource {
    fn open_device(&mut self, device: &str) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        state.open_attempts += 1;

        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(CameraError::DeviceOpenWithSource {
                device: device.to_string(),
                details: "simulated open failure".to_string(),
            });
        }

        if let Some(available) = &state.available {
            if !available.contains(device) {
                return Err(CameraError::DeviceOpenWithSource {
                    device: device.to_string(),
                    details: "no such simulated device".to_string(),
                });
            }
        }

        drop(state);
        self.device = Some(device.to_string());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<FrameData, CameraError> {
        if self.device.is_none() {
            return Err(CameraError::Disconnected);
        }

        let mut state = self.state.lock();
        state.reads += 1;

        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            state.read_failures += 1;
            return Err(CameraError::DeviceRead {
                details: "simulated read failure".to_string(),
            });
        }

        let shade = (state.reads % 256) as u8;
        drop(state);

        trace!("Simulated read ({}x{}, shade {})", self.width, self.height, shade);
        let data = [shade, 128, 255 - shade].repeat((self.width * self.height) as usize);
        Ok(FrameData::new(
            0,
            SystemTime::now(),
            data,
            self.width,
            self.height,
            FrameFormat::Rgb24,
        ))
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            self.state.lock().closes += 1;
        }
    }

    fn describe(&self) -> String {
        match &self.device {
            Some(device) => format!("simulated:{}", device),
            None => "simulated (closed)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_open_falls_back_to_next_candidate() {
        let mut source = SimulatedSource::new(8, 8).with_devices(&["/dev/video2"]);
        let handle = source.handle();

        let opened = source.open(&candidates(&["0", "1", "/dev/video2"])).unwrap();
        assert_eq!(opened, "/dev/video2");
        assert!(source.is_open());
        assert_eq!(handle.open_attempts(), 3);
        // The test read counts as a read
        assert_eq!(handle.reads(), 1);
    }

    #[test]
    fn test_open_exhausts_candidates() {
        let mut source = SimulatedSource::new(8, 8).unplugged();
        let err = source.open(&candidates(&["0", "1"])).unwrap_err();

        assert_eq!(
            err,
            CameraError::DeviceOpen {
                candidates: candidates(&["0", "1"])
            }
        );
        assert!(!source.is_open());
    }

    #[test]
    fn test_candidate_failing_test_read_is_released() {
        let mut source = SimulatedSource::new(8, 8);
        let handle = source.handle();
        handle.fail_next_reads(1);

        let opened = source.open(&candidates(&["0", "1"])).unwrap();
        assert_eq!(opened, "1");
        assert_eq!(handle.closes(), 1);
    }

    #[test]
    fn test_read_requires_open_device() {
        let mut source = SimulatedSource::new(8, 8);
        assert_eq!(source.read_frame().unwrap_err(), CameraError::Disconnected);
    }

    #[test]
    fn test_injected_read_failures() {
        let mut source = SimulatedSource::new(4, 4);
        let handle = source.handle();
        source.open_device("0").unwrap();
        handle.fail_next_reads(2);

        assert!(source.read_frame().is_err());
        assert!(source.read_frame().is_err());
        let frame = source.read_frame().unwrap();
        assert!(frame.validate_size());
        assert_eq!(handle.read_failures(), 2);
    }
}
