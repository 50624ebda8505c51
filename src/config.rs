use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Lowest processing rate accepted as a target
pub const MIN_TARGET_FPS: f64 = 0.1;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LampcamConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub consumers: ConsumerConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Primary camera device (e.g. "0" for /dev/video0, or a device path)
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Devices tried, in order, when the primary device cannot be opened
    #[serde(default = "default_fallback_devices")]
    pub fallback_devices: Vec<String>,

    /// Capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Target capture frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Video format (MJPG, YUYV, RGB24)
    #[serde(default = "default_camera_format")]
    pub format: String,

    /// TrueType font used to stamp text on synthetic and stand-in frames
    #[serde(default)]
    pub overlay_font_path: Option<String>,

    /// Timezone for stamped timestamps
    #[serde(default = "default_overlay_timezone")]
    pub overlay_timezone: String,

    /// How often the capture worker logs a status summary
    #[serde(default = "default_status_log_interval")]
    pub status_log_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReconnectConfig {
    /// Minimum spacing between two reopen attempts
    #[serde(default = "default_reconnect_interval")]
    pub interval_ms: u64,

    /// Upper bound for the growing spacing between reopen attempts
    #[serde(default = "default_reconnect_max_interval")]
    pub max_interval_ms: u64,

    /// Failed reopen attempts before the hub settles in synthetic mode
    #[serde(default = "default_max_open_retries")]
    pub max_open_retries: u32,

    /// Consecutive read failures tolerated before forcing a reconnect
    #[serde(default = "default_read_failure_threshold")]
    pub read_failure_threshold: u32,

    /// Bounded wait for the capture worker on stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConsumerConfig {
    /// Queue capacity used when a consumer does not ask for one
    #[serde(default = "default_consumer_capacity")]
    pub default_capacity: usize,

    /// Callbacks running longer than this are reported
    #[serde(default = "default_callback_budget")]
    pub callback_budget_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PerformanceConfig {
    /// Processing resolutions, highest first
    #[serde(default = "default_resolution_levels")]
    pub resolution_levels: Vec<(u32, u32)>,

    /// Level the controller starts at
    #[serde(default = "default_initial_level")]
    pub initial_level: usize,

    /// Processing rate the pipeline aims for
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,

    /// Below this processing rate the resolution is lowered
    #[serde(default = "default_fps_low_threshold")]
    pub fps_low_threshold: f64,

    /// Above this processing rate the resolution is raised
    #[serde(default = "default_fps_high_threshold")]
    pub fps_high_threshold: f64,

    /// Minimum time between two resolution changes
    #[serde(default = "default_adjust_interval")]
    pub adjust_interval_secs: u64,

    /// Frames that may be skipped in a row under overload
    #[serde(default = "default_max_consecutive_skips")]
    pub max_consecutive_skips: u32,

    /// Number of processing-time samples kept for the moving average
    #[serde(default = "default_processing_window")]
    pub processing_window: usize,

    /// Number of timestamps kept by each FPS counter
    #[serde(default = "default_fps_window")]
    pub fps_window: usize,

    #[serde(default = "default_true")]
    pub adaptive_resolution: bool,

    #[serde(default = "default_true")]
    pub skip_frames_when_slow: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Consumer id registered with the hub
    #[serde(default = "default_pipeline_consumer_id")]
    pub consumer_id: String,

    /// Capacity of the pipeline's frame queue
    #[serde(default = "default_consumer_capacity")]
    pub queue_capacity: usize,

    /// Bounded wait on the frame queue
    #[serde(default = "default_pop_timeout")]
    pub pop_timeout_ms: u64,

    /// How often stage FPS is recomputed and fed to the controller
    #[serde(default = "default_fps_update_interval")]
    pub fps_update_interval_ms: u64,

    /// Bounded wait for the pipeline worker on stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    /// Per-pixel difference counted as change by the presence stage
    #[serde(default = "default_presence_delta")]
    pub presence_delta: u8,

    /// Fraction of changed pixels that reports a present user
    #[serde(default = "default_presence_threshold")]
    pub presence_threshold: f64,
}

impl CameraConfig {
    /// Primary device followed by the fallbacks, without duplicates
    pub fn candidate_devices(&self) -> Vec<String> {
        let mut candidates = vec![self.device.clone()];
        for device in &self.fallback_devices {
            if !candidates.contains(device) {
                candidates.push(device.clone());
            }
        }
        candidates
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_secs(self.status_log_interval_secs)
    }
}

impl ReconnectConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl ConsumerConfig {
    pub fn callback_budget(&self) -> Duration {
        Duration::from_millis(self.callback_budget_ms)
    }
}

impl PerformanceConfig {
    pub fn adjust_interval(&self) -> Duration {
        Duration::from_secs(self.adjust_interval_secs)
    }
}

impl PipelineConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn fps_update_interval(&self) -> Duration {
        Duration::from_millis(self.fps_update_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl LampcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("lampcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&LampcamConfig::default())?)
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. LAMPCAM_CAMERA__FPS=15
            .add_source(
                Environment::with_prefix("LAMPCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: LampcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.max_interval_ms < self.reconnect.interval_ms {
            return Err(ConfigError::Message(
                "Reconnect max_interval_ms must not be below interval_ms".to_string(),
            ));
        }

        if self.consumers.default_capacity == 0 || self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Consumer queue capacity must be greater than 0".to_string(),
            ));
        }

        let perf = &self.performance;
        if perf.resolution_levels.is_empty() {
            return Err(ConfigError::Message(
                "At least one resolution level is required".to_string(),
            ));
        }

        if perf.resolution_levels.iter().any(|&(w, h)| w == 0 || h == 0) {
            return Err(ConfigError::Message(
                "Resolution levels must be greater than 0".to_string(),
            ));
        }

        if perf.initial_level >= perf.resolution_levels.len() {
            return Err(ConfigError::Message(format!(
                "initial_level {} is out of range for {} resolution levels",
                perf.initial_level,
                perf.resolution_levels.len()
            )));
        }

        if !perf.target_fps.is_finite() || perf.target_fps < MIN_TARGET_FPS {
            return Err(ConfigError::Message(format!(
                "Target fps must be a finite value of at least {}",
                MIN_TARGET_FPS
            )));
        }

        if perf.fps_low_threshold >= perf.fps_high_threshold {
            return Err(ConfigError::Message(
                "fps_low_threshold must be below fps_high_threshold".to_string(),
            ));
        }

        if perf.processing_window == 0 || perf.fps_window < 2 {
            return Err(ConfigError::Message(
                "processing_window must be > 0 and fps_window must be >= 2".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.pipeline.presence_threshold) {
            return Err(ConfigError::Message(
                "presence_threshold must be between 0 and 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_camera_device(),
            fallback_devices: default_fallback_devices(),
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
            format: default_camera_format(),
            overlay_font_path: None,
            overlay_timezone: default_overlay_timezone(),
            status_log_interval_secs: default_status_log_interval(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconnect_interval(),
            max_interval_ms: default_reconnect_max_interval(),
            max_open_retries: default_max_open_retries(),
            read_failure_threshold: default_read_failure_threshold(),
            stop_timeout_ms: default_stop_timeout(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_consumer_capacity(),
            callback_budget_ms: default_callback_budget(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            resolution_levels: default_resolution_levels(),
            initial_level: default_initial_level(),
            target_fps: default_target_fps(),
            fps_low_threshold: default_fps_low_threshold(),
            fps_high_threshold: default_fps_high_threshold(),
            adjust_interval_secs: default_adjust_interval(),
            max_consecutive_skips: default_max_consecutive_skips(),
            processing_window: default_processing_window(),
            fps_window: default_fps_window(),
            adaptive_resolution: true,
            skip_frames_when_slow: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            consumer_id: default_pipeline_consumer_id(),
            queue_capacity: default_consumer_capacity(),
            pop_timeout_ms: default_pop_timeout(),
            fps_update_interval_ms: default_fps_update_interval(),
            stop_timeout_ms: default_stop_timeout(),
            presence_delta: default_presence_delta(),
            presence_threshold: default_presence_threshold(),
        }
    }
}

// Default value functions
fn default_camera_device() -> String {
    "0".to_string()
}
fn default_fallback_devices() -> Vec<String> {
    ["0", "1", "2", "3", "/dev/video0", "/dev/video1", "/dev/video2", "/dev/video3"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_camera_format() -> String {
    "MJPG".to_string()
}
fn default_overlay_timezone() -> String {
    "UTC".to_string()
}
fn default_status_log_interval() -> u64 {
    60
}

fn default_reconnect_interval() -> u64 {
    3000
}
fn default_reconnect_max_interval() -> u64 {
    30_000
}
fn default_max_open_retries() -> u32 {
    5
}
fn default_read_failure_threshold() -> u32 {
    10
}
fn default_stop_timeout() -> u64 {
    3000
}

fn default_consumer_capacity() -> usize {
    5
}
fn default_callback_budget() -> u64 {
    10
}

fn default_resolution_levels() -> Vec<(u32, u32)> {
    vec![(640, 480), (480, 360), (320, 240)]
}
fn default_initial_level() -> usize {
    1
} // Start at the middle level
fn default_target_fps() -> f64 {
    25.0
}
fn default_fps_low_threshold() -> f64 {
    15.0
}
fn default_fps_high_threshold() -> f64 {
    28.0
}
fn default_adjust_interval() -> u64 {
    5
}
fn default_max_consecutive_skips() -> u32 {
    3
}
fn default_processing_window() -> usize {
    100
}
fn default_fps_window() -> usize {
    10
}
fn default_true() -> bool {
    true
}

fn default_pipeline_consumer_id() -> String {
    "pipeline".to_string()
}
fn default_pop_timeout() -> u64 {
    100
}
fn default_fps_update_interval() -> u64 {
    500
}
fn default_presence_delta() -> u8 {
    25
}
fn default_presence_threshold() -> f64 {
    0.02
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LampcamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.performance.resolution_levels.len(), 3);
        assert_eq!(config.performance.initial_level, 1);
        assert_eq!(config.camera.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_candidate_devices_skip_duplicates() {
        let config = CameraConfig {
            device: "1".to_string(),
            fallback_devices: vec!["0".to_string(), "1".to_string(), "/dev/video2".to_string()],
            ..CameraConfig::default()
        };

        assert_eq!(config.candidate_devices(), vec!["1", "0", "/dev/video2"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
device = "/dev/video2"
fps = 15

[performance]
resolution_levels = [[640, 480], [320, 240]]
initial_level = 0
fps_low_threshold = 10.0
"#
        )
        .unwrap();

        let config = LampcamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.device, "/dev/video2");
        assert_eq!(config.camera.fps, 15);
        assert_eq!(config.camera.resolution, (640, 480));
        assert_eq!(
            config.performance.resolution_levels,
            vec![(640, 480), (320, 240)]
        );
        assert_eq!(config.performance.initial_level, 0);
        assert_eq!(config.performance.fps_low_threshold, 10.0);
        assert_eq!(config.performance.fps_high_threshold, 28.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = LampcamConfig::load_from_file("/nonexistent/lampcam_test_config").unwrap();
        assert_eq!(config.pipeline.consumer_id, "pipeline");
        assert_eq!(config.reconnect.max_open_retries, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LampcamConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());
        config.camera.resolution = (640, 480);

        config.performance.initial_level = 3;
        assert!(config.validate().is_err());
        config.performance.initial_level = 2;
        assert!(config.validate().is_ok());

        config.performance.fps_low_threshold = 30.0;
        assert!(config.validate().is_err());
        config.performance.fps_low_threshold = 15.0;

        config.performance.resolution_levels.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_fps_must_be_sane() {
        let mut config = LampcamConfig::default();

        config.performance.target_fps = 1e-30;
        assert!(config.validate().is_err());

        config.performance.target_fps = f64::NAN;
        assert!(config.validate().is_err());

        config.performance.target_fps = f64::INFINITY;
        assert!(config.validate().is_err());

        config.performance.target_fps = MIN_TARGET_FPS;
        assert!(config.validate().is_ok());
    }
}
