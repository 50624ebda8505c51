use thiserror::Error;

#[derive(Error, Debug)]
pub enum LampcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Consumer '{consumer}' callback failed: {message}")]
    ConsumerCallback { consumer: String, message: String },

    #[error("Analysis stage '{stage}' failed: {message}")]
    AnalysisStage { stage: String, message: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Errors raised by a frame source or by the hub while driving it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Failed to open any camera device (tried: {})", candidates.join(", "))]
    DeviceOpen { candidates: Vec<String> },

    #[error("Failed to open camera device {device}: {details}")]
    DeviceOpenWithSource { device: String, details: String },

    #[error("Failed to read frame: {details}")]
    DeviceRead { details: String },

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },

    #[error("Unsupported video format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Camera device is not open")]
    Disconnected,

    #[error("Camera support is not available on this platform")]
    NotAvailable,
}

impl LampcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn analysis(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AnalysisStage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Whether the owning loop can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Serialization(_) => false,
            Self::Camera(CameraError::NotAvailable) => false,
            Self::Camera(CameraError::UnsupportedFormat { .. }) => false,
            Self::Camera(_) => true,
            Self::ConsumerCallback { .. } | Self::AnalysisStage { .. } => true,
            Self::Io(_) | Self::System { .. } | Self::Component { .. } => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, LampcamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_open_lists_candidates() {
        let err = CameraError::DeviceOpen {
            candidates: vec!["0".to_string(), "/dev/video1".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Failed to open any camera device (tried: 0, /dev/video1)"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(LampcamError::from(CameraError::Disconnected).is_recoverable());
        assert!(LampcamError::analysis("posture", "no landmarks").is_recoverable());
        assert!(!LampcamError::from(CameraError::NotAvailable).is_recoverable());
        assert!(!LampcamError::from(CameraError::UnsupportedFormat {
            format: "H264".to_string()
        })
        .is_recoverable());
        assert!(LampcamError::from(CameraError::DeviceRead {
            details: "timeout".to_string()
        })
        .is_recoverable());
        assert!(!LampcamError::from(config::ConfigError::Message("bad".into())).is_recoverable());
    }
}
