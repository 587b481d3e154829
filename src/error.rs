use std::time::Duration;

/// Main error type for the library.
#[derive(Debug)]
pub enum OverlayError {
    /// A frame buffer does not agree with its declared width and height.
    ShapeMismatch(String),
    /// Calibration data has a malformed matrix or vector.
    InvalidCameraModel(String),
    /// A device acquisition did not complete before its deadline.
    DeviceTimeout {
        operation: String,
        timeout: Duration,
    },
    /// Device discovery or configuration failed.
    Device(String),
    /// Used when the user pass a logical invalid parameter to a function.
    InvalidParameter(String),
    Parser(String),
    Io(std::io::Error),
    Image(image::ImageError),
}

impl std::fmt::Display for OverlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OverlayError::ShapeMismatch(err) => write!(f, "Shape mismatch: {err}"),
            OverlayError::InvalidCameraModel(err) => write!(f, "Invalid camera model: {err}"),
            OverlayError::DeviceTimeout { operation, timeout } => {
                write!(f, "Device timeout: {operation} exceeded {timeout:?}")
            }
            OverlayError::Device(err) => write!(f, "Device error: {err}"),
            OverlayError::InvalidParameter(err) => write!(f, "Parameter error: {err}"),
            OverlayError::Parser(err) => write!(f, "Parser error: {err}"),
            OverlayError::Io(err) => write!(f, "IO error: {err}"),
            OverlayError::Image(err) => write!(f, "Image error: {err}"),
        }
    }
}

impl OverlayError {
    /// Create a error with the kind `ShapeMismatch`.
    pub fn shape_mismatch<T: ToString>(msg: T) -> Self {
        OverlayError::ShapeMismatch(msg.to_string())
    }

    /// Create a error with the kind `InvalidCameraModel`.
    pub fn invalid_camera_model<T: ToString>(msg: T) -> Self {
        OverlayError::InvalidCameraModel(msg.to_string())
    }

    /// Create a error with the kind `InvalidParameter`.
    /// # Arguments
    /// * `msg` - The error message.
    pub fn invalid_parameter<T: ToString>(msg: T) -> Self {
        OverlayError::InvalidParameter(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        OverlayError::Device(msg.to_string())
    }

    pub fn timeout<T: ToString>(operation: T, timeout: Duration) -> Self {
        OverlayError::DeviceTimeout {
            operation: operation.to_string(),
            timeout,
        }
    }
}

impl std::error::Error for OverlayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OverlayError::Io(err) => Some(err),
            OverlayError::Image(err) => Some(err),
            OverlayError::ShapeMismatch(_)
            | OverlayError::InvalidCameraModel(_)
            | OverlayError::DeviceTimeout { .. }
            | OverlayError::Device(_)
            | OverlayError::InvalidParameter(_)
            | OverlayError::Parser(_) => None,
        }
    }
}

impl From<std::io::Error> for OverlayError {
    fn from(err: std::io::Error) -> Self {
        OverlayError::Io(err)
    }
}

impl From<image::ImageError> for OverlayError {
    fn from(err: image::ImageError) -> Self {
        OverlayError::Image(err)
    }
}

impl From<serde_json::Error> for OverlayError {
    fn from(err: serde_json::Error) -> Self {
        OverlayError::Parser(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OverlayError>;
