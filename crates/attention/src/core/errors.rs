//! Error types emitted by the smoothing and frequency operators.

use candle_core::DeviceLocation;

/// Attention-specific error category.
#[derive(Debug)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    UnsupportedDType { requested: String },
    /// Host transforms only run on CPU tensors.
    UnsupportedDevice { location: DeviceLocation },
    /// A configuration value is out of range.
    InvalidConfig { message: String },
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        AttentionError::InvalidShape {
            context: context.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        AttentionError::InvalidConfig {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::InvalidShape { context } => {
                write!(f, "invalid tensor shape: {context}")
            }
            AttentionError::UnsupportedDType { requested } => {
                write!(f, "unsupported dtype {requested}")
            }
            AttentionError::UnsupportedDevice { location } => {
                write!(f, "unsupported device {location:?}: spectral kernels run on cpu only")
            }
            AttentionError::InvalidConfig { message } => {
                write!(f, "invalid configuration: {message}")
            }
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend {
            message: err.to_string(),
        }
    }
}
