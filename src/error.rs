use crate::device::DeviceKind;
use thiserror::Error;

/// Failures raised by the device runtime and the probes built on it.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Visibility is frozen once logical devices have been handed out.
    #[error("Visible devices cannot be modified after being initialized")]
    VisibilityAfterInit,

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device {name} is a {found} device, expected {expected}")]
    KindMismatch {
        name: String,
        expected: DeviceKind,
        found: DeviceKind,
    },

    #[error("At least one CPU device must remain visible")]
    CpuRequired,

    #[error("Invalid device specification '{0}'")]
    InvalidSpec(String),

    #[error("Could not satisfy device specification '{0}': no matching visible device")]
    Unplaceable(String),

    #[error("Constant rows must all have the same length (row {row} has {found}, expected {expected})")]
    RaggedConstant {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Matrix size-incompatible: In[0]: {left:?}, In[1]: {right:?}")]
    ShapeMismatch { left: Vec<i64>, right: Vec<i64> },

    #[error(transparent)]
    Torch(#[from] tch::TchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
