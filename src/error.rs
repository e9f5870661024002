use thiserror::Error;

/// Failures surfaced by the cloak pipeline.
///
/// Only `DeviceUnavailable`, `InvalidRange` and `Busy` ever reach a control
/// caller; everything else is contained inside the processing loop.
#[derive(Debug, Error)]
pub enum CloakError {
    #[error("camera {device} is unavailable: {reason}")]
    DeviceUnavailable { device: u32, reason: String },

    #[error("failed to read a frame from the camera: {0}")]
    CaptureFailure(String),

    #[error("failed to encode frame: {0}")]
    EncodeFailure(String),

    #[error("failed to decode frame: {0}")]
    DecodeFailure(String),

    #[error("invalid color range: {0}")]
    InvalidRange(String),

    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("output sink failed: {0}")]
    OutputFailure(String),

    #[error("previous session is still shutting down")]
    Busy,

    #[error("processing loop aborted: {0}")]
    Unrecoverable(String),
}

impl CloakError {
    pub fn device_unavailable(device: u32, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = CloakError> = std::result::Result<T, E>;
