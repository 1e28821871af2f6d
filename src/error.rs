//! Error taxonomy for scrolling capture.
//! Setup errors (target, viewport, config) abort before any pixel is captured.
//! Capture and driver errors that happen mid-session only end the loop; the
//! session then returns whatever it has stitched, with the error as a warning.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("viewport {width}x{height} is too small (minimum {min}x{min})")]
    ViewportTooSmall { width: u32, height: u32, min: u32 },

    #[error("frame capture failed: {0}")]
    CaptureFailure(String),

    #[error("scroll driver failed: {0}")]
    DriverFailure(String),

    #[error("capture cancelled before the first frame")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
