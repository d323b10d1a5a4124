//! Error types for the gate controller.
//!
//! Every stage of the frame loop has its own variant so the controller can
//! decide per stage whether a failure skips a frame, a box, or nothing.

use thiserror::Error;

pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("'{0}' does not contain a plate number")]
    InvalidPlate(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("crop error: {0}")]
    Crop(String),

    #[error("detector error: {0}")]
    Detector(String),

    #[error("ocr error: {0}")]
    Ocr(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("actuator error: {0}")]
    Actuator(String),

    #[error("display error: {0}")]
    Display(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GateError {
    pub fn config(msg: impl Into<String>) -> Self {
        GateError::Config(msg.into())
    }
}
