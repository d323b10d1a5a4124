//! Licence-plate gate controller.
//!
//! Frames from a camera go through an external plate detector and OCR
//! engine; the normalized plate text is checked against an allow-list, every
//! decision is written to an audit log, and allowed vehicles get the gate
//! relay pulsed open.

pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod plate_detection;
pub mod storage;
pub mod utils;

pub use config::GateConfig;
pub use controller::{FrameReport, GateContext, GateController, GatePolicy, RunSummary};
pub use error::{GateError, GateResult};
