//! Frame, box and OCR types shared by the gate loop, and the traits the
//! external collaborators (camera, detector, OCR engine, snapshot writer and
//! operator window) are consumed through.

pub mod plate_text;

#[cfg(feature = "vision")]
pub mod bounding_box_render;
#[cfg(feature = "vision")]
pub mod dnn_ocr;
#[cfg(feature = "vision")]
pub mod object_detector;
#[cfg(feature = "vision")]
pub mod snapshot;
#[cfg(feature = "vision")]
pub mod video_reader;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::GateResult;

pub use plate_text::{normalize, select_plate};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersection with a `width` x `height` frame, or `None` when nothing of
    /// the region lies inside it.
    pub fn clamp_to(&self, width: i32, height: i32) -> Option<Region> {
        let x0 = self.x.clamp(0, width);
        let y0 = self.y.clamp(0, height);
        let x1 = self.x.saturating_add(self.width).clamp(0, width);
        let y1 = self.y.saturating_add(self.height).clamp(0, height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Region::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// A candidate plate location reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateBox {
    pub region: Region,
    pub confidence: f32,
}

impl PlateBox {
    pub fn new(region: Region, confidence: f32) -> Self {
        Self { region, confidence }
    }
}

/// One text hypothesis returned by the OCR engine for a crop.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrCandidate {
    /// Where the text sits inside the crop.
    pub region: Region,
    pub text: String,
    pub confidence: f32,
}

impl OcrCandidate {
    pub fn new(region: Region, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            region,
            text: text.into(),
            confidence,
        }
    }
}

/// The normalized plate text chosen for a box.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateRead {
    pub text: String,
    pub confidence: f32,
}

/// What the gate decided for one detected box.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxOutcome {
    pub region: Region,
    pub plate: Option<PlateRead>,
    pub allowed: bool,
}

/// What the operator asked for after a frame was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayAction {
    Continue,
    Quit,
}

/// An image the controller can measure and crop.
pub trait Frame: Sized {
    /// `(width, height)` in pixels.
    fn size(&self) -> (i32, i32);

    /// Copy of the given region. The region is already clamped to the frame.
    fn crop(&self, region: &Region) -> GateResult<Self>;
}

pub trait FrameSource<F> {
    /// Next frame, or `None` when the camera had nothing to give.
    fn grab(&mut self) -> GateResult<Option<F>>;
}

pub trait PlateDetector<F> {
    fn detect(&mut self, frame: &F) -> GateResult<Vec<PlateBox>>;
}

pub trait TextReader<F> {
    fn read_text(&mut self, crop: &F) -> GateResult<Vec<OcrCandidate>>;
}

pub trait SnapshotSink<F> {
    /// Persist the crop of a processed box, returning where it went.
    fn save(
        &mut self,
        crop: &F,
        captured_at: DateTime<Utc>,
        plate: Option<&str>,
    ) -> GateResult<PathBuf>;
}

pub trait FrameDisplay<F> {
    /// Presents the frame with every detected box and the decisions taken.
    fn show(
        &mut self,
        frame: &mut F,
        boxes: &[PlateBox],
        outcomes: &[BoxOutcome],
    ) -> GateResult<DisplayAction>;
}

/// Display used when no operator window is wanted.
#[derive(Debug, Default)]
pub struct Headless;

impl<F> FrameDisplay<F> for Headless {
    fn show(
        &mut self,
        _frame: &mut F,
        _boxes: &[PlateBox],
        _outcomes: &[BoxOutcome],
    ) -> GateResult<DisplayAction> {
        Ok(DisplayAction::Continue)
    }
}

/// Label used in snapshot names when OCR produced nothing usable. Lowercase,
/// so it can never collide with a normalized plate.
pub const UNREAD_PLATE_LABEL: &str = "unread";

/// `{dir}/{unix_timestamp}_{plate}.jpg`
pub fn snapshot_path(dir: &Path, captured_at: DateTime<Utc>, plate: Option<&str>) -> PathBuf {
    let label = match plate {
        Some(text) if !text.is_empty() => text,
        _ => UNREAD_PLATE_LABEL,
    };
    dir.join(format!("{}_{}.jpg", captured_at.timestamp(), label))
}

/// Like [`snapshot_path`], but appends `_1`, `_2`, ... to the name while the
/// file already exists, so several crops in the same second are all kept.
pub fn free_snapshot_path(dir: &Path, captured_at: DateTime<Utc>, plate: Option<&str>) -> PathBuf {
    let path = snapshot_path(dir, captured_at, plate);
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.jpg")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}
