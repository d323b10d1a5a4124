use chrono::{DateTime, Utc};
use opencv::core::Vector;
use opencv::imgcodecs::imwrite;
use opencv::prelude::Mat;
use std::fs;
use std::path::PathBuf;

use super::{free_snapshot_path, SnapshotSink};
use crate::error::{GateError, GateResult};

/// Writes plate crops as JPEG files into one directory.
pub struct JpegSnapshots {
    dir: PathBuf,
}

impl JpegSnapshots {
    /// Creates the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> GateResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl SnapshotSink<Mat> for JpegSnapshots {
    fn save(
        &mut self,
        crop: &Mat,
        captured_at: DateTime<Utc>,
        plate: Option<&str>,
    ) -> GateResult<PathBuf> {
        let path = free_snapshot_path(&self.dir, captured_at, plate);
        let written = imwrite(&path.to_string_lossy(), crop, &Vector::<i32>::new())
            .map_err(|e| GateError::Snapshot(format!("{}: {e}", path.display())))?;
        if !written {
            return Err(GateError::Snapshot(format!(
                "{}: encoder refused the image",
                path.display()
            )));
        }
        Ok(path)
    }
}
