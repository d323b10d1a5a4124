use opencv::core::Rect;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::VideoCaptureTrait;
use opencv::prelude::VideoCaptureTraitConst;
use opencv::videoio::VideoCapture;
use opencv::videoio::CAP_ANY;
use tracing::{debug, info, warn};

use super::{Frame, FrameSource, Region};
use crate::config::CameraSource;
use crate::error::{GateError, GateResult};

/// Frames from a webcam, a video file or a network stream.
pub struct VideoReader {
    capture: VideoCapture,
    source: CameraSource,
}

impl VideoReader {
    pub fn open(source: &CameraSource) -> GateResult<Self> {
        let capture = match source {
            CameraSource::Device(index) => VideoCapture::new(*index, CAP_ANY),
            CameraSource::Uri(uri) => VideoCapture::from_file(uri, CAP_ANY),
        }
        .map_err(|e| GateError::Capture(format!("{source}: {e}")))?;

        let opened = capture
            .is_opened()
            .map_err(|e| GateError::Capture(e.to_string()))?;
        if !opened {
            return Err(GateError::Capture(format!("cannot open {source}")));
        }

        info!("Camera {source} opened");
        Ok(Self {
            capture,
            source: source.clone(),
        })
    }
}

impl FrameSource<Mat> for VideoReader {
    fn grab(&mut self) -> GateResult<Option<Mat>> {
        let mut image = Mat::default();
        let grabbed = self
            .capture
            .read(&mut image)
            .map_err(|e| GateError::Capture(e.to_string()))?;

        if !grabbed || image.empty() {
            return Ok(None);
        }
        Ok(Some(image))
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        debug!("Releasing camera {}", self.source);
        if let Err(e) = self.capture.release() {
            warn!("Cannot release camera {}: {e}", self.source);
        }
    }
}

impl Frame for Mat {
    fn size(&self) -> (i32, i32) {
        (self.cols(), self.rows())
    }

    fn crop(&self, region: &Region) -> GateResult<Self> {
        let rect = Rect::new(region.x, region.y, region.width, region.height);
        let view = self
            .apply_1(rect)
            .map_err(|e| GateError::Crop(format!("{region:?}: {e}")))?;
        // Make it contiguous
        view.try_clone()
            .map_err(|e| GateError::Crop(format!("{region:?}: {e}")))
    }
}
