use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::highgui;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_PLAIN;
use opencv::imgproc::LINE_8;
use opencv::imgproc::{rectangle, LineTypes};
use opencv::prelude::Mat;
use tracing::{debug, warn};

use super::{BoxOutcome, DisplayAction, FrameDisplay, PlateBox, Region};
use crate::error::{GateError, GateResult};

const WINDOW: &str = "alpr";
const HEADER_PX: i32 = 20;

/// Operator window: every detected box in green, a label with the plate text
/// on boxes that were read (green header when allowed, red when denied).
pub struct BoundingBoxRender {
    quit_key: char,
}

impl BoundingBoxRender {
    pub fn open() -> GateResult<Self> {
        highgui::named_window(WINDOW, highgui::WINDOW_AUTOSIZE)
            .map_err(|e| GateError::Display(e.to_string()))?;
        Ok(Self { quit_key: 'q' })
    }

    fn draw(
        &self,
        image: &mut Mat,
        boxes: &[PlateBox],
        outcomes: &[BoxOutcome],
    ) -> opencv::Result<()> {
        let color = Scalar::from((0.0, 255.0, 0.0));
        let color_red = Scalar::from((0.0, 0.0, 255.0));
        let white = Scalar::from((255.0, 255.0, 255.0));
        let thickness_px = 2;

        for plate_box in boxes {
            rectangle(
                image,
                rect(&plate_box.region),
                color,
                thickness_px,
                LineTypes::LINE_4 as i32,
                0,
            )?;
        }

        for outcome in outcomes {
            let Some(plate) = outcome.plate.as_ref() else {
                continue;
            };
            let region = &outcome.region;
            let header = Rect::new(
                region.x,
                (region.y - HEADER_PX).max(0),
                region.width,
                HEADER_PX,
            );
            rectangle(
                image,
                header,
                if outcome.allowed { color } else { color_red },
                -1,
                LineTypes::LINE_4 as i32,
                0,
            )?;
            put_text(
                image,
                &plate.text,
                Point::new(header.x, header.y + HEADER_PX - 3),
                FONT_HERSHEY_PLAIN,
                1.5,
                white,
                2,
                LINE_8,
                false,
            )?;
        }

        Ok(())
    }
}

fn rect(region: &Region) -> Rect {
    Rect::new(region.x, region.y, region.width, region.height)
}

impl FrameDisplay<Mat> for BoundingBoxRender {
    fn show(
        &mut self,
        image: &mut Mat,
        boxes: &[PlateBox],
        outcomes: &[BoxOutcome],
    ) -> GateResult<DisplayAction> {
        self.draw(image, boxes, outcomes)
            .map_err(|e| GateError::Display(e.to_string()))?;
        highgui::imshow(WINDOW, &*image).map_err(|e| GateError::Display(e.to_string()))?;

        let key = highgui::wait_key(1).map_err(|e| GateError::Display(e.to_string()))?;
        if key >= 0 && (key & 0xFF) as u8 as char == self.quit_key {
            return Ok(DisplayAction::Quit);
        }
        Ok(DisplayAction::Continue)
    }
}

impl Drop for BoundingBoxRender {
    fn drop(&mut self) {
        debug!("Closing operator window");
        if let Err(e) = highgui::destroy_all_windows() {
            warn!("Cannot close operator window: {e}");
        }
    }
}
