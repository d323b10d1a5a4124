use leptess::tesseract::TessApi;
use opencv::imgproc::cvt_color;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use std::ffi::CString;
use std::path::Path;
use tracing::{debug, info};

use super::{OcrCandidate, Region, TextReader};
use crate::error::{GateError, GateResult};

const PLATE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
// Treat the image as a single text line.
const PAGE_SEG_SINGLE_LINE: &str = "7";

/// Tesseract reader for cropped plates.
pub struct DnnOcrReader {
    ocr: TessApi,
}

impl DnnOcrReader {
    pub fn new(data_path: &Path, lang: &str) -> GateResult<Self> {
        let data_path = data_path.to_string_lossy();
        let mut api = TessApi::new(Some(data_path.as_ref()), lang)
            .map_err(|e| GateError::Ocr(format!("init {lang} from {data_path}: {e:?}")))?;

        set_variable(&mut api, "tessedit_char_whitelist", PLATE_ALPHABET)?;
        set_variable(&mut api, "tessedit_pageseg_mode", PAGE_SEG_SINGLE_LINE)?;

        info!("Tesseract '{lang}' loaded from {data_path}");
        Ok(Self { ocr: api })
    }
}

fn set_variable(api: &mut TessApi, name: &str, value: &str) -> GateResult<()> {
    let name_c = CString::new(name).map_err(|e| GateError::Ocr(e.to_string()))?;
    let value_c = CString::new(value).map_err(|e| GateError::Ocr(e.to_string()))?;
    api.raw
        .set_variable(&name_c, &value_c)
        .map_err(|e| GateError::Ocr(format!("{name}={value}: {e:?}")))
}

impl TextReader<Mat> for DnnOcrReader {
    fn read_text(&mut self, crop: &Mat) -> GateResult<Vec<OcrCandidate>> {
        let grey = if crop.channels() == 1 {
            crop.try_clone()
                .map_err(|e| GateError::Ocr(e.to_string()))?
        } else {
            let mut grey = Mat::default();
            cvt_color(crop, &mut grey, COLOR_BGR2GRAY, 0)
                .map_err(|e| GateError::Ocr(e.to_string()))?;
            grey
        };

        let cols = grey.cols();
        let rows = grey.rows();
        let bytes = grey
            .data_bytes()
            .map_err(|e| GateError::Ocr(e.to_string()))?;
        self.ocr
            .raw
            .set_image(bytes, cols, rows, 1, cols)
            .map_err(|e| GateError::Ocr(format!("set image: {e:?}")))?;

        let text = self
            .ocr
            .get_utf8_text()
            .map_err(|e| GateError::Ocr(e.to_string()))?;
        let confidence = self.ocr.mean_text_conf().clamp(0, 100) as f32 / 100.0;
        debug!("OCR {:?} conf={confidence:.2}", text.trim());

        let whole = Region::new(0, 0, cols, rows);
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| OcrCandidate::new(whole, line, confidence))
            .collect())
    }
}
