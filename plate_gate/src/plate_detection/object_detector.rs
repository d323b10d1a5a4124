use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::CV_32F;
use opencv::dnn;
use opencv::dnn::blob_from_image;
use opencv::dnn::nms_boxes;
use opencv::dnn::Net;
use opencv::dnn::DNN_BACKEND_CUDA;
use opencv::dnn::DNN_BACKEND_OPENCV;
use opencv::dnn::DNN_TARGET_CPU;
use opencv::dnn::DNN_TARGET_CUDA;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::NetTrait;
use opencv::prelude::NetTraitConst;
use std::path::Path;
use tracing::{debug, info};

use super::{PlateBox, PlateDetector, Region};
use crate::config::DetectorDevice;
use crate::error::{GateError, GateResult};

const INPUT_SIZE: i32 = 640;
// 3 anchors over the 80x80, 40x40 and 20x20 grids of a 640 input.
const PREDICTIONS: i32 = 25200;
const NMS_THRESHOLD: f32 = 0.4;

/// Single-class YOLOv5 plate detector run through the OpenCV DNN module.
pub struct ObjectDetector {
    classifier: Net,
    min_confidence: f32,
}

impl ObjectDetector {
    pub fn plate_detector(
        model: &Path,
        device: DetectorDevice,
        min_confidence: f32,
    ) -> GateResult<Self> {
        let model_path = model.to_string_lossy();
        let mut classifier = dnn::read_net_from_onnx(&model_path)
            .map_err(|e| GateError::Detector(format!("{model_path}: {e}")))?;

        let (backend, target) = match device {
            DetectorDevice::Cuda => (DNN_BACKEND_CUDA, DNN_TARGET_CUDA),
            DetectorDevice::Cpu => (DNN_BACKEND_OPENCV, DNN_TARGET_CPU),
        };
        classifier
            .set_preferable_backend(backend)
            .map_err(|e| GateError::Detector(e.to_string()))?;
        classifier
            .set_preferable_target(target)
            .map_err(|e| GateError::Detector(e.to_string()))?;

        info!("Plate detector {model_path} loaded for {device:?}");
        Ok(ObjectDetector {
            classifier,
            min_confidence,
        })
    }

    fn infer(&mut self, image: &Mat) -> opencv::Result<Vec<PlateBox>> {
        let blob = blob_from_image(
            image,
            1.0 / 255.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        // Set the input of the network
        self.classifier.set_input(&blob, "", 1.0, Scalar::default())?;

        let output_names = self.classifier.get_unconnected_out_layers_names()?;
        let mut output_values = Vector::<Mat>::default();
        self.classifier.forward(&mut output_values, &output_names)?;

        self.post_process(image.rows(), image.cols(), &output_values)
    }

    fn post_process(
        &self,
        img_rows: i32,
        img_cols: i32,
        outputs: &Vector<Mat>,
    ) -> opencv::Result<Vec<PlateBox>> {
        let mut confidences = Vector::<f32>::default();
        let mut boxes = Vector::<Rect>::default();

        let x_factor = img_cols as f32 / INPUT_SIZE as f32;
        let y_factor = img_rows as f32 / INPUT_SIZE as f32;

        for data in outputs {
            for j in 0..PREDICTIONS {
                let objectness: f32 = *data.at_3d(0, j, 4)?;
                if objectness < self.min_confidence {
                    continue;
                }
                let class_score: f32 = *data.at_3d(0, j, 5)?;
                let confidence = objectness * class_score;
                if confidence < self.min_confidence {
                    continue;
                }

                let cx: f32 = *data.at_3d(0, j, 0)?;
                let cy: f32 = *data.at_3d(0, j, 1)?;
                let w: f32 = *data.at_3d(0, j, 2)?;
                let h: f32 = *data.at_3d(0, j, 3)?;
                let left = (cx - 0.5 * w) * x_factor;
                let top = (cy - 0.5 * h) * y_factor;
                let width = w * x_factor;
                let height = h * y_factor;

                confidences.push(confidence);
                boxes.push(Rect::new(
                    left as i32,
                    top as i32,
                    width as i32,
                    height as i32,
                ));
            }
        }

        let mut indices = Vector::<i32>::default();
        nms_boxes(
            &boxes,
            &confidences,
            self.min_confidence,
            NMS_THRESHOLD,
            &mut indices,
            1.0,
            0,
        )?;

        let mut output = Vec::with_capacity(indices.len());
        for i in indices {
            let rect = boxes.get(i as usize)?;
            let confidence = confidences.get(i as usize)?;
            output.push(PlateBox::new(
                Region::new(rect.x, rect.y, rect.width, rect.height),
                confidence,
            ));
        }

        Ok(output)
    }
}

impl PlateDetector<Mat> for ObjectDetector {
    fn detect(&mut self, image: &Mat) -> GateResult<Vec<PlateBox>> {
        let plates = self
            .infer(image)
            .map_err(|e| GateError::Detector(e.to_string()))?;
        debug!("Detector found {} plates", plates.len());
        Ok(plates)
    }
}
