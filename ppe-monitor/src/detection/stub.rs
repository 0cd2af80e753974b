// 静态检测器
//
// 外部模型的替身：对每一帧返回相同的标签集合。

use super::{BoundingBox, Detection, DetectionError, Detector};
use image::RgbImage;

pub struct StaticDetector {
    labels: Vec<String>,
    boxes: Vec<BoundingBox>,
}

impl StaticDetector {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            boxes: Vec::new(),
        }
    }

    pub fn with_boxes(mut self, boxes: Vec<BoundingBox>) -> Self {
        self.boxes = boxes;
        self
    }
}

impl Detector for StaticDetector {
    fn name(&self) -> &'static str {
        "static"
    }

    fn detect(&self, _image: &RgbImage) -> Result<Detection, DetectionError> {
        Ok(Detection {
            labels: self.labels.clone(),
            boxes: self.boxes.clone(),
        })
    }
}
