use crate::{labels::ClassNames, model_service::BoundingBox};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
    pub label: String,
}

impl Detection {
    pub fn labeled(bbox: &BoundingBox, class_names: &ClassNames) -> Self {
        Self {
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
            conf: bbox.confidence,
            label: class_names.label(bbox.class_id),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DetectResponse {
    pub detections: Vec<Detection>,
}

impl DetectResponse {
    pub fn from_boxes(boxes: &[BoundingBox], class_names: &ClassNames) -> Self {
        Self {
            detections: boxes
                .iter()
                .map(|bbox| Detection::labeled(bbox, class_names))
                .collect(),
        }
    }
}
