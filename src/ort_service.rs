use crate::{
    config::ModelConfig,
    labels::{load_labels_file, parse_names_metadata, ClassNames},
    model_service::{BoundingBox, InferenceError, ModelLoadError, ModelLoader, ModelService},
};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix3, Ix4};
use ort::{
    execution_providers::TensorRTExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

const IOU_THRESHOLD: f32 = 0.7;
const MAX_DETECTIONS: usize = 300;
const NAMES_METADATA_KEY: &str = "names";

fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn iou(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let resized = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Turns a `[1, 4 + classes, anchors]` YOLO output into boxes scaled back to
/// the original image, keeping the best class of each anchor when its score
/// reaches `min_probability`.
fn extract_boxes(
    output: ArrayViewD<f32>,
    img_width: u32,
    img_height: u32,
    input_size: u32,
    min_probability: f32,
) -> Result<Vec<BoundingBox>, InferenceError> {
    let unexpected = |shape: &[usize]| {
        InferenceError::Output(format!(
            "expected [1, 4 + classes, anchors], got {:?}",
            shape
        ))
    };
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|_| unexpected(&shape))?;
    if output.shape()[0] == 0 || output.shape()[1] <= 4 {
        return Err(unexpected(output.shape()));
    }

    let x_scale = img_width as f32 / input_size as f32;
    let y_scale = img_height as f32 / input_size as f32;
    let predictions = output.index_axis(Axis(0), 0);

    let mut boxes = Vec::new();
    for candidate in predictions.axis_iter(Axis(1)) {
        let best = candidate
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .filter(|(_, prob)| !prob.is_nan())
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum });
        let Some((class_id, prob)) = best else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let xc = candidate[0] * x_scale;
        let yc = candidate[1] * y_scale;
        let w = candidate[2] * x_scale;
        let h = candidate[3] * y_scale;

        boxes.push(BoundingBox {
            class_id,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    Ok(boxes)
}

/// Per-class suppression: a box is dropped when a higher scoring box of the
/// same class overlaps it by more than `iou_threshold`.
fn non_max_suppression(
    mut boxes: Vec<BoundingBox>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<BoundingBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if result.len() >= max_detections {
            break;
        }
        let suppressed = result.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(kept, &candidate) > iou_threshold
        });
        if !suppressed {
            result.push(candidate);
        }
    }

    result
}

fn build_session(model_path: &Path) -> Result<Session, ort::Error> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers([TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build()])?
        .commit_from_file(model_path)?;
    Ok(session)
}

fn read_names_metadata(session: &Session) -> Result<Option<String>, ort::Error> {
    session.metadata()?.custom(NAMES_METADATA_KEY)
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input_size: u32,
    class_names: Arc<ClassNames>,
}

impl OrtModelService {
    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| InferenceError::Run(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Tensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(e.to_string()))?;

        let ix = shape.to_ixdyn();
        ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| InferenceError::Output(format!("invalid tensor shape: {}", e)))
    }

    fn detect_blocking(
        &self,
        image: &RgbImage,
        min_probability: f32,
    ) -> Result<Vec<BoundingBox>, InferenceError> {
        let input = transform_image(image, self.input_size);
        let output = self.run_inference(&input)?;
        let boxes = extract_boxes(
            output.view(),
            image.width(),
            image.height(),
            self.input_size,
            min_probability,
        )?;

        Ok(non_max_suppression(boxes, IOU_THRESHOLD, MAX_DETECTIONS))
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(
        &self,
        image: RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<BoundingBox>, InferenceError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect_blocking(&image, confidence_threshold))
            .await
            .map_err(|e| InferenceError::Task(e.to_string()))?
    }

    fn class_names(&self) -> &ClassNames {
        &self.class_names
    }
}

pub struct OrtModelLoader {
    num_instances: usize,
    input_size: u32,
    labels_file: Option<PathBuf>,
}

impl OrtModelLoader {
    pub fn new(model_config: &ModelConfig) -> Self {
        Self {
            num_instances: model_config.num_instances.max(1),
            input_size: model_config.input_size,
            labels_file: model_config.labels_file.clone(),
        }
    }

    fn class_names(&self, session: &Session) -> Result<ClassNames, ModelLoadError> {
        if let Some(labels_file) = &self.labels_file {
            return load_labels_file(labels_file).map_err(|e| {
                ModelLoadError::Labels(format!("{}: {}", labels_file.display(), e))
            });
        }

        match read_names_metadata(session) {
            Ok(Some(raw)) => match parse_names_metadata(&raw) {
                Ok(names) => Ok(names),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable class names metadata: {}", e);
                    Ok(ClassNames::default())
                }
            },
            Ok(None) => {
                tracing::warn!("Model carries no class names, labels fall back to class indices");
                Ok(ClassNames::default())
            }
            Err(e) => {
                tracing::warn!("Failed to read model metadata: {}", e);
                Ok(ClassNames::default())
            }
        }
    }
}

impl ModelLoader for OrtModelLoader {
    type Model = OrtModelService;

    fn probe(&self) -> Result<(), String> {
        Session::builder().map(|_| ()).map_err(|e| e.to_string())
    }

    fn load(&self, path: &Path) -> Result<OrtModelService, ModelLoadError> {
        let sessions = (0..self.num_instances)
            .map(|_| build_session(path))
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelLoadError::Session(e.to_string()))?;

        let class_names = match sessions.first() {
            Some(session) => self.class_names(session)?,
            None => return Err(ModelLoadError::Session("no session created".into())),
        };

        tracing::info!(
            "Created {} ONNX sessions with {} class names",
            sessions.len(),
            class_names.len()
        );

        Ok(OrtModelService {
            sessions: Arc::new(
                sessions
                    .into_iter()
                    .map(|session| Arc::new(Mutex::new(session)))
                    .collect(),
            ),
            counter: Arc::new(AtomicUsize::new(0)),
            input_size: self.input_size,
            class_names: Arc::new(class_names),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array3;

    fn bbox(class_id: usize, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox {
            class_id,
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn test_transform_image() {
        let img = RgbImage::from_pixel(100, 50, Rgb([255, 0, 0]));

        let input = transform_image(&img, 640);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert!((input[[0, 0, 320, 320]] - 1.0).abs() < 1e-6);
        assert!(input[[0, 1, 320, 320]].abs() < 1e-6);
        assert!(input[[0, 2, 320, 320]].abs() < 1e-6);
    }

    #[test]
    fn test_iou_ignores_disjoint_boxes() {
        let a = bbox(0, 0.9, 0., 0., 10., 10.);
        let b = bbox(0, 0.9, 20., 20., 30., 30.);
        let c = bbox(0, 0.9, 5., 0., 15., 10.);

        assert_eq!(iou(&a, &b), 0.);
        assert!((iou(&a, &a) - 1.).abs() < 1e-6);
        assert!((iou(&a, &c) - 50. / 150.).abs() < 1e-6);
    }

    #[test]
    fn test_extract_boxes_scales_and_filters() {
        // 2 classes, 3 anchors, 64x64 model input
        let mut output = Array3::<f32>::zeros((1, 6, 3));
        // anchor 0: class 1 at 0.9, centred box
        output[[0, 0, 0]] = 32.;
        output[[0, 1, 0]] = 32.;
        output[[0, 2, 0]] = 16.;
        output[[0, 3, 0]] = 8.;
        output[[0, 5, 0]] = 0.9;
        // anchor 1: below threshold
        output[[0, 4, 1]] = 0.1;
        // anchor 2: class 0 at exactly the threshold
        output[[0, 0, 2]] = 16.;
        output[[0, 1, 2]] = 16.;
        output[[0, 2, 2]] = 4.;
        output[[0, 3, 2]] = 4.;
        output[[0, 4, 2]] = 0.25;

        let boxes = extract_boxes(output.view().into_dyn(), 128, 32, 64, 0.25).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 1);
        assert!((boxes[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(
            (boxes[0].x1, boxes[0].y1, boxes[0].x2, boxes[0].y2),
            (48., 14., 80., 18.)
        );
        assert_eq!(boxes[1].class_id, 0);
    }

    #[test]
    fn test_extract_boxes_skips_nan_scores() {
        let mut output = Array3::<f32>::zeros((1, 6, 2));
        // anchor 0: NaN for class 0, class 1 still counts
        output[[0, 2, 0]] = 4.;
        output[[0, 3, 0]] = 4.;
        output[[0, 4, 0]] = f32::NAN;
        output[[0, 5, 0]] = 0.6;
        // anchor 1: no usable score
        output[[0, 4, 1]] = f32::NAN;
        output[[0, 5, 1]] = f32::NAN;

        let boxes = extract_boxes(output.view().into_dyn(), 64, 64, 64, 0.25).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 1);
        assert!((boxes[0].confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_extract_boxes_rejects_unexpected_shape() {
        let output = ndarray::Array2::<f32>::zeros((4, 10));

        let result = extract_boxes(output.view().into_dyn(), 10, 10, 640, 0.25);

        assert!(matches!(result, Err(InferenceError::Output(_))));
    }

    #[test]
    fn test_non_max_suppression_is_per_class() {
        let boxes = vec![
            bbox(0, 0.6, 0., 0., 100., 100.),
            bbox(0, 0.9, 1., 1., 101., 101.),
            bbox(1, 0.8, 0., 0., 100., 100.),
            bbox(0, 0.5, 200., 200., 250., 250.),
        ];

        let result = non_max_suppression(boxes, 0.7, 300);

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].confidence, 0.9);
        assert_eq!(result[1].class_id, 1);
        assert_eq!(result[2].confidence, 0.5);
    }

    #[test]
    fn test_non_max_suppression_caps_detections() {
        let boxes = (0..10)
            .map(|i| bbox(0, 0.5 + i as f32 * 0.01, i as f32 * 20., 0., i as f32 * 20. + 10., 10.))
            .collect();

        let result = non_max_suppression(boxes, 0.7, 4);

        assert_eq!(result.len(), 4);
        assert!((result[0].confidence - 0.59).abs() < 1e-6);
    }
}
