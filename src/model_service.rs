use crate::labels::ClassNames;
use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// One box as emitted by a detection model, in original image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to build tensor: {0}")]
    Tensor(String),
    #[error("inference failed: {0}")]
    Run(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("inference task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("failed to create session: {0}")]
    Session(String),
    #[error("failed to read labels: {0}")]
    Labels(String),
}

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn predict(
        &self,
        image: RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<BoundingBox>, InferenceError>;

    fn class_names(&self) -> &ClassNames;
}

/// Builds a [`ModelService`] from a weights file.
pub trait ModelLoader: Send + Sync + 'static {
    type Model: ModelService;

    /// Checks that the inference runtime itself can be initialised.
    fn probe(&self) -> Result<(), String>;

    fn load(&self, path: &Path) -> Result<Self::Model, ModelLoadError>;
}
