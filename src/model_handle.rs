use crate::model_service::ModelLoader;
use parking_lot::RwLock;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

pub enum Backend<L: ModelLoader> {
    Available(L),
    Unavailable { reason: String },
}

impl<L: ModelLoader> Backend<L> {
    pub fn probe(loader: L) -> Self {
        match loader.probe() {
            Ok(()) => Backend::Available(loader),
            Err(reason) => {
                tracing::error!("Inference runtime unavailable: {}", reason);
                Backend::Unavailable { reason }
            }
        }
    }
}

/// Lazily loaded detection model. Retried on every call while absent, never
/// reverts once loaded.
pub struct ModelHandle<L: ModelLoader> {
    backend: Backend<L>,
    model_path: PathBuf,
    model: RwLock<Option<Arc<L::Model>>>,
}

impl<L: ModelLoader> ModelHandle<L> {
    pub fn new(backend: Backend<L>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            model_path: model_path.into(),
            model: RwLock::new(None),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_loaded(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn current(&self) -> Option<Arc<L::Model>> {
        self.model.read().clone()
    }

    pub fn ensure_loaded(&self) -> Option<Arc<L::Model>> {
        if let Some(model) = self.current() {
            return Some(model);
        }

        let loader = match &self.backend {
            Backend::Available(loader) => loader,
            Backend::Unavailable { reason } => {
                tracing::warn!("Inference runtime not available: {}", reason);
                return None;
            }
        };

        if !self.model_path.exists() {
            tracing::warn!("Model file not found: {}", self.model_path.display());
            return None;
        }

        let loaded = match loader.load(&self.model_path) {
            Ok(model) => Arc::new(model),
            Err(e) => {
                tracing::error!("Failed to load model: {}", e);
                return None;
            }
        };

        // No lock is held while loading, a concurrent load may have stored first.
        let mut slot = self.model.write();
        match slot.as_ref() {
            Some(existing) => Some(existing.clone()),
            None => {
                tracing::info!("Loaded model: {}", self.model_path.display());
                *slot = Some(loaded.clone());
                Some(loaded)
            }
        }
    }
}
