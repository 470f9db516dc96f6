use crate::{model_service::ModelLoader, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub model_path: String,
}

/// Reports whether the model is loaded. Never triggers a load.
pub async fn healthcheck<L: ModelLoader>(State(state): State<SharedState<L>>) -> impl IntoResponse {
    Json(HealthStatus {
        ok: state.model.is_loaded(),
        model_path: state.model.model_path().to_string_lossy().into_owned(),
    })
}
