mod detect;
mod health;
mod metrics;

use crate::{model_service::ModelLoader, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

use detect::detect;
use health::healthcheck;
use metrics::metrics_handler;

pub fn api_routes<L: ModelLoader>() -> Router<SharedState<L>> {
    Router::new()
        .route("/yolo/health", get(healthcheck::<L>))
        .route("/yolo/detect", post(detect::<L>))
        .route("/metrics", get(metrics_handler::<L>))
}
