use crate::{model_service::ModelLoader, server::SharedState};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder};

pub async fn metrics_handler<L: ModelLoader>(State(state): State<SharedState<L>>) -> Response {
    state.metrics.record_model_loaded(state.model.is_loaded());
    let metric_families = state.metrics.registry.gather();

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

#[cfg(test)]
mod tests {
    use crate::{model_handle::tests::MockLoader, routes::test_support::*};
    use axum::{body::to_bytes, http::StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_report_detect_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("best.onnx");
        let app = router(state(MockLoader::default(), &model_path));
        let body = json!({ "image": png_data_url() }).to_string();

        let response = app.clone().oneshot(post_detect(body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        std::fs::write(&model_path, b"weights").unwrap();
        let response = app.clone().oneshot(post_detect(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        let detect_line = |outcome: &str| {
            text.lines().any(|line| {
                line.starts_with("detect_requests_total")
                    && line.contains(&format!("outcome=\"{}\"", outcome))
            })
        };
        assert!(detect_line("ok"), "{}", text);
        assert!(detect_line("model_unavailable"), "{}", text);
        assert!(text.contains("inference_duration_ms_bucket"), "{}", text);
        assert!(
            text.lines()
                .any(|line| line.starts_with("model_loaded") && line.ends_with(" 1")),
            "{}",
            text
        );
    }
}
