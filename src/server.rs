use crate::{
    config::Config, model_handle::ModelHandle, model_service::ModelLoader, routes::api_routes,
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::{Any, CorsLayer};

pub struct SharedState<L: ModelLoader> {
    pub model: Arc<ModelHandle<L>>,
    pub metrics: Arc<Metrics>,
}

impl<L: ModelLoader> Clone for SharedState<L> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// API routes with the body cap and a CORS policy open to every origin.
pub fn build_router<L: ModelLoader>(state: SharedState<L>, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(api_routes())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<L: ModelLoader>(
        state: SharedState<L>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics_layer = HttpMetricsLayerBuilder::new().build();
        let router = build_router(state, config.server.max_body_bytes).layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}
