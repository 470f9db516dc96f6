use crate::{
    config::Config,
    model_handle::{Backend, ModelHandle},
    ort_service::OrtModelLoader,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let loader = OrtModelLoader::new(&config.model);
    let model = Arc::new(ModelHandle::new(
        Backend::probe(loader),
        config.model.get_path(),
    ));

    // First attempt at startup; detect requests retry while absent.
    if model.ensure_loaded().is_none() {
        tracing::warn!(
            "Starting without a model, detect requests will retry loading {}",
            model.model_path().display()
        );
    }

    let metrics = Arc::new(Metrics::new()?);
    metrics.record_model_loaded(model.is_loaded());

    let state = SharedState { model, metrics };
    let server = HttpServer::new(state, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
