use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload_service::api::{start_api_server, AppState};
use upload_service::authorizer::{RelayIssuer, UploadAuthorizer};
use upload_service::config::{Config, UploadMode};
use upload_service::object_store::{ObjectStore, S3ObjectStore};
use upload_service::upload_token::UploadTokenSigner;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; missing store credentials fail here, not per-request
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        mode = ?config.upload.mode,
        "starting upload service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize the object store client once from immutable configuration
    let store: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store client")?,
    );

    let relay_signer = match config.upload.mode {
        UploadMode::Relay => {
            let secret = config
                .upload
                .relay_token_secret
                .as_deref()
                .context("relay mode requires upload.relay_token_secret")?;
            Some(Arc::new(UploadTokenSigner::new(
                secret,
                config.relay_token_ttl(),
            )))
        }
        UploadMode::Presigned => None,
    };

    let authorizer = Arc::new(UploadAuthorizer::new(
        store.clone(),
        config.upload.mode,
        config.upload.key_prefix.clone(),
        config.presigned_url_expiry(),
        relay_signer.as_ref().map(|signer| RelayIssuer {
            signer: signer.as_ref().clone(),
            base_url: config.external_url(),
        }),
    ));

    let state = AppState {
        authorizer,
        store,
        relay_signer,
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("upload service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
