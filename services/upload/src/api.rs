use crate::authorizer::UploadAuthorizer;
use crate::config::{ApiConfig, UploadMode};
use crate::error::{ApiError, ErrorBody};
use crate::object_store::{ByteChunkStream, ObjectStore};
use crate::upload_token::{TokenError, UploadTokenSigner};
use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub authorizer: Arc<UploadAuthorizer>,
    pub store: Arc<dyn ObjectStore>,
    pub relay_signer: Option<Arc<UploadTokenSigner>>,
}

/// Body of `POST /api/sign-upload`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUploadRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Credential returned by `POST /api/sign-upload`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUploadResponse {
    pub upload_url: String,
    pub key: String,
    pub public_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a relayed `PUT /upload/{key}`
#[derive(Debug, Serialize)]
pub struct RelayUploadResponse {
    pub success: bool,
    pub key: String,
    pub url: String,
}

/// Query parameters carried by relay upload URLs
#[derive(Debug, Deserialize)]
pub struct RelayParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires: Option<i64>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
        if config.cors_origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    } else {
        CorsLayer::new()
    };

    let mut router = Router::new()
        .route("/", get(liveness))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/sign-upload", post(sign_upload));

    // The relay PUT route exists only in relay mode; in presigned mode
    // clients talk to the store directly.
    if state.authorizer.mode() == UploadMode::Relay {
        router = router.route("/upload/*key", put(relay_upload));
    }

    router
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Plain-text liveness probe
async fn liveness() -> &'static str {
    "upload-service: ok"
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-service"
    }))
}

/// Readiness check endpoint; probes the object store
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.store.healthy().await {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "reachable"
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": "unreachable"
            })),
        )
    }
}

/// Issue an upload credential for one named file
#[instrument(skip(state, payload))]
async fn sign_upload(
    State(state): State<AppState>,
    payload: Result<Json<SignUploadRequest>, JsonRejection>,
) -> Result<Json<SignUploadResponse>, ApiError> {
    metrics::counter!("upload.sign.requests").increment(1);

    // Malformed JSON keeps the {error, code} shape instead of the
    // extractor's plain-text rejection
    let Json(request) = payload.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;

    let file_name = require_file_name(&request)?;

    let credential = match state
        .authorizer
        .authorize(file_name, request.content_type.as_deref())
        .await
    {
        Ok(credential) => credential,
        Err(e) => {
            metrics::counter!("upload.sign.failures").increment(1);
            return Err(e);
        }
    };

    info!(key = %credential.key, "issued upload credential");

    Ok(Json(SignUploadResponse {
        upload_url: credential.upload_url,
        public_url: credential.public_url,
        expires_at: credential.expires_at,
        key: credential.key,
    }))
}

fn require_file_name(request: &SignUploadRequest) -> Result<&str, ApiError> {
    match request.file_name.as_deref() {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => Err(ApiError::MissingField("fileName")),
    }
}

/// Accept upload bytes and stream them to the object store
#[instrument(skip(state, params, headers, body), fields(key = %key))]
async fn relay_upload(
    State(state): State<AppState>,
    Path(key): Path<String>,
    params: Result<Query<RelayParams>, QueryRejection>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<RelayUploadResponse>, ApiError> {
    let Query(params) =
        params.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;

    let signer = state
        .relay_signer
        .as_ref()
        .ok_or_else(|| ApiError::Signing(anyhow!("relay route mounted without token signer")))?;

    let (token, expires) = match (params.token.as_deref(), params.expires) {
        (Some(token), Some(expires)) => (token, expires),
        _ => return Err(ApiError::InvalidToken(TokenError::Malformed)),
    };
    signer.verify(&key, token, expires)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let stream: ByteChunkStream = Box::pin(body.into_data_stream().map_err(anyhow::Error::from));

    let started = Instant::now();
    let written = match state.store.put_object(&key, &content_type, stream).await {
        Ok(written) => written,
        Err(e) => {
            metrics::counter!("upload.relay.failures").increment(1);
            return Err(ApiError::StoreWrite(e));
        }
    };

    metrics::counter!("upload.relay.stored").increment(1);
    metrics::counter!("upload.relay.bytes").increment(written);
    metrics::histogram!("upload.relay.duration_seconds").record(started.elapsed().as_secs_f64());

    info!(
        key = %key,
        content_type = %content_type,
        size_bytes = written,
        "relayed upload to object store"
    );

    Ok(Json(RelayUploadResponse {
        success: true,
        url: state.store.public_url(&key),
        key,
    }))
}

/// Fallback for unknown routes; keeps the JSON error shape
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "Not found".to_string(),
            code: "NOT_FOUND".to_string(),
        }),
    )
}

/// Start the upload API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind API listener")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
