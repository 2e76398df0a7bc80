use crate::upload_token::TokenError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// JSON error body; clients may rely on `error` only
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Failures surfaced by the upload API.
///
/// Display strings are what clients see; provider detail stays in the
/// `#[source]` chain and is logged, never returned, so store credentials
/// cannot leak through a response body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// Request rejected at the extractor boundary (malformed JSON or query)
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Invalid or expired upload token")]
    InvalidToken(#[from] TokenError),

    #[error("Failed to sign upload request")]
    Signing(#[source] anyhow::Error),

    #[error("Failed to write object to store")]
    StoreWrite(#[source] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidToken(_) => StatusCode::FORBIDDEN,
            ApiError::Signing(_) | ApiError::StoreWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingField(_) => "MISSING_FIELD",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::InvalidToken(_) => "INVALID_TOKEN",
            ApiError::Signing(_) => "SIGNING_ERROR",
            ApiError::StoreWrite(_) => "STORE_WRITE_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Signing(source) => error!(error = %source, "upload signing failed"),
            ApiError::StoreWrite(source) => error!(error = %source, "store write failed"),
            _ => {}
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
