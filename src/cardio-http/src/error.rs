use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use serde_json::json;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] cardio_serve::Error),

    #[error("no file uploaded, expected a multipart field named 'file'")]
    MissingUpload,

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("worker failed: {0}")]
    Worker(#[from] JoinError),

    #[error("job queue is closed")]
    Closed(#[from] AcquireError),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Service(err) => err.kind(),
            ApiError::MissingUpload => "missing_upload",
            ApiError::Multipart(_) => "malformed_upload",
            ApiError::Worker(_) => "worker_failure",
            ApiError::Closed(_) => "unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        use cardio_serve::Error::*;

        match self {
            ApiError::Service(err) => match err {
                EmptyDataset(_) | Metrics(_) => StatusCode::UNPROCESSABLE_ENTITY,
                UnknownArtifact(_) => StatusCode::NOT_FOUND,
                ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
                err if err.is_client_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::MissingUpload | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Rejected request: {}", self);
        }

        let body = json!({
            "status": "error",
            "kind": self.kind(),
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
