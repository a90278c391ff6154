//! HTTP front end of the cardiomegaly classifier.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use cardio_serve::{ArtifactStore, BatchOptions, Model, ModelSlot};
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;

pub mod error;
pub mod routes;

pub use error::ApiError;

/// Everything the request handlers share.
pub struct AppState {
    pub model: ModelSlot<dyn Model>,
    pub artifacts: ArtifactStore,
    pub batch: BatchOptions,

    /// Bounds inference and plotting jobs running at the same time
    pub jobs: Arc<Semaphore>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        model: ModelSlot<dyn Model>,
        artifacts: ArtifactStore,
        batch: BatchOptions,
        max_jobs: usize,
    ) -> Self {
        AppState {
            model,
            artifacts,
            batch,
            jobs: Arc::new(Semaphore::new(max_jobs.max(1))),
        }
    }
}

/// Build the application, routes mounted under `prefix`.
pub fn router(state: SharedState, prefix: &str, body_limit: usize) -> Router {
    let api = Router::new()
        .route("/model/status", get(routes::model_status))
        .route("/predict/single", post(routes::predict_single))
        .route("/predict/folder", post(routes::predict_folder))
        .route("/download/:file_type", get(routes::download))
        .route("/download/:run_id/:file_type", get(routes::download_run))
        .with_state(state);

    // "api", "/api" and "/api/" all mount under "/api"
    let prefix = prefix.trim_matches('/');
    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&format!("/{}", prefix), api)
    };

    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
}
