use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cardio_serve::{evaluate_archive, ArtifactKind, BatchReport, Classifier, Prediction, RunId, Timer};
use log::{info, warn};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::SharedState;

const LOADED: &str = "Model is loaded and ready for predictions.";
const NOT_LOADED: &str = "Model is not loaded.";

/// Uploaded multipart `file` field.
struct Upload {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Bytes,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let file_name = field.file_name().map(str::to_owned);
            let content_type = field.content_type().map(str::to_owned);
            let bytes = field.bytes().await?;

            info!(
                "Received file: {} ({}, {} bytes)",
                file_name.as_deref().unwrap_or("<unnamed>"),
                content_type.as_deref().unwrap_or("unknown type"),
                bytes.len()
            );
            return Ok(Upload {
                file_name,
                content_type,
                bytes,
            });
        }
    }

    Err(ApiError::MissingUpload)
}

pub async fn model_status(State(state): State<SharedState>) -> Json<Value> {
    let message = if state.model.is_loaded() {
        LOADED
    } else {
        NOT_LOADED
    };

    Json(json!({ "trained_model_loaded": message }))
}

pub async fn predict_single(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<Prediction>, ApiError> {
    let upload = read_upload(multipart).await?;
    let model = state.model.get()?;
    let permit = Arc::clone(&state.jobs).acquire_owned().await?;

    let prediction = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        Classifier::new(model).classify_from_raw(&upload.bytes)
    })
    .await??;

    let timings = prediction.timings;
    info!(
        "Single prediction: {} ({}), load {} ms, preprocess {} ms, inference {} ms",
        prediction.prediction,
        prediction.confidence,
        timings.image_load,
        timings.preprocess,
        timings.inference
    );
    Ok(Json(prediction))
}

pub async fn predict_folder(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<BatchReport>, ApiError> {
    let upload = read_upload(multipart).await?;
    if upload.content_type.as_deref().map_or(false, |ct| !ct.contains("zip")) {
        warn!(
            "{} was not sent as a zip, trying anyway",
            upload.file_name.as_deref().unwrap_or("upload")
        );
    }

    let model = state.model.get()?;
    let permit = Arc::clone(&state.jobs).acquire_owned().await?;

    let worker_state = Arc::clone(&state);
    let report = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let mut t = Timer::new_start("Handling folder prediction");
        let report = evaluate_archive(
            model,
            &upload.bytes,
            &worker_state.artifacts,
            &worker_state.batch,
        );
        t.stop();
        report
    })
    .await??;

    Ok(Json(report))
}

pub async fn download(
    State(state): State<SharedState>,
    Path(file_type): Path<String>,
) -> Response {
    let path = file_type
        .parse::<ArtifactKind>()
        .ok()
        .and_then(|kind| state.artifacts.find_latest(kind));

    serve_png(path).await
}

pub async fn download_run(
    State(state): State<SharedState>,
    Path((run_id, file_type)): Path<(String, String)>,
) -> Response {
    let path = match (run_id.parse::<RunId>(), file_type.parse::<ArtifactKind>()) {
        (Ok(run), Ok(kind)) => state.artifacts.find(&run, kind),
        _ => None,
    };

    serve_png(path).await
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "File not found" })),
    )
        .into_response()
}

async fn serve_png(path: Option<PathBuf>) -> Response {
    let path = match path {
        Some(path) => path,
        None => return not_found(),
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let headers = [
                (header::CONTENT_TYPE, "image/png".to_owned()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", name),
                ),
            ];
            (headers, bytes).into_response()
        }
        Err(err) => {
            warn!("Could not read {}: {}", path.display(), err);
            not_found()
        }
    }
}
