//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, Path, State},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::{ExperimentId, RunId};

use super::dto::{
    ArtifactEntry, ArtifactResponse, CreateExperimentRequest, CreateExperimentResponse, EndRunRequest,
    EndRunResponse, ExperimentResponse, HealthResponse, KeyValue, MessageResponse, MetricRequest,
    RunResponse, StartRunRequest, StartRunResponse,
};
use super::error::{FacadeError, Result};
use super::state::AppState;

type Body<T> = std::result::Result<Json<T>, JsonRejection>;

/// Parse an optional JSON body; an empty body yields the default.
fn json_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| FacadeError::InvalidValue(format!("invalid JSON body: {}", e)))
}

// ============================================================================
// Experiments
// ============================================================================

pub async fn create_experiment(
    State(state): State<Arc<AppState>>,
    body: Body<CreateExperimentRequest>,
) -> Result<Json<CreateExperimentResponse>> {
    let Json(request) = body?;
    let tracker = state.tracker.clone();
    let response = state
        .pool
        .run(move || tracker.create_experiment(&request.name, request.description.as_deref()))
        .await?;
    Ok(Json(response))
}

pub async fn list_experiments(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ExperimentResponse>>> {
    let tracker = state.tracker.clone();
    let experiments = state.pool.run(move || tracker.list_experiments()).await?;
    Ok(Json(experiments))
}

pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<ExperimentId>,
) -> Result<Json<ExperimentResponse>> {
    let tracker = state.tracker.clone();
    let experiment = state.pool.run(move || tracker.get_experiment(&experiment_id)).await?;
    Ok(Json(experiment))
}

// ============================================================================
// Runs
// ============================================================================

pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Path(experiment_id): Path<ExperimentId>,
    body: Bytes,
) -> Result<Json<StartRunResponse>> {
    let request: StartRunRequest = json_or_default(&body)?;
    let tracker = state.tracker.clone();
    let response = state
        .pool
        .run(move || tracker.start_run(&experiment_id, request.run_name.as_deref(), request.nested))
        .await?;
    Ok(Json(response))
}

pub async fn end_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
    body: Bytes,
) -> Result<Json<EndRunResponse>> {
    let request: EndRunRequest = json_or_default(&body)?;
    let tracker = state.tracker.clone();
    let response = state.pool.run(move || tracker.end_run(&run_id, request.status)).await?;
    Ok(Json(response))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path((experiment_id, run_id)): Path<(ExperimentId, RunId)>,
) -> Result<Json<RunResponse>> {
    let tracker = state.tracker.clone();
    let run = state.pool.run(move || tracker.get_run(&experiment_id, &run_id)).await?;
    Ok(Json(run))
}

pub async fn log_param(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
    body: Body<KeyValue>,
) -> Result<Json<MessageResponse>> {
    let Json(param) = body?;
    let tracker = state.tracker.clone();
    let response = state
        .pool
        .run(move || tracker.log_param(&run_id, &param.key, &param.value))
        .await?;
    Ok(Json(response))
}

pub async fn log_metric(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
    body: Body<MetricRequest>,
) -> Result<Json<MessageResponse>> {
    let Json(metric) = body?;
    let tracker = state.tracker.clone();
    let response = state
        .pool
        .run(move || tracker.log_metric(&run_id, &metric.key, metric.value, metric.step, metric.timestamp))
        .await?;
    Ok(Json(response))
}

pub async fn set_tag(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
    body: Body<KeyValue>,
) -> Result<Json<MessageResponse>> {
    let Json(tag) = body?;
    let tracker = state.tracker.clone();
    let response = state
        .pool
        .run(move || tracker.set_tag(&run_id, &tag.key, &tag.value))
        .await?;
    Ok(Json(response))
}

// ============================================================================
// Artifacts
// ============================================================================

/// Accepts a multipart form with a `file` field; the first file part is used
/// when no field has that name.
pub async fn log_artifact(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ArtifactResponse>> {
    let mut multipart = multipart?;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        let is_file_field = field.name() == Some("file");
        let file_name = match field.file_name() {
            Some(name) => name.to_string(),
            None if is_file_field => String::new(),
            None => continue,
        };
        let data = field.bytes().await?;
        let replace = is_file_field || upload.is_none();
        if replace {
            upload = Some((file_name, data));
        }
        if is_file_field {
            break;
        }
    }
    let (file_name, data) =
        upload.ok_or_else(|| FacadeError::InvalidValue("no file uploaded".to_string()))?;

    info!(run_id = %run_id, file_name = %file_name, bytes = data.len(), "received artifact");
    let tracker = state.tracker.clone();
    let response = state
        .pool
        .run(move || tracker.log_artifact(&run_id, &data, &file_name))
        .await?;
    Ok(Json(response))
}

pub async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
) -> Result<Json<Vec<ArtifactEntry>>> {
    let tracker = state.tracker.clone();
    let files = state.pool.run(move || tracker.list_artifacts(&run_id)).await?;
    Ok(Json(files))
}

// ============================================================================
// System
// ============================================================================

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
