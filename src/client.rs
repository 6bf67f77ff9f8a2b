//! Client for the tracking facade.
//!
//! One method per facade endpoint. Failures never panic: transport errors and
//! non-2xx answers come back as an [`ErrorBody`] so that training loops can
//! check the result and carry on.

use std::{fs, path::Path};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    api::run::RunStatus,
    encode_path_segment,
    facade::dto::{
        ArtifactEntry, ArtifactResponse, CreateExperimentRequest, CreateExperimentResponse, EndRunRequest,
        EndRunResponse, ExperimentResponse, HealthResponse, KeyValue, MessageResponse, MetricRequest,
        RunResponse, StartRunRequest, StartRunResponse,
    },
    ExperimentId, RunId,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// The error value returned by the facade, and by the client on transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}")]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    fn new(error: impl std::fmt::Display) -> Self {
        ErrorBody {
            error: error.to_string(),
        }
    }
}

pub type Response<T> = Result<T, ErrorBody>;

/// A client for the tracking facade.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
}

impl Client {
    /// The `base_url` should be something like `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Client {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Reads the facade location from `API_BASE_URL`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Experiments
impl Client {
    pub fn create_experiment(&self, name: &str, description: Option<&str>) -> Response<CreateExperimentResponse> {
        let request = CreateExperimentRequest {
            name: name.to_owned(),
            description: description.map(str::to_owned),
        };
        self.post("/experiments/", &request)
    }

    pub fn list_experiments(&self) -> Response<Vec<ExperimentResponse>> {
        self.get("/experiments/")
    }

    pub fn get_experiment(&self, experiment_id: &ExperimentId) -> Response<ExperimentResponse> {
        self.get(&format!("/experiments/{}/", encode_path_segment(experiment_id.as_ref())))
    }
}

/// Runs
impl Client {
    pub fn start_run(&self, experiment_id: &ExperimentId, run_name: Option<&str>, nested: bool) -> Response<StartRunResponse> {
        let request = StartRunRequest {
            run_name: run_name.map(str::to_owned),
            nested,
        };
        self.post(
            &format!("/experiments/{}/runs/", encode_path_segment(experiment_id.as_ref())),
            &request,
        )
    }

    /// Close a run. `None` ends it as `FINISHED`.
    pub fn end_run(&self, run_id: &RunId, status: Option<RunStatus>) -> Response<EndRunResponse> {
        self.post(&run_path(run_id, "end"), &EndRunRequest { status })
    }

    pub fn get_run(&self, experiment_id: &ExperimentId, run_id: &RunId) -> Response<RunResponse> {
        self.get(&format!(
            "/experiments/{}/runs/{}/",
            encode_path_segment(experiment_id.as_ref()),
            encode_path_segment(run_id.as_ref())
        ))
    }

    pub fn log_param(&self, run_id: &RunId, key: &str, value: &str) -> Response<MessageResponse> {
        let request = KeyValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        self.post(&run_path(run_id, "params"), &request)
    }

    pub fn log_metric(&self, run_id: &RunId, key: &str, value: f64) -> Response<MessageResponse> {
        self.log_metric_at(run_id, key, value, None)
    }

    /// Log one point of a metric series at `step`.
    pub fn log_metric_at(&self, run_id: &RunId, key: &str, value: f64, step: Option<i64>) -> Response<MessageResponse> {
        let request = MetricRequest {
            key: key.to_owned(),
            value: Some(value),
            step,
            timestamp: None,
        };
        self.post(&run_path(run_id, "metrics"), &request)
    }

    pub fn set_tag(&self, run_id: &RunId, key: &str, value: &str) -> Response<MessageResponse> {
        let request = KeyValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        self.post(&run_path(run_id, "tags"), &request)
    }
}

/// Artifacts
impl Client {
    /// Upload the file at `path` under its own file name.
    pub fn log_artifact(&self, run_id: &RunId, path: impl AsRef<Path>) -> Response<ArtifactResponse> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ErrorBody::new(format!("{} has no usable file name", path.display())))?;
        let content = fs::read(path).map_err(|e| ErrorBody::new(format!("reading {} failed: {}", path.display(), e)))?;
        self.log_artifact_bytes(run_id, file_name, &content)
    }

    pub fn log_artifact_bytes(&self, run_id: &RunId, file_name: &str, content: &[u8]) -> Response<ArtifactResponse> {
        let url = self.url(&run_path(run_id, "artifacts"));
        let boundary = boundary_for(content);
        let body = multipart_body(&boundary, file_name, content);
        debug!(url = %url, file_name, bytes = content.len(), "uploading artifact");
        let response = ureq::post(&url)
            .set("Content-Type", &format!("multipart/form-data; boundary={}", boundary))
            .send_bytes(&body);
        finish(response)
    }

    pub fn list_artifacts(&self, run_id: &RunId) -> Response<Vec<ArtifactEntry>> {
        self.get(&run_path(run_id, "artifacts"))
    }
}

/// System
impl Client {
    pub fn health(&self) -> Response<HealthResponse> {
        self.get("/health")
    }
}

impl Client {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Response<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        finish(ureq::get(&url).call())
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Response<T> {
        let url = self.url(path);
        let body = serde_json::to_string(body).map_err(ErrorBody::new)?;
        debug!(url = %url, body = %body, "POST");
        finish(
            ureq::post(&url)
                .set("Content-Type", "application/json")
                .send_string(&body),
        )
    }
}

fn run_path(run_id: &RunId, resource: &str) -> String {
    format!("/runs/{}/{}/", encode_path_segment(run_id.as_ref()), resource)
}

fn finish<T: DeserializeOwned>(response: ureq::Response) -> Response<T> {
    if let Some(error) = response.synthetic_error() {
        warn!(error = %error, "request to tracking facade failed");
        return Err(ErrorBody::new(error));
    }
    let status = response.status();
    let failed = response.error();
    let text = response
        .into_string()
        .map_err(|e| ErrorBody::new(format!("reading response failed: {}", e)))?;
    if failed {
        let error = serde_json::from_str::<ErrorBody>(&text)
            .unwrap_or_else(|_| ErrorBody::new(format!("{} {}", status, text)));
        warn!(status, error = %error, "tracking facade returned an error");
        return Err(error);
    }
    serde_json::from_str(&text).map_err(|e| ErrorBody::new(format!("unexpected response body: {}", e)))
}

fn boundary_for(content: &[u8]) -> String {
    let mut seed = crate::timestamp();
    loop {
        let boundary = format!("----trackmate-boundary-{:x}", seed);
        let needle = boundary.as_bytes();
        if !content.windows(needle.len()).any(|window| window == needle) {
            return boundary;
        }
        seed += 1;
    }
}

fn multipart_body(boundary: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let file_name: String = file_name
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| if c == '"' { '\'' } else { c })
        .collect();
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            boundary, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
