use crate::{ExperimentId, RunId, api::{
        error::StoreError,
        experiment::{Experiment, ExperimentTag},
        run::{FileInfo, Metric, Run, RunInfo, RunStatus, RunTag},
        store::TrackingStore,
    }};
use anyhow::{Context, Error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::Display,
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

const SEARCH_PAGE_SIZE: i32 = 1000;

#[derive(Deserialize)]
struct RestErrorResponse {
    pub error_code: RestErrorCode,
    pub message: String,
}
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestError {
    #[error("{status} {code}: {message}")]
    Known { status: u16, code: RestErrorCode, message: String },
    #[error("Unknown {status} error:\n{body}")]
    Unknown { status: u16, body: String },
    #[error("request did not reach the tracking server: {0}")]
    Transport(String),
}
impl RestError {
    fn status(&self) -> Option<u16> {
        match self {
            RestError::Known { status, .. } | RestError::Unknown { status, .. } => Some(*status),
            RestError::Transport(_) => None,
        }
    }

    /// Errors produced by a proxy in front of the tracking server rather than by MLflow itself.
    fn is_gateway_failure(&self) -> bool {
        matches!(self.status(), Some(502) | Some(503) | Some(504))
    }
}
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum RestErrorCode {
    ResourceAlreadyExists,
    ResourceDoesNotExist,
    InvalidParameterValue,
    Unknown(String),
}
impl From<String> for RestErrorCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "RESOURCE_ALREADY_EXISTS" => RestErrorCode::ResourceAlreadyExists,
            "RESOURCE_DOES_NOT_EXIST" => RestErrorCode::ResourceDoesNotExist,
            "INVALID_PARAMETER_VALUE" => RestErrorCode::InvalidParameterValue,
            _ => RestErrorCode::Unknown(value),
        }
    }
}
impl Display for RestErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl From<RestError> for StoreError {
    fn from(error: RestError) -> Self {
        match error {
            RestError::Known { code: RestErrorCode::ResourceDoesNotExist, message, .. } => {
                StoreError::DoesNotExist(message)
            }
            RestError::Known { code: RestErrorCode::ResourceAlreadyExists, message, .. } => {
                StoreError::AlreadyExists(message)
            }
            RestError::Known { code: RestErrorCode::InvalidParameterValue, message, .. } => {
                StoreError::InvalidValue(message)
            }
            RestError::Transport(message) => StoreError::Unavailable(message),
            error if error.is_gateway_failure() => StoreError::Unavailable(error.to_string()),
            error => StoreError::Storage(error.into()),
        }
    }
}

fn parse_error(response: ureq::Response) -> RestError {
    let status = response.status();
    let body = response
        .into_string()
        .unwrap_or_else(|_| "Could not turn error body into String.".to_string());

    let response = serde_json::from_str::<RestErrorResponse>(&body).ok();
    if let Some(response) = response {
        RestError::Known {
            status,
            code: response.error_code,
            message: response.message,
        }
    } else {
        RestError::Unknown { status, body }
    }
}

fn check_response(response: ureq::Response) -> Result<ureq::Response, RestError> {
    if let Some(error) = response.synthetic_error() {
        return Err(RestError::Transport(error.to_string()));
    }
    if response.error() {
        return Err(parse_error(response));
    }
    Ok(response)
}

/// A [`TrackingStore`] backed by a MLflow Tracking Server.
pub struct RestStore {
    api_url: String,
    timeout: Duration,
}

impl RestStore {
    /// The `api_url` should be something like `http://127.0.0.1:5000/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        RestStore {
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a store for a tracking URI such as `http://127.0.0.1:5000`.
    pub fn for_tracking_uri(tracking_uri: &str) -> Self {
        Self::new(format!("{}/api", tracking_uri.trim_end_matches('/')))
    }

    /// Socket timeout applied to connecting and to reading each response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut request = ureq::request(method, url);
        request.timeout_connect(millis).timeout_read(millis);
        request
    }

    fn execute<Ep>(&self, request: Ep) -> Result<Ep::Value, StoreError>
    where
        Ep: Endpoint + EndpointExt,
    {
        let url = format!("{}/{}", self.api_url, Ep::PATH);
        debug!(endpoint = Ep::PATH, "calling tracking server");
        let http_response = match Ep::METHOD {
            Method::Get => {
                let query = Ep::write_query_string(&request).context("serializing query failed")?;
                self.request("GET", &format!("{}?{}", url, query)).call()
            }
            Method::Post => {
                let buffer = Ep::write_request_string(&request).context("serializing request failed")?;
                self.request("POST", &url)
                    .set("Content-Type", "application/json")
                    .send_string(&buffer)
            }
        };
        let http_response = check_response(http_response)?;
        let response_string = http_response.into_string().context("failed to turn response into string")?;
        let response = Ep::read_response_string(&response_string)
            .with_context(|| format!("deserializing response failed:\n{}", &response_string))?;
        Ok(Ep::extract(response))
    }

    fn upload_artifact(&self, artifact_path: &str, local: &Path, file_name: &str) -> Result<(), StoreError> {
        let mut url = format!("{}/2.0/mlflow-artifacts/artifacts", self.api_url);
        for segment in artifact_path.split('/').filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(&crate::encode_path_segment(segment));
        }
        url.push('/');
        url.push_str(&crate::encode_path_segment(file_name));

        let file = File::open(local)?;
        debug!(url = %url, "uploading artifact to tracking server");
        let http_response = self
            .request("PUT", &url)
            .set("Content-Type", "application/octet-stream")
            .send(file);
        check_response(http_response)?;
        Ok(())
    }
}

impl TrackingStore for RestStore {
    fn create_experiment(&self, name: &str, tags: &[ExperimentTag]) -> Result<ExperimentId, StoreError> {
        let request = CreateExperiment { name, tags };
        self.execute(request)
    }

    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, StoreError> {
        let request = GetExperiment { experiment_id: id };
        self.execute(request)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Experiment, StoreError> {
        let request = GetExperimentByName { experiment_name: name };
        self.execute(request)
    }

    fn list_experiments(&self) -> Result<Vec<Experiment>, StoreError> {
        let mut experiments = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = SearchExperiments {
                max_results: SEARCH_PAGE_SIZE,
                page_token: page_token.as_deref(),
                view_type: ViewType::Active,
            };
            let page = self.execute(request)?;
            experiments.extend(page.experiments.unwrap_or_default());
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(experiments),
            }
        }
    }

    fn create_run(&self, experiment_id: &ExperimentId, run_name: Option<&str>, start_time: i64, tags: &[RunTag]) -> Result<Run, StoreError> {
        let request = CreateRun { experiment_id, run_name, start_time, tags };
        self.execute(request)
    }

    fn get_run(&self, id: &RunId) -> Result<Run, StoreError> {
        let request = GetRun { run_id: id };
        self.execute(request)
    }

    fn update_run(&self, id: &RunId, status: RunStatus, end_time: i64) -> Result<RunInfo, StoreError> {
        let request = UpdateRun { run_id: id, status, end_time };
        self.execute(request)
    }

    fn log_param(&self, run_id: &RunId, key: &str, value: &str) -> Result<(), StoreError> {
        let request = LogParam { run_id, key, value };
        self.execute(request)
    }

    fn log_metric(&self, run_id: &RunId, metric: &Metric) -> Result<(), StoreError> {
        let request = LogMetric {
            run_id,
            key: &metric.key,
            value: metric.value,
            timestamp: metric.timestamp,
            step: metric.step,
        };
        self.execute(request)
    }

    fn set_tag(&self, run_id: &RunId, key: &str, value: &str) -> Result<(), StoreError> {
        let request = SetTag { run_id, key, value };
        self.execute(request)
    }

    fn log_artifact(&self, run: &RunInfo, local: &Path, file_name: &str) -> Result<(), StoreError> {
        match ArtifactTarget::parse(&run.artifact_uri) {
            ArtifactTarget::Proxied(path) => self.upload_artifact(&path, local, file_name),
            ArtifactTarget::Local(dir) => {
                fs::create_dir_all(&dir)?;
                fs::copy(local, dir.join(file_name))?;
                Ok(())
            }
            ArtifactTarget::Unsupported(scheme) => Err(StoreError::Unsupported(format!(
                "artifact uploads to {}:// locations",
                scheme
            ))),
        }
    }

    fn list_artifacts(&self, run_id: &RunId) -> Result<Vec<FileInfo>, StoreError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = ListArtifacts { run_id, page_token: page_token.as_deref() };
            let page = self.execute(request)?;
            files.extend(page.files.unwrap_or_default());
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(files),
            }
        }
    }
}

/// Where the artifacts of a run live, derived from its artifact URI.
#[derive(Debug, PartialEq, Eq)]
enum ArtifactTarget {
    /// Served by the tracking server's artifact proxy, path relative to its root.
    Proxied(String),
    Local(PathBuf),
    Unsupported(String),
}

impl ArtifactTarget {
    fn parse(uri: &str) -> Self {
        if let Some(rest) = uri.strip_prefix("mlflow-artifacts:") {
            let path = match rest.strip_prefix("//") {
                Some(authority) => authority.find('/').map(|i| &authority[i..]).unwrap_or(""),
                None => rest,
            };
            ArtifactTarget::Proxied(path.trim_matches('/').to_owned())
        } else if let Some(path) = uri.strip_prefix("file://") {
            ArtifactTarget::Local(PathBuf::from(path))
        } else if let Some(path) = uri.strip_prefix("file:") {
            ArtifactTarget::Local(PathBuf::from(path))
        } else if let Some(index) = uri.find("://") {
            ArtifactTarget::Unsupported(uri[..index].to_owned())
        } else {
            ArtifactTarget::Local(PathBuf::from(uri))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

trait Endpoint {
    const PATH: &'static str;
    const METHOD: Method;

    type Response;
    type Value;

    fn extract(response: Self::Response) -> Self::Value;
}
trait VoidEndpoint {
    const PATH: &'static str;
    const METHOD: Method;
}
trait EndpointExt: Endpoint {
    fn write_request_string(request: &Self) -> Result<String, Error>;
    fn write_query_string(request: &Self) -> Result<String, Error>;
    fn read_response_string(response: &str) -> Result<Self::Response, Error>;
}
impl<E> Endpoint for E
where
    E: VoidEndpoint,
{
    const PATH: &'static str = E::PATH;
    const METHOD: Method = E::METHOD;

    type Response = VoidResponse;
    type Value = ();

    fn extract(_response: Self::Response) -> Self::Value {}
}
impl<P, R, V> EndpointExt for P
where
    P: Serialize,
    R: DeserializeOwned,
    P: Endpoint<Response = R, Value = V>,
{
    fn write_request_string(request: &Self) -> Result<String, Error> {
        Ok(serde_json::to_string(request)?)
    }

    fn write_query_string(request: &Self) -> Result<String, Error> {
        Ok(serde_qs::to_string(request)?)
    }

    fn read_response_string(response: &str) -> Result<Self::Response, Error> {
        let response = serde_json::from_str::<'_, R>(response)?;
        Ok(response)
    }
}

#[derive(Deserialize)]
struct VoidResponse {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum ViewType {
    #[serde(rename = "ACTIVE_ONLY")]
    Active,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct CreateExperiment<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub tags: &'a [ExperimentTag],
}
#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: ExperimentId,
}
impl Endpoint for CreateExperiment<'_> {
    const PATH: &'static str = "2.0/mlflow/experiments/create";
    const METHOD: Method = Method::Post;
    type Response = CreateExperimentResponse;
    type Value = ExperimentId;

    fn extract(response: Self::Response) -> Self::Value {
        response.experiment_id
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GetExperiment<'a> {
    pub experiment_id: &'a ExperimentId,
}
#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}
impl Endpoint for GetExperiment<'_> {
    const PATH: &'static str = "2.0/mlflow/experiments/get";
    const METHOD: Method = Method::Get;
    type Value = Experiment;
    type Response = GetExperimentResponse;

    fn extract(response: Self::Response) -> Self::Value {
        response.experiment
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GetExperimentByName<'a> {
    pub experiment_name: &'a str,
}
impl Endpoint for GetExperimentByName<'_> {
    const PATH: &'static str = "2.0/mlflow/experiments/get-by-name";
    const METHOD: Method = Method::Get;
    type Value = Experiment;
    type Response = GetExperimentResponse;

    fn extract(response: Self::Response) -> Self::Value {
        response.experiment
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct SearchExperiments<'a> {
    pub max_results: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<&'a str>,
    pub view_type: ViewType,
}
#[derive(Deserialize)]
struct SearchExperimentsResponse {
    #[serde(default)]
    experiments: Option<Vec<Experiment>>,
    #[serde(default)]
    next_page_token: Option<String>,
}
impl Endpoint for SearchExperiments<'_> {
    const PATH: &'static str = "2.0/mlflow/experiments/search";
    const METHOD: Method = Method::Post;
    type Response = SearchExperimentsResponse;
    type Value = SearchExperimentsResponse;

    fn extract(response: Self::Response) -> Self::Value {
        response
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct CreateRun<'a> {
    pub experiment_id: &'a ExperimentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_name: Option<&'a str>,
    pub start_time: i64,
    pub tags: &'a [RunTag],
}
#[derive(Deserialize)]
struct RunResponse {
    run: Run,
}
impl Endpoint for CreateRun<'_> {
    const PATH: &'static str = "2.0/mlflow/runs/create";
    const METHOD: Method = Method::Post;
    type Response = RunResponse;
    type Value = Run;

    fn extract(response: Self::Response) -> Self::Value {
        response.run
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GetRun<'a> {
    pub run_id: &'a RunId,
}
impl Endpoint for GetRun<'_> {
    const PATH: &'static str = "2.0/mlflow/runs/get";
    const METHOD: Method = Method::Get;
    type Response = RunResponse;
    type Value = Run;

    fn extract(response: Self::Response) -> Self::Value {
        response.run
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct LogParam<'a> {
    pub run_id: &'a RunId,
    pub key: &'a str,
    pub value: &'a str,
}
impl VoidEndpoint for LogParam<'_> {
    const PATH: &'static str = "2.0/mlflow/runs/log-parameter";
    const METHOD: Method = Method::Post;
}

#[derive(Debug, Clone, Copy, Serialize)]
struct LogMetric<'a> {
    pub run_id: &'a RunId,
    pub key: &'a str,
    pub value: f64,
    pub timestamp: i64,
    pub step: i64,
}
impl VoidEndpoint for LogMetric<'_> {
    const PATH: &'static str = "2.0/mlflow/runs/log-metric";
    const METHOD: Method = Method::Post;
}

#[derive(Debug, Clone, Copy, Serialize)]
struct SetTag<'a> {
    pub run_id: &'a RunId,
    pub key: &'a str,
    pub value: &'a str,
}
impl VoidEndpoint for SetTag<'_> {
    const PATH: &'static str = "2.0/mlflow/runs/set-tag";
    const METHOD: Method = Method::Post;
}

#[derive(Debug, Clone, Copy, Serialize)]
struct UpdateRun<'a> {
    pub run_id: &'a RunId,
    pub status: RunStatus,
    pub end_time: i64,
}
#[derive(Deserialize)]
struct UpdateRunResponse {
    run_info: RunInfo,
}
impl Endpoint for UpdateRun<'_> {
    const PATH: &'static str = "2.0/mlflow/runs/update";
    const METHOD: Method = Method::Post;
    type Response = UpdateRunResponse;
    type Value = RunInfo;

    fn extract(response: Self::Response) -> Self::Value {
        response.run_info
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct ListArtifacts<'a> {
    pub run_id: &'a RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<&'a str>,
}
#[derive(Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    files: Option<Vec<FileInfo>>,
    #[serde(default)]
    next_page_token: Option<String>,
}
impl Endpoint for ListArtifacts<'_> {
    const PATH: &'static str = "2.0/mlflow/artifacts/list";
    const METHOD: Method = Method::Get;
    type Response = ListArtifactsResponse;
    type Value = ListArtifactsResponse;

    fn extract(response: Self::Response) -> Self::Value {
        response
    }
}
