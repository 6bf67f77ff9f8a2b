use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use trackmate::{
    api::{
        error::StoreError,
        experiment::ExperimentTag,
        run::{Metric, RunStatus, RunTag},
    },
    backend::rest::RestStore,
    facade::{FacadeError, Tracker},
    ExperimentId, RunId, TrackingStore,
};

/// Just enough of the MLflow REST API to exercise the store.
#[derive(Default)]
struct Mlflow {
    experiments: Vec<Value>,
    runs: HashMap<String, Value>,
    uploads: HashMap<String, Vec<u8>>,
    search_calls: usize,
}

type Shared = Arc<Mutex<Mlflow>>;
type Params = Query<HashMap<String, String>>;

fn mlflow_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({"error_code": code, "message": message}))).into_response()
}

fn not_found(what: &str) -> Response {
    mlflow_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", &format!("{} not found", what))
}

async fn create_experiment(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut mock = mock.lock().unwrap();
    let name = body["name"].as_str().unwrap_or_default().to_string();
    if mock.experiments.iter().any(|e| e["name"] == name.as_str()) {
        return mlflow_error(StatusCode::BAD_REQUEST, "RESOURCE_ALREADY_EXISTS", "exists");
    }
    let id = (mock.experiments.len() + 1).to_string();
    mock.experiments.push(json!({
        "experiment_id": id,
        "name": name,
        "artifact_location": format!("mlflow-artifacts:/{}", id),
        "lifecycle_stage": "active",
        "creation_time": "1700000000000",
        "tags": body.get("tags").cloned().unwrap_or(json!([])),
    }));
    Json(json!({"experiment_id": id})).into_response()
}

async fn get_experiment(State(mock): State<Shared>, Query(params): Params) -> Response {
    let mock = mock.lock().unwrap();
    let id = params.get("experiment_id").cloned().unwrap_or_default();
    match mock.experiments.iter().find(|e| e["experiment_id"] == id.as_str()) {
        Some(experiment) => Json(json!({"experiment": experiment})).into_response(),
        None => not_found(&id),
    }
}

async fn get_experiment_by_name(State(mock): State<Shared>, Query(params): Params) -> Response {
    let mock = mock.lock().unwrap();
    let name = params.get("experiment_name").cloned().unwrap_or_default();
    match mock.experiments.iter().find(|e| e["name"] == name.as_str()) {
        Some(experiment) => Json(json!({"experiment": experiment})).into_response(),
        None => not_found(&name),
    }
}

/// Pages hold a single experiment so that callers must follow page tokens.
async fn search_experiments(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut mock = mock.lock().unwrap();
    mock.search_calls += 1;
    let offset: usize = body["page_token"].as_str().and_then(|t| t.parse().ok()).unwrap_or(0);
    let page: Vec<Value> = mock.experiments.iter().skip(offset).take(1).cloned().collect();
    let mut response = json!({"experiments": page});
    if offset + 1 < mock.experiments.len() {
        response["next_page_token"] = json!((offset + 1).to_string());
    }
    Json(response).into_response()
}

async fn create_run(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut mock = mock.lock().unwrap();
    let experiment_id = body["experiment_id"].as_str().unwrap_or_default().to_string();
    if !mock.experiments.iter().any(|e| e["experiment_id"] == experiment_id.as_str()) {
        return not_found(&experiment_id);
    }
    let run_id = format!("run{}", mock.runs.len() + 1);
    let run = json!({
        "info": {
            "run_id": run_id,
            "experiment_id": experiment_id,
            "run_name": body.get("run_name").cloned().unwrap_or(Value::Null),
            "status": "RUNNING",
            "start_time": body["start_time"].to_string(),
            "artifact_uri": format!("mlflow-artifacts:/{}/{}/artifacts", experiment_id, run_id),
            "lifecycle_stage": "active",
        },
        "data": {"tags": body.get("tags").cloned().unwrap_or(json!([]))},
    });
    mock.runs.insert(run_id, run.clone());
    Json(json!({"run": run})).into_response()
}

async fn get_run(State(mock): State<Shared>, Query(params): Params) -> Response {
    let mock = mock.lock().unwrap();
    let id = params.get("run_id").cloned().unwrap_or_default();
    if id == "explode" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "<html>internal error</html>").into_response();
    }
    match mock.runs.get(&id) {
        Some(run) => Json(json!({"run": run})).into_response(),
        None => not_found(&id),
    }
}

fn push_entry(mock: &Shared, body: &Value, list: &str, entry: Value) -> Response {
    let mut mock = mock.lock().unwrap();
    let id = body["run_id"].as_str().unwrap_or_default().to_string();
    let Some(run) = mock.runs.get_mut(&id) else {
        return not_found(&id);
    };
    let data = &mut run["data"];
    if data.get(list).is_none() {
        data[list] = json!([]);
    }
    if let Some(entries) = data[list].as_array_mut() {
        entries.retain(|e| e["key"] != entry["key"]);
        entries.push(entry);
    }
    Json(json!({})).into_response()
}

async fn log_parameter(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let entry = json!({"key": body["key"], "value": body["value"]});
    push_entry(&mock, &body, "params", entry)
}

async fn log_metric(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let entry = json!({
        "key": body["key"],
        "value": body["value"],
        "timestamp": body["timestamp"],
        "step": body["step"],
    });
    push_entry(&mock, &body, "metrics", entry)
}

async fn set_tag(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let entry = json!({"key": body["key"], "value": body["value"]});
    push_entry(&mock, &body, "tags", entry)
}

async fn update_run(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut mock = mock.lock().unwrap();
    let id = body["run_id"].as_str().unwrap_or_default().to_string();
    let Some(run) = mock.runs.get_mut(&id) else {
        return not_found(&id);
    };
    run["info"]["status"] = body["status"].clone();
    run["info"]["end_time"] = json!(body["end_time"].to_string());
    Json(json!({"run_info": run["info"]})).into_response()
}

async fn list_artifacts(State(mock): State<Shared>, Query(params): Params) -> Response {
    let mock = mock.lock().unwrap();
    let id = params.get("run_id").cloned().unwrap_or_default();
    let prefix = format!("{}/", id);
    let files: Vec<Value> = mock
        .uploads
        .iter()
        .filter_map(|(path, bytes)| {
            let name = path.split_once(&prefix)?.1.strip_prefix("artifacts/")?;
            Some(json!({"path": name, "is_dir": false, "file_size": bytes.len().to_string()}))
        })
        .collect();
    Json(json!({"files": files})).into_response()
}

async fn upload_artifact(State(mock): State<Shared>, Path(path): Path<String>, body: Bytes) -> Response {
    mock.lock().unwrap().uploads.insert(path, body.to_vec());
    Json(json!({})).into_response()
}

async fn spawn_mlflow() -> (String, Shared) {
    let mock: Shared = Arc::default();
    let app = Router::new()
        .route("/api/2.0/mlflow/experiments/create", post(create_experiment))
        .route("/api/2.0/mlflow/experiments/get", get(get_experiment))
        .route("/api/2.0/mlflow/experiments/get-by-name", get(get_experiment_by_name))
        .route("/api/2.0/mlflow/experiments/search", post(search_experiments))
        .route("/api/2.0/mlflow/runs/create", post(create_run))
        .route("/api/2.0/mlflow/runs/get", get(get_run))
        .route("/api/2.0/mlflow/runs/log-parameter", post(log_parameter))
        .route("/api/2.0/mlflow/runs/log-metric", post(log_metric))
        .route("/api/2.0/mlflow/runs/set-tag", post(set_tag))
        .route("/api/2.0/mlflow/runs/update", post(update_run))
        .route("/api/2.0/mlflow/artifacts/list", get(list_artifacts))
        .route("/api/2.0/mlflow-artifacts/artifacts/*path", put(upload_artifact))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", address), mock)
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn experiments_are_created_and_listed_across_pages() {
    let (uri, mock) = spawn_mlflow().await;
    let store = RestStore::for_tracking_uri(&uri);

    blocking(move || {
        assert!(matches!(store.get_experiment_by_name("a"), Err(StoreError::DoesNotExist(_))));

        let a = store.create_experiment("a", &[ExperimentTag::description("first")]).unwrap();
        store.create_experiment("b", &[]).unwrap();
        store.create_experiment("c", &[]).unwrap();
        assert!(matches!(store.create_experiment("a", &[]), Err(StoreError::AlreadyExists(_))));

        let fetched = store.get_experiment(&a).unwrap();
        assert_eq!(fetched.name, "a");
        assert_eq!(fetched.description(), Some("first"));
        assert_eq!(fetched.creation_time, Some(1_700_000_000_000));
        assert_eq!(store.get_experiment_by_name("a").unwrap().experiment_id, a);

        let names: Vec<String> = store.list_experiments().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    })
    .await;

    assert_eq!(mock.lock().unwrap().search_calls, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_lifecycle_over_rest() {
    let (uri, _mock) = spawn_mlflow().await;
    let store = RestStore::for_tracking_uri(&uri);

    blocking(move || {
        let experiment = store.create_experiment("runs", &[]).unwrap();
        let run = store
            .create_run(&experiment, Some("r1"), 1234, &[RunTag::new("team", "vision")])
            .unwrap();
        let run_id = run.info.run_id.clone();
        assert_eq!(run.info.status, RunStatus::Running);
        assert_eq!(run.info.start_time, 1234);

        store.log_param(&run_id, "lr", "0.01").unwrap();
        let metric = Metric { key: "acc".into(), value: 0.9, timestamp: 99, step: 3 };
        store.log_metric(&run_id, &metric).unwrap();
        store.set_tag(&run_id, "stage", "eval").unwrap();

        let fetched = store.get_run(&run_id).unwrap();
        assert_eq!(fetched.data.params_map().get("lr").map(String::as_str), Some("0.01"));
        assert_eq!(fetched.data.metrics_map().get("acc"), Some(&0.9));
        assert_eq!(fetched.data.tags_map().get("team").map(String::as_str), Some("vision"));
        assert_eq!(fetched.data.tags_map().get("stage").map(String::as_str), Some("eval"));

        let info = store.update_run(&run_id, RunStatus::Finished, 5678).unwrap();
        assert_eq!(info.status, RunStatus::Finished);
        assert_eq!(info.end_time, Some(5678));

        assert!(matches!(store.get_run(&RunId::from("nope")), Err(StoreError::DoesNotExist(_))));
        assert!(matches!(store.log_param(&RunId::from("nope"), "k", "v"), Err(StoreError::DoesNotExist(_))));
        assert!(matches!(store.get_run(&RunId::from("explode")), Err(StoreError::Storage(_))));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn tracker_forwards_artifacts_through_the_proxy() {
    let (uri, mock) = spawn_mlflow().await;
    let scratch = tempfile::tempdir().unwrap();
    let tracker = Tracker::new(Arc::new(RestStore::for_tracking_uri(&uri)), scratch.path());

    let run_id = blocking(move || {
        let experiment = tracker.create_experiment("artifacts", Some("proxied uploads")).unwrap();
        let run = tracker.start_run(&experiment.experiment_id, Some("upload"), false).unwrap();
        let response = tracker.log_artifact(&run.run_id, b"weights", "model v1.bin").unwrap();
        assert_eq!(response.filename, "model v1.bin");

        let listed = tracker.list_artifacts(&run.run_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "model v1.bin");
        assert_eq!(listed[0].file_size, Some(7));

        let ended = tracker.end_run(&run.run_id, None).unwrap();
        assert_eq!(ended.status, RunStatus::Finished);
        run.run_id
    })
    .await;

    let mock = mock.lock().unwrap();
    let key = format!("1/{}/artifacts/model v1.bin", run_id);
    assert_eq!(mock.uploads.get(&key).map(Vec::as_slice), Some(&b"weights"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let store = RestStore::for_tracking_uri(&format!("http://{}", address)).with_timeout(Duration::from_secs(2));
    let tracker = Tracker::new(Arc::new(store), std::env::temp_dir());
    let result = blocking(move || tracker.create_experiment("offline", None)).await;
    assert!(matches!(result, Err(FacadeError::StoreUnavailable(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_experiment_is_not_found_through_tracker() {
    let (uri, _mock) = spawn_mlflow().await;
    let tracker = Tracker::new(Arc::new(RestStore::for_tracking_uri(&uri)), std::env::temp_dir());
    let result = blocking(move || tracker.start_run(&ExperimentId::from("42"), None, false)).await;
    assert!(matches!(result, Err(FacadeError::NotFound(_))));
}
