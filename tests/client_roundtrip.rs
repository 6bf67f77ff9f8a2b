use std::sync::Arc;

use trackmate::{
    api::run::{RunStatus, RUN_NAME_TAG},
    backend::memory::MemoryStore,
    facade::{create_router, AppState, FacadeConfig},
    Client, ExperimentId, RunId,
};

/// Serve a facade over a fresh in-memory store on an ephemeral port.
async fn spawn_facade() -> (Client, Arc<MemoryStore>, tempfile::TempDir) {
    let store = Arc::new(MemoryStore::new());
    let scratch = tempfile::tempdir().unwrap();
    let config = FacadeConfig {
        scratch_dir: scratch.path().to_path_buf(),
        ..FacadeConfig::in_memory()
    };
    let app = create_router(Arc::new(AppState::with_store(&config, store.clone())));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (Client::new(format!("http://{}", address)), store, scratch)
}

/// The client blocks, so it must stay off the runtime's worker threads.
async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn tracking_scenario() {
    let (client, _store, _scratch) = spawn_facade().await;

    blocking(move || {
        assert_eq!(client.health().unwrap().status, "ok");

        let created = client.create_experiment("demo", Some("first try")).unwrap();
        let again = client.create_experiment("demo", None).unwrap();
        assert_eq!(created.experiment_id, again.experiment_id);
        assert_eq!(created.name, "demo");

        let listed = client.list_experiments().unwrap();
        assert!(listed.iter().any(|e| e.experiment_id == created.experiment_id && e.name == "demo"));
        assert_eq!(client.get_experiment(&created.experiment_id).unwrap().name, "demo");

        let run = client.start_run(&created.experiment_id, Some("r1"), false).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let logged = client.log_param(&run.run_id, "lr", "0.01").unwrap();
        assert_eq!(logged.message, "Parameter 'lr' logged successfully.");
        client.log_metric(&run.run_id, "acc", 0.5).unwrap();
        client.log_metric_at(&run.run_id, "acc", 0.97, Some(2)).unwrap();
        client.set_tag(&run.run_id, "team", "vision").unwrap();

        let fetched = client.get_run(&created.experiment_id, &run.run_id).unwrap();
        assert_eq!(fetched.run_id, run.run_id);
        assert_eq!(fetched.status, RunStatus::Running);
        assert_eq!(fetched.parameters.get("lr").map(String::as_str), Some("0.01"));
        assert_eq!(fetched.metrics.get("acc"), Some(&0.97));
        assert_eq!(fetched.tags.get(RUN_NAME_TAG).map(String::as_str), Some("r1"));
        assert_eq!(fetched.tags.get("team").map(String::as_str), Some("vision"));

        let ended = client.end_run(&run.run_id, Some(RunStatus::Failed)).unwrap();
        assert_eq!(ended.status, RunStatus::Failed);
        let fetched = client.get_run(&created.experiment_id, &run.run_id).unwrap();
        assert_eq!(fetched.status, RunStatus::Failed);
        assert_eq!(fetched.end_time, ended.end_time);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn artifacts_round_trip() {
    let (client, store, scratch) = spawn_facade().await;
    let local = tempfile::tempdir().unwrap();
    let model = local.path().join("model.pkl");
    let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    std::fs::write(&model, &content).unwrap();

    let run_id = blocking(move || {
        let run = client.start_run(&ExperimentId::from("0"), None, false).unwrap();
        let uploaded = client.log_artifact(&run.run_id, &model).unwrap();
        assert_eq!(uploaded.filename, "model.pkl");
        assert_eq!(uploaded.message, "Artifact 'model.pkl' logged successfully.");

        client.log_artifact_bytes(&run.run_id, "notes.txt", b"hello").unwrap();
        let mut names: Vec<String> = client
            .list_artifacts(&run.run_id)
            .unwrap()
            .into_iter()
            .map(|entry| entry.path)
            .collect();
        names.sort();
        assert_eq!(names, vec!["model.pkl".to_string(), "notes.txt".to_string()]);
        run.run_id
    })
    .await;

    assert_eq!(store.artifact(&run_id, "model.pkl"), Some(content));
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failures_come_back_as_error_bodies() {
    let (client, _store, _scratch) = spawn_facade().await;

    blocking(move || {
        let missing = RunId::from("missing");
        let err = client.log_param(&missing, "k", "v").unwrap_err();
        assert!(err.error.contains("missing"), "{}", err.error);

        assert!(client.get_experiment(&ExperimentId::from("424242")).is_err());
        assert!(client.start_run(&ExperimentId::from("424242"), None, false).is_err());

        let run = client.start_run(&ExperimentId::from("0"), None, false).unwrap();
        let other = client.create_experiment("other", None).unwrap();
        assert!(client.get_run(&other.experiment_id, &run.run_id).is_err());

        // NaN is sent as null and rejected before reaching the store.
        let err = client.log_metric(&run.run_id, "loss", f64::NAN).unwrap_err();
        assert!(err.error.contains("finite"), "{}", err.error);

        assert!(client.end_run(&run.run_id, Some(RunStatus::Running)).is_err());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_facade_is_an_error_value() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::new(format!("http://{}", address));
    let result = blocking(move || client.create_experiment("demo", None)).await;
    assert!(!result.unwrap_err().error.is_empty());
}
