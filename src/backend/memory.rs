//! In-process tracking store.
//!
//! Mirrors the observable behaviour of a MLflow Tracking Server closely enough
//! for tests and local use: a `Default` experiment with id `0`, write-once
//! parameters, latest-value metrics with full history, and artifacts kept as
//! bytes keyed by run and file name.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::{
    api::{
        error::StoreError,
        experiment::{Experiment, ExperimentTag},
        run::{FileInfo, Metric, Param, Run, RunData, RunInfo, RunStatus, RunTag, RUN_NAME_TAG},
        store::TrackingStore,
    },
    ExperimentId, RunId,
};

#[derive(Debug, Default)]
struct Inner {
    experiments: Vec<Experiment>,
    runs: HashMap<RunId, StoredRun>,
    artifacts: BTreeMap<(RunId, String), Vec<u8>>,
    next_run: u64,
}

#[derive(Debug)]
struct StoredRun {
    info: RunInfo,
    params: BTreeMap<String, String>,
    metrics: BTreeMap<String, Vec<Metric>>,
    tags: BTreeMap<String, String>,
}

impl StoredRun {
    fn snapshot(&self) -> Run {
        let latest = self
            .metrics
            .values()
            .filter_map(|history| history.last().cloned())
            .collect();
        Run {
            info: self.info.clone(),
            data: RunData {
                metrics: Some(latest),
                params: Some(
                    self.params
                        .iter()
                        .map(|(key, value)| Param { key: key.clone(), value: value.clone() })
                        .collect(),
                ),
                tags: Some(self.tags.iter().map(|(key, value)| RunTag::new(key.clone(), value.clone())).collect()),
            },
        }
    }
}

/// A [`TrackingStore`] that keeps everything in memory.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let default = Experiment {
            experiment_id: ExperimentId::from("0"),
            name: "Default".to_owned(),
            artifact_location: "memory:/0".to_owned(),
            lifecycle_stage: "active".to_owned(),
            last_update_time: None,
            creation_time: Some(crate::timestamp()),
            tags: None,
        };
        MemoryStore {
            inner: Mutex::new(Inner {
                experiments: vec![default],
                ..Inner::default()
            }),
        }
    }

    // The data stays consistent even if a holder panicked: every mutation is a single insert.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Content of a stored artifact.
    pub fn artifact(&self, run: &RunId, file_name: &str) -> Option<Vec<u8>> {
        self.lock().artifacts.get(&(run.clone(), file_name.to_owned())).cloned()
    }

    /// Every value logged for a metric, oldest first.
    pub fn metric_history(&self, run: &RunId, key: &str) -> Result<Vec<Metric>, StoreError> {
        let inner = self.lock();
        let stored = inner.runs.get(run).ok_or_else(|| StoreError::does_not_exist(format!("run {}", run)))?;
        Ok(stored.metrics.get(key).cloned().unwrap_or_default())
    }

    pub fn experiment_count(&self) -> usize {
        self.lock().experiments.len()
    }
}

impl Inner {
    fn experiment(&self, id: &ExperimentId) -> Result<&Experiment, StoreError> {
        self.experiments
            .iter()
            .find(|e| &e.experiment_id == id)
            .ok_or_else(|| StoreError::does_not_exist(format!("experiment {}", id)))
    }

    fn run_mut(&mut self, id: &RunId) -> Result<&mut StoredRun, StoreError> {
        self.runs
            .get_mut(id)
            .ok_or_else(|| StoreError::does_not_exist(format!("run {}", id)))
    }
}

impl TrackingStore for MemoryStore {
    fn create_experiment(&self, name: &str, tags: &[ExperimentTag]) -> Result<ExperimentId, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidValue("experiment name must not be empty".into()));
        }
        let mut inner = self.lock();
        if inner.experiments.iter().any(|e| e.name == name) {
            return Err(StoreError::AlreadyExists(format!("experiment {}", name)));
        }
        let id = ExperimentId::from(inner.experiments.len().to_string());
        let now = crate::timestamp();
        inner.experiments.push(Experiment {
            experiment_id: id.clone(),
            name: name.to_owned(),
            artifact_location: format!("memory:/{}", id),
            lifecycle_stage: "active".to_owned(),
            last_update_time: Some(now),
            creation_time: Some(now),
            tags: if tags.is_empty() { None } else { Some(tags.to_vec()) },
        });
        Ok(id)
    }

    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, StoreError> {
        self.lock().experiment(id).map(Clone::clone)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Experiment, StoreError> {
        self.lock()
            .experiments
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| StoreError::does_not_exist(format!("experiment {}", name)))
    }

    fn list_experiments(&self) -> Result<Vec<Experiment>, StoreError> {
        Ok(self.lock().experiments.clone())
    }

    fn create_run(&self, experiment: &ExperimentId, run_name: Option<&str>, start_time: i64, tags: &[RunTag]) -> Result<Run, StoreError> {
        let mut inner = self.lock();
        inner.experiment(experiment)?;
        inner.next_run += 1;
        let run_id = RunId::from(format!("{:032x}", inner.next_run));
        let mut tags: BTreeMap<String, String> =
            tags.iter().map(|t| (t.key.clone(), t.value.clone())).collect();
        if let Some(name) = run_name {
            tags.insert(RUN_NAME_TAG.to_owned(), name.to_owned());
        }
        let stored = StoredRun {
            info: RunInfo {
                run_id: run_id.clone(),
                experiment_id: experiment.clone(),
                run_name: run_name.map(str::to_owned),
                status: RunStatus::Running,
                start_time,
                end_time: None,
                artifact_uri: format!("memory:/{}/{}/artifacts", experiment, run_id),
                lifecycle_stage: "active".to_owned(),
            },
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags,
        };
        let run = stored.snapshot();
        inner.runs.insert(run_id, stored);
        Ok(run)
    }

    fn get_run(&self, id: &RunId) -> Result<Run, StoreError> {
        self.lock().run_mut(id).map(|stored| stored.snapshot())
    }

    fn update_run(&self, id: &RunId, status: RunStatus, end_time: i64) -> Result<RunInfo, StoreError> {
        let mut inner = self.lock();
        let stored = inner.run_mut(id)?;
        stored.info.status = status;
        stored.info.end_time = Some(end_time);
        Ok(stored.info.clone())
    }

    fn log_param(&self, run: &RunId, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let stored = inner.run_mut(run)?;
        match stored.params.get(key) {
            Some(existing) if existing != value => Err(StoreError::InvalidValue(format!(
                "changing param values is not allowed: param {} was already logged with value {:?}",
                key, existing
            ))),
            Some(_) => Ok(()),
            None => {
                stored.params.insert(key.to_owned(), value.to_owned());
                Ok(())
            }
        }
    }

    fn log_metric(&self, run: &RunId, metric: &Metric) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let stored = inner.run_mut(run)?;
        stored.metrics.entry(metric.key.clone()).or_default().push(metric.clone());
        Ok(())
    }

    fn set_tag(&self, run: &RunId, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let stored = inner.run_mut(run)?;
        stored.tags.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn log_artifact(&self, run: &RunInfo, local: &Path, file_name: &str) -> Result<(), StoreError> {
        let bytes = fs::read(local)?;
        let mut inner = self.lock();
        inner.run_mut(&run.run_id)?;
        inner.artifacts.insert((run.run_id.clone(), file_name.to_owned()), bytes);
        Ok(())
    }

    fn list_artifacts(&self, run: &RunId) -> Result<Vec<FileInfo>, StoreError> {
        let mut inner = self.lock();
        inner.run_mut(run)?;
        Ok(inner
            .artifacts
            .iter()
            .filter(|((owner, _), _)| owner == run)
            .map(|((_, name), bytes)| FileInfo {
                path: name.clone(),
                is_dir: false,
                file_size: Some(bytes.len() as i64),
            })
            .collect())
    }
}
