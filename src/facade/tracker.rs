//! The facade's operations on top of a [`TrackingStore`].
//!
//! Everything here is blocking; handlers run it through the
//! [`WorkerPool`](super::pool::WorkerPool). No state is kept between calls:
//! every read goes to the store and every write acquires a fresh [`RunWriter`].

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info};

use crate::{
    api::{
        error::StoreError,
        experiment::ExperimentTag,
        run::{Metric, RunInfo, RunStatus, RunTag, NESTED_TAG, RUN_NAME_TAG},
        store::TrackingStore,
    },
    ExperimentId, RunId,
};

use super::{
    dto::{
        ArtifactEntry, ArtifactResponse, CreateExperimentResponse, EndRunResponse, ExperimentResponse,
        MessageResponse, RunResponse, StartRunResponse,
    },
    error::{FacadeError, Result},
};

#[derive(Clone)]
pub struct Tracker {
    store: Arc<dyn TrackingStore>,
    scratch_dir: PathBuf,
}

impl Tracker {
    pub fn new(store: Arc<dyn TrackingStore>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Look the name up first and only create when it is unknown. Losing a
    /// creation race to another caller resolves to the winner's experiment.
    pub fn create_experiment(&self, name: &str, description: Option<&str>) -> Result<CreateExperimentResponse> {
        let name = required("name", name)?;
        let created = |experiment_id: ExperimentId| CreateExperimentResponse {
            experiment_id,
            name: name.to_owned(),
        };

        match self.store.get_experiment_by_name(name) {
            Ok(existing) if !existing.is_active() => {
                return Err(FacadeError::InvalidValue(format!(
                    "experiment '{}' exists but is deleted, restore it or pick another name",
                    name
                )));
            }
            Ok(existing) => {
                debug!(experiment_id = %existing.experiment_id, experiment = name, "experiment already exists");
                return Ok(created(existing.experiment_id));
            }
            Err(StoreError::DoesNotExist(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let tags: Vec<ExperimentTag> = description
            .filter(|text| !text.is_empty())
            .map(ExperimentTag::description)
            .into_iter()
            .collect();
        match self.store.create_experiment(name, &tags) {
            Ok(experiment_id) => {
                info!(experiment_id = %experiment_id, experiment = name, "created experiment");
                Ok(created(experiment_id))
            }
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self.store.get_experiment_by_name(name)?;
                debug!(experiment_id = %existing.experiment_id, experiment = name, "experiment was created concurrently");
                Ok(created(existing.experiment_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_experiments(&self) -> Result<Vec<ExperimentResponse>> {
        let experiments = self.store.list_experiments()?;
        Ok(experiments.into_iter().map(ExperimentResponse::from).collect())
    }

    pub fn get_experiment(&self, experiment_id: &ExperimentId) -> Result<ExperimentResponse> {
        Ok(self.store.get_experiment(experiment_id)?.into())
    }

    /// Create a run in `RUNNING` state. It stays open until [`Tracker::end_run`].
    pub fn start_run(&self, experiment_id: &ExperimentId, run_name: Option<&str>, nested: bool) -> Result<StartRunResponse> {
        self.store.get_experiment(experiment_id)?;

        let run_name = run_name.map(str::trim).filter(|name| !name.is_empty());
        let mut tags = Vec::new();
        if let Some(name) = run_name {
            tags.push(RunTag::new(RUN_NAME_TAG, name));
        }
        if nested {
            tags.push(RunTag::new(NESTED_TAG, "true"));
        }
        let run = self.store.create_run(experiment_id, run_name, crate::timestamp(), &tags)?;
        info!(
            run_id = %run.info.run_id,
            experiment_id = %experiment_id,
            nested,
            "started run"
        );
        Ok(StartRunResponse {
            run_id: run.info.run_id,
            status: run.info.status,
        })
    }

    pub fn log_param(&self, run_id: &RunId, key: &str, value: &str) -> Result<MessageResponse> {
        let key = required("key", key)?;
        self.open_run(run_id)?.log_param(key, value)?;
        Ok(MessageResponse {
            message: format!("Parameter '{}' logged successfully.", key),
        })
    }

    /// Non-finite values are rejected before the store is contacted.
    pub fn log_metric(
        &self,
        run_id: &RunId,
        key: &str,
        value: Option<f64>,
        step: Option<i64>,
        timestamp: Option<i64>,
    ) -> Result<MessageResponse> {
        let key = required("key", key)?;
        let value = value
            .filter(|v| v.is_finite())
            .ok_or_else(|| FacadeError::InvalidValue(format!("metric '{}' must be a finite number", key)))?;
        let metric = Metric {
            key: key.to_owned(),
            value,
            timestamp: timestamp.unwrap_or_else(crate::timestamp),
            step: step.unwrap_or(0),
        };
        self.open_run(run_id)?.log_metric(&metric)?;
        Ok(MessageResponse {
            message: format!("Metric '{}' logged successfully.", key),
        })
    }

    pub fn set_tag(&self, run_id: &RunId, key: &str, value: &str) -> Result<MessageResponse> {
        let key = required("key", key)?;
        self.open_run(run_id)?.set_tag(key, value)?;
        Ok(MessageResponse {
            message: format!("Tag '{}' set successfully.", key),
        })
    }

    pub fn log_artifact(&self, run_id: &RunId, content: &[u8], filename: &str) -> Result<ArtifactResponse> {
        let file_name = artifact_file_name(filename)?;
        self.open_run(run_id)?
            .log_artifact(&self.scratch_dir, content, &file_name)?;
        Ok(ArtifactResponse {
            message: format!("Artifact '{}' logged successfully.", file_name),
            filename: file_name,
        })
    }

    pub fn list_artifacts(&self, run_id: &RunId) -> Result<Vec<ArtifactEntry>> {
        let files = self.store.list_artifacts(run_id)?;
        Ok(files.into_iter().map(ArtifactEntry::from).collect())
    }

    /// Fetch a run, which must belong to `experiment_id`.
    pub fn get_run(&self, experiment_id: &ExperimentId, run_id: &RunId) -> Result<RunResponse> {
        let run = self.store.get_run(run_id)?;
        if &run.info.experiment_id != experiment_id {
            return Err(FacadeError::NotFound(format!(
                "run {} in experiment {}",
                run_id, experiment_id
            )));
        }
        Ok(run.into())
    }

    pub fn end_run(&self, run_id: &RunId, status: Option<RunStatus>) -> Result<EndRunResponse> {
        let status = status.unwrap_or(RunStatus::Finished);
        if !status.is_terminal() {
            return Err(FacadeError::InvalidValue(format!(
                "a run cannot be ended with status {}",
                status
            )));
        }
        let info = self.open_run(run_id)?.finish(status)?;
        info!(run_id = %run_id, status = %info.status, "ended run");
        Ok(EndRunResponse {
            run_id: info.run_id,
            status: info.status,
            end_time: info.end_time,
        })
    }

    fn open_run(&self, run_id: &RunId) -> Result<RunWriter<'_>> {
        RunWriter::acquire(self.store.as_ref(), run_id)
    }
}

/// Write access to a single run for the duration of one facade operation.
///
/// Acquiring checks that the run exists; the handle is released when dropped,
/// on success and error paths alike.
pub struct RunWriter<'a> {
    store: &'a dyn TrackingStore,
    info: RunInfo,
}

impl<'a> RunWriter<'a> {
    pub fn acquire(store: &'a dyn TrackingStore, run_id: &RunId) -> Result<Self> {
        let run = store.get_run(run_id)?;
        if run.info.lifecycle_stage == "deleted" {
            return Err(FacadeError::NotFound(format!("run {}", run_id)));
        }
        debug!(run_id = %run_id, "acquired run handle");
        Ok(Self { store, info: run.info })
    }

    pub fn log_param(&self, key: &str, value: &str) -> Result<()> {
        Ok(self.store.log_param(&self.info.run_id, key, value)?)
    }

    pub fn log_metric(&self, metric: &Metric) -> Result<()> {
        Ok(self.store.log_metric(&self.info.run_id, metric)?)
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        Ok(self.store.set_tag(&self.info.run_id, key, value)?)
    }

    /// Stage `content` in `scratch_dir` and hand it to the store. The staged
    /// copy is removed whether or not the store accepted it.
    pub fn log_artifact(&self, scratch_dir: &Path, content: &[u8], file_name: &str) -> Result<()> {
        let mut staged = tempfile::Builder::new()
            .prefix("trackmate-upload-")
            .tempfile_in(scratch_dir)?;
        staged.write_all(content)?;
        staged.flush()?;
        debug!(
            run_id = %self.info.run_id,
            file_name,
            bytes = content.len(),
            "forwarding artifact"
        );

        let forwarded = self.store.log_artifact(&self.info, staged.path(), file_name);
        let removed = staged.close();
        forwarded?;
        removed?;
        Ok(())
    }

    pub fn finish(self, status: RunStatus) -> Result<RunInfo> {
        Ok(self.store.update_run(&self.info.run_id, status, crate::timestamp())?)
    }
}

// The store keeps no per-writer context, so releasing the handle only ends its log scope.
impl Drop for RunWriter<'_> {
    fn drop(&mut self) {
        debug!(run_id = %self.info.run_id, "released run handle");
    }
}

fn required<'v>(field: &str, value: &'v str) -> Result<&'v str> {
    if value.trim().is_empty() {
        Err(FacadeError::InvalidValue(format!("{} must not be empty", field)))
    } else {
        Ok(value)
    }
}

/// Final path component of an uploaded file name.
fn artifact_file_name(filename: &str) -> Result<String> {
    let name = filename.trim().rsplit(|c| c == '/' || c == '\\').next().unwrap_or("");
    match name {
        "" | "." | ".." => Err(FacadeError::InvalidValue(format!(
            "invalid artifact file name {:?}",
            filename
        ))),
        name => Ok(name.to_owned()),
    }
}
