use std::path::Path;

use crate::api::{
    error::StoreError,
    experiment::{Experiment, ExperimentTag},
    id::{ExperimentId, RunId},
    run::{FileInfo, Metric, Run, RunInfo, RunStatus, RunTag},
};

/// The external system of record for experiments, runs and artifacts.
///
/// Implementations are blocking and must be safe to share between the
/// worker threads of the facade.
#[rustfmt::skip]
pub trait TrackingStore: Send + Sync {
    fn create_experiment(&self, name: &str, tags: &[ExperimentTag]) -> Result<ExperimentId, StoreError>;
    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, StoreError>;
    fn get_experiment_by_name(&self, name: &str) -> Result<Experiment, StoreError>;
    /// All active experiments, in store order.
    fn list_experiments(&self) -> Result<Vec<Experiment>, StoreError>;

    fn create_run(&self, experiment: &ExperimentId, run_name: Option<&str>, start_time: i64, tags: &[RunTag]) -> Result<Run, StoreError>;
    fn get_run(&self, id: &RunId) -> Result<Run, StoreError>;
    fn update_run(&self, id: &RunId, status: RunStatus, end_time: i64) -> Result<RunInfo, StoreError>;

    fn log_param(&self, run: &RunId, key: &str, value: &str) -> Result<(), StoreError>;
    fn log_metric(&self, run: &RunId, metric: &Metric) -> Result<(), StoreError>;
    fn set_tag(&self, run: &RunId, key: &str, value: &str) -> Result<(), StoreError>;

    /// Store the file at `local` as `file_name` at the root of the run's artifact directory.
    fn log_artifact(&self, run: &RunInfo, local: &Path, file_name: &str) -> Result<(), StoreError>;
    fn list_artifacts(&self, run: &RunId) -> Result<Vec<FileInfo>, StoreError>;
}
