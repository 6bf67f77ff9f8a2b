//! Request and response bodies of the facade's HTTP contract.
//!
//! The client deserializes the same types, so field names here are the wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::{
    experiment::Experiment,
    run::{FileInfo, Run, RunStatus},
};
use crate::{ExperimentId, RunId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExperimentResponse {
    pub experiment_id: ExperimentId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentResponse {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub artifact_location: String,
}

impl From<Experiment> for ExperimentResponse {
    fn from(experiment: Experiment) -> Self {
        Self {
            experiment_id: experiment.experiment_id,
            name: experiment.name,
            artifact_location: experiment.artifact_location,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(default)]
    pub nested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: RunId,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndRunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndRunResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    pub end_time: Option<i64>,
}

/// Body shared by the parameter and tag endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRequest {
    pub key: String,
    /// Absent for non-finite values, which JSON cannot carry.
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactResponse {
    pub message: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub is_dir: bool,
    pub file_size: Option<i64>,
}

impl From<FileInfo> for ArtifactEntry {
    fn from(file: FileInfo) -> Self {
        Self {
            path: file.path,
            is_dir: file.is_dir,
            file_size: file.file_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    pub experiment_id: ExperimentId,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub parameters: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
}

impl From<Run> for RunResponse {
    fn from(run: Run) -> Self {
        Self {
            parameters: run.data.params_map(),
            metrics: run.data.metrics_map(),
            tags: run.data.tags_map(),
            run_id: run.info.run_id,
            status: run.info.status,
            experiment_id: run.info.experiment_id,
            start_time: run.info.start_time,
            end_time: run.info.end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
