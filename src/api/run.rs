use serde::{Serialize, Deserialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::{ExperimentId, RunId, api::{str_int, opt_str_int}};

/// Tag under which MLflow keeps the human readable run name.
pub const RUN_NAME_TAG: &str = "mlflow.runName";
/// Tag marking runs that were started as nested runs.
pub const NESTED_TAG: &str = "trackmate.nested";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    #[serde(with = "str_int")]
    pub timestamp: i64,
    #[serde(default, with = "str_int")]
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub info: RunInfo,
    #[serde(default)]
    pub data: RunData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunData {
    #[serde(default)]
    pub metrics: Option<Vec<Metric>>,
    #[serde(default)]
    pub params: Option<Vec<Param>>,
    #[serde(default)]
    pub tags: Option<Vec<RunTag>>,
}

impl RunData {
    pub fn params_map(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .flatten()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect()
    }

    /// Latest value per metric key. The store reports the latest point per key,
    /// later entries win if it ever reports more than one.
    pub fn metrics_map(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .flatten()
            .map(|m| (m.key.clone(), m.value))
            .collect()
    }

    pub fn tags_map(&self) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .flatten()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub experiment_id: ExperimentId,
    #[serde(default)]
    pub run_name: Option<String>,
    pub status: RunStatus,
    #[serde(with = "str_int")]
    pub start_time: i64,
    #[serde(default, with = "opt_str_int")]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub artifact_uri: String,
    #[serde(default)]
    pub lifecycle_stage: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Scheduled => "SCHEDULED",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        }
    }

    /// Whether a run in this status has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Failed | RunStatus::Killed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run status {0:?}")]
pub struct UnknownStatus(String);

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(RunStatus::Running),
            "SCHEDULED" => Ok(RunStatus::Scheduled),
            "FINISHED" => Ok(RunStatus::Finished),
            "FAILED" => Ok(RunStatus::Failed),
            "KILLED" => Ok(RunStatus::Killed),
            _ => Err(UnknownStatus(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

impl RunTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        RunTag {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An entry in a run's artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default, with = "opt_str_int")]
    pub file_size: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_string_timestamps() {
        let run: Run = serde_json::from_str(
            r#"{
                "info": {
                    "run_id": "a1b2",
                    "run_uuid": "a1b2",
                    "experiment_id": "1",
                    "user_id": "someone",
                    "status": "RUNNING",
                    "start_time": "1700000000000",
                    "artifact_uri": "mlflow-artifacts:/1/a1b2/artifacts",
                    "lifecycle_stage": "active"
                },
                "data": {
                    "params": [{"key": "lr", "value": "0.01"}],
                    "metrics": [{"key": "acc", "value": 0.97, "timestamp": "1700000000500", "step": "0"}]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(run.info.status, RunStatus::Running);
        assert_eq!(run.info.start_time, 1_700_000_000_000);
        assert_eq!(run.info.end_time, None);
        assert_eq!(run.data.params_map()["lr"], "0.01");
        assert_eq!(run.data.metrics_map()["acc"], 0.97);
        assert!(run.data.tags_map().is_empty());
    }

    #[test]
    fn parse_run_with_numeric_timestamps_and_no_data() {
        let run: Run = serde_json::from_str(
            r#"{
                "info": {
                    "run_id": "c3",
                    "experiment_id": "2",
                    "status": "FINISHED",
                    "start_time": 10,
                    "end_time": 20
                }
            }"#,
        )
        .unwrap();
        assert_eq!(run.info.end_time, Some(20));
        assert!(run.data.params_map().is_empty());
    }

    #[test]
    fn metric_timestamp_serializes_as_number() {
        let metric = Metric { key: "loss".into(), value: 0.5, timestamp: 7, step: 2 };
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["timestamp"], 7);
        assert_eq!(json["step"], 2);
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!("finished".parse::<RunStatus>(), Ok(RunStatus::Finished));
        assert!("done".parse::<RunStatus>().is_err());
        assert!(RunStatus::Killed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
