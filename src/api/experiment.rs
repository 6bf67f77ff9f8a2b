use serde::{Serialize, Deserialize};

use crate::ExperimentId;

/// Tag under which MLflow keeps the free-text description of an experiment.
pub const DESCRIPTION_TAG: &str = "mlflow.note.content";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: ExperimentId,
    pub name: String,
    #[serde(default)]
    pub artifact_location: String,
    #[serde(default)]
    pub lifecycle_stage: String,
    #[serde(default, with = "crate::api::opt_str_int")]
    pub last_update_time: Option<i64>,
    #[serde(default, with = "crate::api::opt_str_int")]
    pub creation_time: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<ExperimentTag>>,
}

impl Experiment {
    pub fn description(&self) -> Option<&str> {
        self.tags
            .iter()
            .flatten()
            .find(|tag| tag.key == DESCRIPTION_TAG)
            .map(|tag| tag.value.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle_stage.is_empty() || self.lifecycle_stage == "active"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentTag {
    pub key: String,
    pub value: String,
}

impl ExperimentTag {
    pub fn description(text: impl Into<String>) -> Self {
        ExperimentTag {
            key: DESCRIPTION_TAG.to_owned(),
            value: text.into(),
        }
    }
}
