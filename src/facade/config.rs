//! Facade configuration, built once at process start.

use std::{env, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    api::store::TrackingStore,
    backend::{memory::MemoryStore, rest::RestStore},
};

pub const DEFAULT_TRACKING_URI: &str = "http://127.0.0.1:5000";

/// Which tracking store the facade forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// A MLflow Tracking Server, e.g. `http://127.0.0.1:5000`.
    Rest { tracking_uri: String },
    /// An in-process store that forgets everything on shutdown.
    Memory,
}

impl StoreConfig {
    /// Instantiate the store. Request timeouts of the REST client follow `timeout`.
    pub fn build(&self, timeout: Duration) -> Arc<dyn TrackingStore> {
        match self {
            StoreConfig::Rest { tracking_uri } => {
                Arc::new(RestStore::for_tracking_uri(tracking_uri).with_timeout(timeout))
            }
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
        }
    }
}

/// Facade configuration
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreConfig,
    /// Upper bound on store calls in flight at once.
    pub workers: usize,
    /// How long a request waits for the store before giving up.
    pub store_timeout: Duration,
    /// Where uploaded artifacts are staged before being forwarded.
    pub scratch_dir: PathBuf,
    pub max_upload_size: usize,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            store: StoreConfig::Rest {
                tracking_uri: DEFAULT_TRACKING_URI.to_string(),
            },
            workers: 8,
            store_timeout: Duration::from_secs(30),
            scratch_dir: env::temp_dir(),
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl FacadeConfig {
    /// Defaults overridden by `TRACKMATE_*` and `MLFLOW_TRACKING_URI` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("TRACKMATE_HOST").unwrap_or(defaults.host),
            port: parsed_var("TRACKMATE_PORT").unwrap_or(defaults.port),
            store: match env::var("MLFLOW_TRACKING_URI") {
                Ok(uri) if uri == "memory" => StoreConfig::Memory,
                Ok(uri) if !uri.is_empty() => StoreConfig::Rest { tracking_uri: uri },
                _ => defaults.store,
            },
            workers: parsed_var("TRACKMATE_WORKERS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.workers),
            store_timeout: parsed_var("TRACKMATE_STORE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.store_timeout),
            scratch_dir: env::var_os("TRACKMATE_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            max_upload_size: parsed_var("TRACKMATE_MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_size),
        }
    }

    /// Configuration for an in-memory facade, used by tests and local experiments.
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig::Memory,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}
