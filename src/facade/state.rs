//! Application state shared across handlers

use std::sync::Arc;

use super::{config::FacadeConfig, pool::WorkerPool, tracker::Tracker};
use crate::api::store::TrackingStore;

pub struct AppState {
    pub tracker: Tracker,
    pub pool: WorkerPool,
    pub max_upload_size: usize,
}

impl AppState {
    pub fn new(config: &FacadeConfig) -> Self {
        let store = config.store.build(config.store_timeout);
        Self::with_store(config, store)
    }

    /// State around an already constructed store.
    pub fn with_store(config: &FacadeConfig, store: Arc<dyn TrackingStore>) -> Self {
        Self {
            tracker: Tracker::new(store, config.scratch_dir.clone()),
            pool: WorkerPool::new(config.workers, config.store_timeout),
            max_upload_size: config.max_upload_size,
        }
    }
}
