//! Bounded offloading of blocking store calls.

use std::{sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tracing::debug;

use super::error::{FacadeError, Result};

/// Runs blocking closures on tokio's blocking threads, at most `workers` at a time.
///
/// A call that outlives `timeout` is reported as [`FacadeError::Timeout`]; the
/// closure keeps its permit until it actually returns, so hung store calls
/// still count against the bound.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            timeout,
        }
    }

    /// Store calls currently running.
    pub fn busy(&self) -> usize {
        self.workers - self.permits.available_permits()
    }

    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let call = async {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| FacadeError::Internal(e.to_string()))?;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                task()
            });
            handle.await.map_err(|e| FacadeError::Internal(format!("store worker failed: {}", e)))?
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(FacadeError::Timeout(self.timeout))
            }
        }
    }
}
