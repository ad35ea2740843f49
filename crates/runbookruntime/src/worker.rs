use runbookcore::ArtifactExecutionError;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded bridge from the scheduling loop onto blocking threads.
///
/// At most `size` component calls run at once; the rest wait for a permit
/// without occupying a blocking thread.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Run `call` on a blocking thread once a permit is free.
    ///
    /// The permit travels with the closure, so a call abandoned by its
    /// caller keeps its slot until the thread actually finishes.
    pub async fn run<F, T>(&self, call: F) -> Result<T, ArtifactExecutionError>
    where
        F: FnOnce() -> Result<T, ArtifactExecutionError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ArtifactExecutionError::Panicked(format!("worker pool closed: {}", e)))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            call()
        })
        .await
        .map_err(|e| ArtifactExecutionError::Panicked(e.to_string()))?
    }
}
