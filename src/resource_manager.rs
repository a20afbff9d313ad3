//! Resource management

use crate::error::SeaLevelError;

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] bounds the number of concurrent store queries and
/// CPU-bound processing tasks. Each type of resource is managed by an optional Tokio Semaphore.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for store connections.
    store_connections: Option<Semaphore>,

    /// Optional semaphore for tasks.
    ///
    /// Shared so that a permit can move into the blocking job it guards and outlive the request
    /// that started the job.
    tasks: Option<Arc<Semaphore>>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(store_connection_limit: Option<usize>, task_limit: Option<usize>) -> Self {
        Self {
            store_connections: store_connection_limit.map(Semaphore::new),
            tasks: task_limit.map(|limit| Arc::new(Semaphore::new(limit))),
        }
    }

    /// Acquire a store connection resource.
    pub async fn store_connection(&self) -> Result<Option<SemaphorePermit>, SeaLevelError> {
        optional_acquire(&self.store_connections, 1).await
    }

    /// Acquire a task resource.
    ///
    /// The permit is owned and should be dropped by the task itself once it finishes.
    pub async fn task(&self) -> Result<Option<OwnedSemaphorePermit>, SeaLevelError> {
        optional_acquire_owned(&self.tasks, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: u32,
) -> Result<Option<SemaphorePermit>, SeaLevelError> {
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}

/// Acquire owned permits on an optional shared Semaphore, if present.
async fn optional_acquire_owned(
    sem: &Option<Arc<Semaphore>>,
    n: u32,
) -> Result<Option<OwnedSemaphorePermit>, SeaLevelError> {
    if let Some(sem) = sem {
        sem.clone()
            .acquire_many_owned(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::TryAcquireError;

    #[tokio::test]
    async fn no_resource_management() {
        let rm = ResourceManager::new(None, None);
        assert!(rm.store_connections.is_none());
        assert!(rm.tasks.is_none());
        let _c = rm.store_connection().await.unwrap();
        let _t = rm.task().await.unwrap();
        assert!(_c.is_none());
        assert!(_t.is_none());
    }

    #[tokio::test]
    async fn full_resource_management() {
        let rm = ResourceManager::new(Some(1), Some(1));
        let _c = rm.store_connection().await.unwrap();
        let _t = rm.task().await.unwrap();
        assert!(_c.is_some());
        assert!(_t.is_some());
        // Check that there are no more resources (without blocking).
        assert_eq!(
            rm.store_connections.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        assert_eq!(
            rm.tasks.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
    }

    #[tokio::test]
    async fn permits_released_on_drop() {
        let rm = ResourceManager::new(Some(1), None);
        drop(rm.store_connection().await.unwrap());
        assert!(rm.store_connections.as_ref().unwrap().try_acquire().is_ok());
    }

    #[tokio::test]
    async fn task_permit_held_by_blocking_job() {
        let rm = ResourceManager::new(None, Some(1));
        let permit = rm.task().await.unwrap();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (finish_tx, finish_rx) = std::sync::mpsc::channel::<()>();
        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            started_tx.send(()).unwrap();
            finish_rx.recv().unwrap();
        });
        // The waiting side gives up, as a request does on timeout, but the job keeps the permit.
        started_rx.recv().unwrap();
        assert_eq!(
            rm.tasks.as_ref().unwrap().try_acquire().err(),
            Some(TryAcquireError::NoPermits)
        );
        finish_tx.send(()).unwrap();
        job.await.unwrap();
        assert_eq!(1, rm.tasks.as_ref().unwrap().available_permits());
    }
}
