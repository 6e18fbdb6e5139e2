//! Worker Pool (C2): bounds concurrency across a fixed number of sandbox
//! slots. The default backing store is an in-process semaphore-gated free
//! list; a named/shared-memory variant for genuinely cross-process pools
//! is an explicit opt-in (see [`WorkerPool::open_shared`]) and is grounded
//! on the same System V IPC conventions the CLI's cleanup routine reasons
//! about, rather than reimplemented here.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::sandbox::SandboxPool;

/// A held slot. Dropping it without calling [`WorkerPool::release`] still
/// frees the semaphore permit, but the slot index is only returned to the
/// free list by an explicit release — mirrors the "double-release must not
/// corrupt state" contract by making release idempotent instead of
/// Drop-based.
pub struct Slot {
    pub index: usize,
    pub path: PathBuf,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    sandbox: Arc<SandboxPool>,
    semaphore: Arc<Semaphore>,
    free: Arc<Mutex<VecDeque<usize>>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// In-process pool: capacity sandbox slots guarded by an async semaphore.
    pub fn open(cache_root: &std::path::Path, capacity: usize) -> WorkspaceResult<Self> {
        let sandbox = SandboxPool::new(cache_root, capacity)?;
        let free = (0..capacity).collect::<VecDeque<_>>();
        Ok(Self {
            sandbox: Arc::new(sandbox),
            semaphore: Arc::new(Semaphore::new(capacity)),
            free: Arc::new(Mutex::new(free)),
            cancel: CancellationToken::new(),
        })
    }

    /// Cross-process pool sharing the same named capacity across workers.
    /// Not implemented by this crate: the intended mechanism is a named
    /// semaphore plus shared-memory free-list, analogous to the System V
    /// IPC objects `sysv_ipc` cleans up on macOS, but geo-epic has no need
    /// for multi-host fan-out yet. Call sites that need true cross-process
    /// pooling should run one `WorkerPool::open` per process against
    /// disjoint capacity slices instead.
    pub fn open_shared(_key: &str, _capacity: usize) -> WorkspaceResult<Self> {
        Err(WorkspaceError::InvalidValue {
            key: "pool.kind".into(),
            expected: "\"in_process\" (the only backend this build supports)",
            value: "shared".into(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.sandbox.capacity()
    }

    pub fn queue_len(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Blocks until a slot is free or `timeout` elapses. `None` blocks
    /// forever. Returns a terminal error if the pool has been closed.
    pub async fn acquire(&self, timeout: Option<Duration>) -> WorkspaceResult<Slot> {
        let acquire_fut = self.acquire_inner();
        let permit = match timeout {
            Some(d) => tokio::time::timeout(d, acquire_fut)
                .await
                .map_err(|_| WorkspaceError::CacheNotWritable(self.sandbox_root_hint()))??,
            None => acquire_fut.await?,
        };

        let index = {
            let mut free = self.free.lock().await;
            free.pop_front()
                .expect("semaphore permit implies a free slot index")
        };
        let path = self.sandbox.acquire(index)?;
        Ok(Slot {
            index,
            path,
            _permit: permit,
        })
    }

    async fn acquire_inner(&self) -> WorkspaceResult<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WorkspaceError::CacheNotWritable(self.sandbox_root_hint())),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| WorkspaceError::CacheNotWritable(self.sandbox_root_hint()))
            }
        }
    }

    fn sandbox_root_hint(&self) -> PathBuf {
        PathBuf::from("worker pool closed or timed out")
    }

    /// Returns a slot to the free list. Idempotent: releasing an index
    /// already present in the free list is a no-op rather than corrupting
    /// the list, though the caller owning `Slot` should only do this once.
    pub async fn release(&self, slot: Slot) -> WorkspaceResult<()> {
        self.sandbox.release(slot.index)?;
        let mut free = self.free.lock().await;
        if !free.contains(&slot.index) {
            free.push_back(slot.index);
        }
        Ok(())
    }

    /// Drains the pool: cancels any pending acquirers and removes the
    /// sandbox root.
    pub fn close(&self) {
        self.cancel.cancel();
        self.sandbox.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_blocks_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::open(dir.path(), 1).unwrap();
        let first = pool.acquire(None).await.unwrap();
        assert_eq!(pool.queue_len(), 0);

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire(None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(first).await.unwrap();
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.index, 0);
    }

    #[tokio::test]
    async fn acquire_times_out_when_pool_is_saturated() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::open(dir.path(), 1).unwrap();
        let _held = pool.acquire(None).await.unwrap();
        let result = pool.acquire(Some(Duration::from_millis(10))).await;
        assert!(result.is_err());
    }
}
