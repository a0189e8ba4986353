//! Worker threads.

use std::cell::Cell;
use std::sync::Arc;
use std::thread;

use crate::error::{AssetError, AssetResult};

thread_local! {
    static IS_ASSET_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// `true` when called from one of the scheduler's worker threads.
pub fn is_worker_thread() -> bool {
    IS_ASSET_WORKER.with(Cell::get)
}

/// A fixed set of long-lived threads all running the same work loop.
pub(crate) struct WorkerPool {
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` threads named `{prefix}-{i}`, each running `work` until
    /// it returns.
    ///
    /// If a thread fails to start, `abort` is called to make the threads
    /// already running return, they are joined, and the error is returned.
    pub(crate) fn spawn(
        count: usize,
        prefix: &str,
        work: impl Fn() + Send + Sync + 'static,
        abort: impl Fn(),
    ) -> AssetResult<Self> {
        let work = Arc::new(work);
        let mut threads = Vec::with_capacity(count);

        for i in 0..count {
            let work = work.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", prefix, i))
                .spawn(move || {
                    IS_ASSET_WORKER.with(|flag| flag.set(true));
                    tracing::debug!("Asset worker started");
                    work();
                    tracing::debug!("Asset worker stopped");
                });

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(source) => {
                    tracing::error!("Failed to spawn asset worker {}: {}", i, source);
                    abort();
                    Self { threads }.join(|| {});
                    return Err(AssetError::ThreadSpawn { source });
                }
            }
        }

        tracing::debug!("Asset worker pool created with {} threads", count);
        Ok(Self { threads })
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Wait for every thread to exit, calling `pump` while waiting. Workers
    /// may be blocked on something only the joining thread can provide.
    pub(crate) fn join(mut self, pump: impl Fn()) {
        let threads = std::mem::take(&mut self.threads);
        for handle in threads {
            while !handle.is_finished() {
                pump();
                thread::yield_now();
            }
            if let Err(e) = handle.join() {
                tracing::error!("Asset worker thread panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_spawn_and_join() {
        let ran = Arc::new(AtomicUsize::new(0));
        let pool = {
            let ran = ran.clone();
            WorkerPool::spawn(
                3,
                "test-worker",
                move || {
                    assert!(is_worker_thread());
                    assert!(thread::current().name().unwrap().starts_with("test-worker-"));
                    ran.fetch_add(1, Ordering::SeqCst);
                },
                || {},
            )
            .unwrap()
        };
        assert_eq!(pool.thread_count(), 3);
        pool.join(|| {});
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(!is_worker_thread());
    }

    #[test]
    fn test_join_pumps_while_waiting() {
        let released = Arc::new(AtomicBool::new(false));
        let pool = {
            let released = released.clone();
            WorkerPool::spawn(
                1,
                "test-pump",
                move || {
                    while !released.load(Ordering::Acquire) {
                        thread::yield_now();
                    }
                },
                || {},
            )
            .unwrap()
        };
        // The worker only exits once the joining thread pumps
        pool.join(|| released.store(true, Ordering::Release));
    }
}
