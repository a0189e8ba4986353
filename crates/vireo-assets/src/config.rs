//! Scheduler configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an [`AssetScheduler`](crate::AssetScheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads. `0` runs every task step on the main
    /// thread, one per [`step`](crate::AssetScheduler::step).
    pub worker_threads: usize,
    /// How long a caller may wait on a GPU job before a warning is logged.
    pub gpu_wait_warning: Duration,
    /// Directory relative file paths are resolved against.
    pub asset_root: PathBuf,
    /// Worker threads are named `{prefix}-{i}`.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            // Leave one core for the main thread
            worker_threads: num_cpus::get().saturating_sub(1).max(1),
            gpu_wait_warning: Duration::from_secs(2),
            asset_root: PathBuf::from("assets"),
            thread_name_prefix: "vireo-asset".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Run everything on the main thread.
    pub fn single_threaded() -> Self {
        Self::default().with_worker_threads(0)
    }

    /// Number of worker threads. Zero runs every task step on the GPU thread.
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// How long a worker waits on a GPU job before logging a warning.
    pub fn with_gpu_wait_warning(mut self, gpu_wait_warning: Duration) -> Self {
        self.gpu_wait_warning = gpu_wait_warning;
        self
    }

    /// Directory that relative asset paths are resolved against.
    pub fn with_asset_root(mut self, asset_root: impl Into<PathBuf>) -> Self {
        self.asset_root = asset_root.into();
        self
    }

    /// Prefix for worker thread names; workers are named `{prefix}-{index}`.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// `true` when there are no worker threads.
    pub fn is_single_threaded(&self) -> bool {
        self.worker_threads == 0
    }
}
