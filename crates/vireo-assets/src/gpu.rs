//! Marshaling work onto the GPU thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vireo_core::profiling::profile_function;

type GpuWork = Box<dyn FnOnce() -> bool + Send>;

/// A one-shot callback to be run on the GPU thread.
pub struct GpuJob {
    work: Mutex<Option<GpuWork>>,
    finished: AtomicBool,
    success: AtomicBool,
}

impl GpuJob {
    /// Wrap `work` in a job that can be submitted to the GPU thread.
    pub fn new(work: impl FnOnce() -> bool + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            work: Mutex::new(Some(Box::new(work))),
            finished: AtomicBool::new(false),
            success: AtomicBool::new(false),
        })
    }

    /// `true` once the job has run.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Result of the callback. Only meaningful once finished.
    pub fn success(&self) -> bool {
        self.success.load(Ordering::Acquire)
    }

    /// Run the callback if it has not run yet.
    pub(crate) fn run(&self) {
        let work = self.work.lock().take();
        if let Some(work) = work {
            let success = work();
            self.success.store(success, Ordering::Release);
            self.finished.store(true, Ordering::Release);
        }
    }

    /// Spin until the GPU thread has run the job, yielding between polls.
    /// Logs a warning once if that takes longer than `warn_after`.
    pub(crate) fn wait(&self, warn_after: Duration) -> bool {
        let start = Instant::now();
        let mut warned = false;
        while !self.is_finished() {
            if !warned && start.elapsed() > warn_after {
                warned = true;
                tracing::warn!(
                    waited_ms = start.elapsed().as_millis() as u64,
                    "Waiting on the GPU thread for a long time, is the main loop stepping the asset scheduler?"
                );
            }
            thread::yield_now();
        }
        self.success()
    }
}

/// Jobs waiting for the GPU thread.
#[derive(Default)]
pub(crate) struct GpuJobQueue {
    jobs: Mutex<Vec<Arc<GpuJob>>>,
}

impl GpuJobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn submit(&self, job: Arc<GpuJob>) {
        self.jobs.lock().push(job);
    }

    /// Run every queued job. Jobs submitted while draining wait for the next
    /// drain. Returns the number of jobs run.
    pub(crate) fn drain(&self) -> usize {
        profile_function!();
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for job in &jobs {
            job.run();
        }
        jobs.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}
