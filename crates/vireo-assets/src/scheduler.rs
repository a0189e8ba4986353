//! The asset scheduler: registry, task queue, workers and the main-thread
//! step in one explicitly owned context.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use vireo_core::profiling::{profile_function, profile_scope};

use crate::config::SchedulerConfig;
use crate::error::AssetResult;
use crate::event::{LoadEvents, LoadSubscription};
use crate::fatal;
use crate::gpu::{GpuJob, GpuJobQueue};
use crate::io::AssetFiles;
use crate::queue::TaskQueue;
use crate::record::AssetHandle;
use crate::registry::AssetRegistry;
use crate::state::AssetState;
use crate::task::{ActionContext, AssetTask, TaskEntry, ThreadAffinity};
use crate::worker::{WorkerPool, is_worker_thread};

/// State shared between the scheduler and its workers.
pub(crate) struct Shared {
    pub(crate) registry: AssetRegistry,
    pub(crate) queue: TaskQueue,
    pub(crate) gpu: GpuJobQueue,
    pub(crate) events: LoadEvents,
    pub(crate) files: AssetFiles,
    pub(crate) config: SchedulerConfig,
    gpu_thread: ThreadId,
}

impl Shared {
    pub(crate) fn is_gpu_thread(&self) -> bool {
        thread::current().id() == self.gpu_thread
    }

    pub(crate) fn execute_on_gpu_thread(&self, f: impl FnOnce() -> bool + Send + 'static) -> bool {
        if self.is_gpu_thread() {
            return f();
        }
        let job = GpuJob::new(f);
        self.gpu.submit(job.clone());
        job.wait(self.config.gpu_wait_warning)
    }

    /// Run every queued GPU job and wake workers waiting on them.
    fn drain_gpu_jobs(&self) -> usize {
        let ran = self.gpu.drain();
        if ran > 0 {
            self.queue.notify_all();
        }
        ran
    }

    /// Advance a claimed task by at most one action, then hand it back to
    /// the queue or complete it.
    pub(crate) fn step_task(self: &Arc<Self>, mut entry: TaskEntry) {
        profile_function!();
        let Some(affinity) = entry.current_affinity() else {
            self.complete_task(entry);
            return;
        };
        let index = entry.action_curr;

        let success = if affinity == ThreadAffinity::Gpu && !self.is_gpu_thread() {
            match entry.gpu_job.as_ref().map(|job| job.is_finished()) {
                None => {
                    let job = self.action_job(&entry, index);
                    self.gpu.submit(job.clone());
                    entry.gpu_job = Some(job);
                    self.queue.return_task(entry);
                    return;
                }
                Some(false) => {
                    self.queue.return_task(entry);
                    return;
                }
                Some(true) => {
                    let success = entry.gpu_job.take().is_some_and(|job| job.success());
                    let complexity = entry.cell.lock().complexity.take();
                    if let Some(complexity) = complexity {
                        entry.set_complexity(complexity);
                    }
                    success
                }
            }
        } else {
            let mut cx = ActionContext::new(self, entry.priority);
            let success = {
                let mut cell = entry.cell.lock();
                match cell.body.as_mut() {
                    Some(body) => body.run_action(index, &mut cx, &entry.asset),
                    None => false,
                }
            };
            if let Some(complexity) = cx.take_complexity() {
                entry.set_complexity(complexity);
            }
            success
        };

        if success {
            entry.action_curr += 1;
        } else {
            self.fail_task(&mut entry, index);
        }

        if entry.is_complete() {
            self.complete_task(entry);
        } else {
            self.queue.return_task(entry);
        }
    }

    /// A GPU job that runs action `index` of the task on the GPU thread.
    fn action_job(self: &Arc<Self>, entry: &TaskEntry, index: usize) -> Arc<GpuJob> {
        let shared = Arc::clone(self);
        let cell = Arc::clone(&entry.cell);
        let asset = entry.asset.clone();
        let priority = entry.priority;
        GpuJob::new(move || {
            let mut cell = cell.lock();
            let mut cx = ActionContext::new(&shared, priority);
            let success = match cell.body.as_mut() {
                Some(body) => body.run_action(index, &mut cx, &asset),
                None => false,
            };
            if let Some(complexity) = cx.take_complexity() {
                cell.complexity = Some(complexity);
            }
            success
        })
    }

    fn fail_task(&self, entry: &mut TaskEntry, index: usize) {
        let asset = &entry.asset;
        if !asset.state().is_error() {
            asset.set_state(AssetState::Error);
        }
        if cfg!(debug_assertions) {
            tracing::warn!(
                asset = %asset.display_name(),
                ty = %asset.asset_type(),
                action = index,
                state = ?asset.state(),
                "Asset load action failed"
            );
        } else {
            tracing::warn!(asset = %asset.display_name(), "Asset load action failed");
        }

        if let Some(body) = entry.cell.lock().body.as_mut() {
            body.fail(&self.registry, asset);
        }
        entry.abort();
    }

    fn complete_task(&self, entry: TaskEntry) {
        let asset = entry.asset.clone();
        let body = entry.cell.lock().body.take();
        if let Some(body) = body {
            body.free(&self.registry, &asset);
        }

        if asset.state().is_loaded() {
            self.events.stage(&asset, &self.registry);
        }
        tracing::debug!(
            asset = %asset.display_name(),
            state = ?asset.state(),
            "Asset task complete"
        );

        self.queue.finish(entry.id);
        self.registry.release_threadsafe(&asset);
    }

    /// Free a task that will never run again.
    fn discard_task(&self, entry: TaskEntry) {
        let body = entry.cell.lock().body.take();
        if let Some(body) = body {
            body.free(&self.registry, &entry.asset);
        }
        self.registry.release_threadsafe(&entry.asset);
    }
}

/// Schedules multi-step asset loads across worker threads and the GPU
/// thread.
///
/// The thread that creates the scheduler becomes its GPU thread: it has to
/// call [`step`](AssetScheduler::step) once per frame, which runs GPU jobs,
/// destroys released assets and delivers load events.
///
/// # Example
///
/// ```ignore
/// let scheduler = AssetScheduler::new(SchedulerConfig::default())?;
/// let (lookup, texture) = scheduler.registry().find_or_create::<Texture>("stone.png");
/// if lookup.is_created() {
///     scheduler.enqueue(texture_load_task(&texture));
/// }
///
/// loop {
///     scheduler.step();
///     // render...
/// }
/// ```
pub struct AssetScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Option<WorkerPool>>,
    is_shut_down: AtomicBool,
}

impl AssetScheduler {
    /// Create a scheduler and start its worker threads.
    pub fn new(config: SchedulerConfig) -> AssetResult<Self> {
        let shared = Arc::new(Shared {
            registry: AssetRegistry::new(),
            queue: TaskQueue::new(),
            gpu: GpuJobQueue::new(),
            events: LoadEvents::new(),
            files: AssetFiles::new(&config.asset_root),
            gpu_thread: thread::current().id(),
            config,
        });

        let workers = if shared.config.is_single_threaded() {
            tracing::debug!("Asset scheduler running single-threaded");
            None
        } else {
            let work = {
                let shared = shared.clone();
                move || {
                    while let Some(entry) = shared.queue.wait_next() {
                        // A task that unwinds stays claimed forever.
                        let stepped =
                            panic::catch_unwind(AssertUnwindSafe(|| shared.step_task(entry)));
                        if stepped.is_err() {
                            tracing::error!("Asset action panicked on a worker thread, aborting");
                            std::process::abort();
                        }
                    }
                }
            };
            Some(WorkerPool::spawn(
                shared.config.worker_threads,
                &shared.config.thread_name_prefix,
                work,
                || shared.queue.shutdown(),
            )?)
        };

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            is_shut_down: AtomicBool::new(false),
        })
    }

    /// The registry that owns every asset record.
    pub fn registry(&self) -> &AssetRegistry {
        &self.shared.registry
    }

    /// File access rooted at [`SchedulerConfig::asset_root`].
    pub fn files(&self) -> &AssetFiles {
        &self.shared.files
    }

    /// The configuration the scheduler was created with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Number of running worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().as_ref().map_or(0, WorkerPool::thread_count)
    }

    /// `true` on the thread that created the scheduler.
    pub fn is_gpu_thread(&self) -> bool {
        self.shared.is_gpu_thread()
    }

    /// Queue a load task. The task holds a reference on its asset until it
    /// completes.
    pub fn enqueue(&self, task: AssetTask) {
        if self.is_shut_down.load(Ordering::Acquire) {
            tracing::warn!(asset = %task.asset.display_name(), "Task enqueued after shutdown, dropping it");
            task.body.free(&self.shared.registry, &task.asset);
            return;
        }
        if task.asset.state() == AssetState::None {
            task.asset.set_state(AssetState::Loading);
        }
        self.shared.queue.push(task, &self.shared.registry);
    }

    /// Per-frame main-thread update: destroys assets released off the main
    /// thread, runs queued GPU jobs, performs one task step when there are
    /// no workers and delivers load events.
    ///
    /// # Aborts
    ///
    /// Aborts the process when called from any thread other than the GPU thread.
    pub fn step(&self) {
        profile_function!();
        if !self.is_gpu_thread() {
            fatal!("AssetScheduler::step must be called from the GPU thread");
        }
        vireo_core::profiling::new_frame();

        self.shared.registry.flush_destroy_queue();
        self.shared.drain_gpu_jobs();

        if self.shared.config.is_single_threaded() {
            profile_scope!("single_threaded_task");
            if let Some(entry) = self.shared.queue.acquire_next() {
                self.shared.step_task(entry);
            }
        }

        self.shared.events.dispatch(&self.shared.registry);
    }

    /// Run `f` on the GPU thread and wait for its result. On the GPU thread
    /// itself `f` runs immediately.
    pub fn execute_on_gpu_thread(&self, f: impl FnOnce() -> bool + Send + 'static) -> bool {
        self.shared.execute_on_gpu_thread(f)
    }

    /// Number of GPU jobs waiting for the next step.
    pub fn pending_gpu_jobs(&self) -> usize {
        self.shared.gpu.len()
    }

    /// Pump the scheduler until `asset` reaches `min_state` or fails.
    ///
    /// # Aborts
    ///
    /// Aborts the process when called from a worker thread.
    pub fn block_until(&self, asset: &AssetHandle, min_state: AssetState) {
        self.block_while("block_until", || {
            let state = asset.state();
            state < min_state && !state.is_error()
        });
    }

    /// Pump the scheduler until no pending or active task has a priority at
    /// or below `max_priority`.
    ///
    /// # Aborts
    ///
    /// Aborts the process when called from a worker thread.
    pub fn block_for_priority(&self, max_priority: i32) {
        self.block_while("block_for_priority", || {
            self.shared.queue.current_priority() <= max_priority
        });
    }

    fn block_while(&self, name: &str, waiting: impl Fn() -> bool) {
        if is_worker_thread() {
            fatal!("AssetScheduler::{} called from an asset worker thread", name);
        }
        let on_gpu_thread = self.is_gpu_thread();
        while waiting() {
            if on_gpu_thread {
                self.step();
            }
            thread::yield_now();
        }
    }

    /// Subscribe to load events for `asset`. Fires right away if the asset
    /// is already loaded.
    pub fn on_load(
        &self,
        asset: &AssetHandle,
        callback: impl Fn(&AssetHandle) + Send + Sync + 'static,
    ) -> LoadSubscription {
        self.shared.events.on_load(asset, callback)
    }

    /// Remove one subscription, or all of them for `asset` when
    /// `subscription` is `None`.
    pub fn on_load_remove(&self, asset: &AssetHandle, subscription: Option<LoadSubscription>) -> usize {
        self.shared.events.on_load_remove(asset, subscription)
    }

    /// Total number of tasks ever enqueued.
    pub fn total_tasks(&self) -> u64 {
        self.shared.queue.total()
    }

    /// Number of tasks completed so far.
    pub fn current_task(&self) -> u64 {
        self.shared.queue.completed()
    }

    /// Most urgent priority among pending and active tasks, `i32::MAX` when
    /// idle.
    pub fn current_task_priority(&self) -> i32 {
        self.shared.queue.current_priority()
    }

    /// Tasks waiting to be claimed.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.pending_len()
    }

    /// Tasks currently claimed by a worker.
    pub fn active_tasks(&self) -> usize {
        self.shared.queue.active_len()
    }

    /// Stop the workers, free unfinished tasks and report leaked assets.
    /// Safe to call more than once; also runs on drop.
    ///
    /// # Aborts
    ///
    /// Aborts the process when the first shutdown happens off the GPU
    /// thread, including dropping the last handle to the scheduler inside an
    /// action.
    pub fn shutdown(&self) {
        if self.is_shut_down.load(Ordering::Acquire) {
            return;
        }
        if !self.is_gpu_thread() {
            let caller = if is_worker_thread() { "an asset worker" } else { "another thread" };
            fatal!("AssetScheduler must be shut down on the GPU thread (called from {})", caller);
        }
        if self.is_shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Shutting down asset scheduler");

        self.shared.queue.shutdown();
        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            workers.join(|| {
                self.shared.drain_gpu_jobs();
            });
        }

        let unfinished = self.shared.queue.drain_pending();
        if !unfinished.is_empty() {
            tracing::debug!("Discarding {} unfinished asset tasks", unfinished.len());
        }
        for entry in unfinished {
            self.shared.discard_task(entry);
        }
        // Jobs of discarded tasks find their body gone and just finish.
        self.shared.gpu.drain();

        self.shared.events.dispatch(&self.shared.registry);
        self.shared.events.clear(&self.shared.registry);
        self.shared.registry.flush_destroy_queue();

        self.shared.registry.report_leaks();
        tracing::debug!("Asset scheduler shutdown complete");
    }
}

impl Drop for AssetScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
