//! Multi-step load tasks.
//!
//! A task is an ordered list of actions targeting one asset. Each action is
//! tagged with the thread it has to run on: any worker, or the single GPU
//! thread that owns the graphics context.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AssetResult;
use crate::gpu::GpuJob;
use crate::io::AssetFiles;
use crate::record::AssetHandle;
use crate::registry::AssetRegistry;
use crate::scheduler::Shared;

/// Which thread an action has to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadAffinity {
    /// Any worker thread.
    #[default]
    Worker,
    /// The GPU thread. Workers hand these off as GPU jobs.
    Gpu,
}

/// Combine a priority and a complexity estimate into a single ordering key.
///
/// Priority occupies the high 32 bits and dominates; complexity is clamped
/// to `0..=i32::MAX` and breaks ties, cheaper first.
pub fn sort_key(priority: i32, complexity: i32) -> i64 {
    ((priority as i64) << 32) | complexity.max(0) as i64
}

type ActionFn<D> = dyn Fn(&mut ActionContext<'_>, &AssetHandle, &mut D) -> bool + Send;
type FailureFn<D> = dyn FnMut(&AssetRegistry, &AssetHandle, &mut D) + Send;
type FreeFn<D> = dyn FnOnce(&AssetRegistry, &AssetHandle, D) + Send;

/// One step of a task.
pub struct LoadAction<D> {
    affinity: ThreadAffinity,
    func: Box<ActionFn<D>>,
}

impl<D> LoadAction<D> {
    /// Create an action that runs on threads of the given affinity.
    pub fn new(
        affinity: ThreadAffinity,
        func: impl Fn(&mut ActionContext<'_>, &AssetHandle, &mut D) -> bool + Send + 'static,
    ) -> Self {
        Self {
            affinity,
            func: Box::new(func),
        }
    }

    /// The thread this action must run on.
    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }
}

impl<D> fmt::Debug for LoadAction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadAction")
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

/// The typed parts of a task behind a uniform interface.
pub(crate) trait TaskBody: Send {
    fn run_action(&mut self, index: usize, cx: &mut ActionContext<'_>, asset: &AssetHandle) -> bool;

    fn fail(&mut self, registry: &AssetRegistry, asset: &AssetHandle);

    fn free(self: Box<Self>, registry: &AssetRegistry, asset: &AssetHandle);
}

struct TypedTask<D> {
    actions: Vec<LoadAction<D>>,
    data: D,
    on_failure: Option<Box<FailureFn<D>>>,
    free_data: Option<Box<FreeFn<D>>>,
}

impl<D: Send + 'static> TaskBody for TypedTask<D> {
    fn run_action(&mut self, index: usize, cx: &mut ActionContext<'_>, asset: &AssetHandle) -> bool {
        match self.actions.get(index) {
            Some(action) => (action.func)(cx, asset, &mut self.data),
            None => false,
        }
    }

    fn fail(&mut self, registry: &AssetRegistry, asset: &AssetHandle) {
        if let Some(on_failure) = &mut self.on_failure {
            on_failure(registry, asset, &mut self.data);
        }
    }

    fn free(self: Box<Self>, registry: &AssetRegistry, asset: &AssetHandle) {
        let TypedTask { data, free_data, .. } = *self;
        if let Some(free_data) = free_data {
            free_data(registry, asset, data);
        }
    }
}

/// A load task ready to be handed to
/// [`AssetScheduler::enqueue`](crate::AssetScheduler::enqueue).
///
/// # Example
///
/// ```ignore
/// let task = AssetTask::builder(&texture, TextureLoad::default())
///     .priority(10)
///     .action(ThreadAffinity::Worker, |cx, _, load| {
///         load.bytes = cx.read_file("stone.png").ok();
///         load.bytes.is_some()
///     })
///     .action(ThreadAffinity::Gpu, |_, asset, load| upload(asset, load))
///     .build();
/// scheduler.enqueue(task);
/// ```
pub struct AssetTask {
    pub(crate) asset: AssetHandle,
    pub(crate) priority: i32,
    pub(crate) complexity: i32,
    pub(crate) affinities: Box<[ThreadAffinity]>,
    pub(crate) body: Box<dyn TaskBody>,
}

impl AssetTask {
    /// Start building a task for `asset` that carries `data` between its
    /// actions.
    pub fn builder<D: Send + 'static>(asset: &AssetHandle, data: D) -> TaskBuilder<D> {
        TaskBuilder {
            asset: asset.clone(),
            data,
            priority: 0,
            complexity: 0,
            actions: Vec::new(),
            on_failure: None,
            free_data: None,
        }
    }

    /// The asset this task loads.
    pub fn asset(&self) -> &AssetHandle {
        &self.asset
    }

    /// Scheduling priority; lower values run first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Estimated cost, used to order tasks of equal priority.
    pub fn complexity(&self) -> i32 {
        self.complexity
    }

    /// Number of actions in the task.
    pub fn action_count(&self) -> usize {
        self.affinities.len()
    }

    /// Queue ordering key, see [`sort_key`].
    pub fn sort_key(&self) -> i64 {
        sort_key(self.priority, self.complexity)
    }
}

impl fmt::Debug for AssetTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetTask")
            .field("asset", &self.asset.display_name())
            .field("priority", &self.priority)
            .field("complexity", &self.complexity)
            .field("affinities", &self.affinities)
            .finish()
    }
}

/// Builder for [`AssetTask`].
pub struct TaskBuilder<D> {
    asset: AssetHandle,
    data: D,
    priority: i32,
    complexity: i32,
    actions: Vec<LoadAction<D>>,
    on_failure: Option<Box<FailureFn<D>>>,
    free_data: Option<Box<FreeFn<D>>>,
}

impl<D: Send + 'static> TaskBuilder<D> {
    /// Scheduling priority; lower values run sooner. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Estimated cost, used to order tasks of equal priority. Defaults to 0.
    pub fn complexity(mut self, complexity: i32) -> Self {
        self.complexity = complexity;
        self
    }

    /// Append an action.
    pub fn action(
        mut self,
        affinity: ThreadAffinity,
        func: impl Fn(&mut ActionContext<'_>, &AssetHandle, &mut D) -> bool + Send + 'static,
    ) -> Self {
        self.actions.push(LoadAction::new(affinity, func));
        self
    }

    /// Append a prebuilt action.
    pub fn push_action(mut self, action: LoadAction<D>) -> Self {
        self.actions.push(action);
        self
    }

    /// Called once if any action fails, before the task is freed. Typically
    /// points the asset at a fallback.
    pub fn on_failure(
        mut self,
        on_failure: impl FnMut(&AssetRegistry, &AssetHandle, &mut D) + Send + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(on_failure));
        self
    }

    /// Called exactly once with the load data when the task ends, whether it
    /// succeeded or not. Without it the data is simply dropped.
    pub fn free_data(
        mut self,
        free_data: impl FnOnce(&AssetRegistry, &AssetHandle, D) + Send + 'static,
    ) -> Self {
        self.free_data = Some(Box::new(free_data));
        self
    }

    /// Finish the task, ready for
    /// [`AssetScheduler::enqueue`](crate::AssetScheduler::enqueue).
    pub fn build(self) -> AssetTask {
        let affinities = self.actions.iter().map(LoadAction::affinity).collect();
        AssetTask {
            asset: self.asset,
            priority: self.priority,
            complexity: self.complexity,
            affinities,
            body: Box::new(TypedTask {
                actions: self.actions,
                data: self.data,
                on_failure: self.on_failure,
                free_data: self.free_data,
            }),
        }
    }
}

/// The mutable half of a task, shared with its in-flight GPU job.
pub(crate) struct TaskCell {
    pub(crate) body: Option<Box<dyn TaskBody>>,
    /// Complexity reported by an action that ran as a GPU job.
    pub(crate) complexity: Option<i32>,
}

/// A task as tracked by the queue.
pub(crate) struct TaskEntry {
    pub(crate) id: u64,
    pub(crate) asset: AssetHandle,
    pub(crate) affinities: Box<[ThreadAffinity]>,
    pub(crate) action_curr: usize,
    pub(crate) priority: i32,
    pub(crate) complexity: i32,
    pub(crate) sort: i64,
    pub(crate) gpu_job: Option<Arc<GpuJob>>,
    pub(crate) cell: Arc<Mutex<TaskCell>>,
}

impl TaskEntry {
    pub(crate) fn new(id: u64, task: AssetTask) -> Self {
        Self {
            id,
            sort: task.sort_key(),
            asset: task.asset,
            affinities: task.affinities,
            action_curr: 0,
            priority: task.priority,
            complexity: task.complexity,
            gpu_job: None,
            cell: Arc::new(Mutex::new(TaskCell {
                body: Some(task.body),
                complexity: None,
            })),
        }
    }

    pub(crate) fn action_count(&self) -> usize {
        self.affinities.len()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.action_curr >= self.action_count()
    }

    pub(crate) fn current_affinity(&self) -> Option<ThreadAffinity> {
        self.affinities.get(self.action_curr).copied()
    }

    /// Whether a worker can make progress on this task right now.
    pub(crate) fn is_runnable(&self) -> bool {
        match self.current_affinity() {
            Some(ThreadAffinity::Gpu) => self.gpu_job.as_ref().is_none_or(|job| job.is_finished()),
            _ => true,
        }
    }

    pub(crate) fn set_complexity(&mut self, complexity: i32) {
        self.complexity = complexity;
        self.sort = sort_key(self.priority, complexity);
    }

    /// Jump to the end; the next step completes the task.
    pub(crate) fn abort(&mut self) {
        self.action_curr = self.action_count();
    }
}

/// What an action can reach while it runs.
pub struct ActionContext<'a> {
    shared: &'a Shared,
    priority: i32,
    complexity: Option<i32>,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(shared: &'a Shared, priority: i32) -> Self {
        Self {
            shared,
            priority,
            complexity: None,
        }
    }

    /// The scheduler's asset registry.
    pub fn registry(&self) -> &AssetRegistry {
        &self.shared.registry
    }

    /// File access rooted at the configured asset root.
    pub fn files(&self) -> &AssetFiles {
        &self.shared.files
    }

    /// Priority of the running task.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Update the cost estimate of the running task. Takes effect once the
    /// action returns.
    pub fn set_complexity(&mut self, complexity: i32) {
        self.complexity = Some(complexity);
    }

    pub(crate) fn take_complexity(&mut self) -> Option<i32> {
        self.complexity.take()
    }

    /// Read a file relative to the asset root.
    pub fn read_file(&self, path: impl AsRef<Path>) -> AssetResult<Vec<u8>> {
        self.shared.files.read(path)
    }

    /// Run `f` on the GPU thread and wait for its result.
    pub fn execute_on_gpu_thread(&self, f: impl FnOnce() -> bool + Send + 'static) -> bool {
        self.shared.execute_on_gpu_thread(f)
    }

    /// `true` if the action is running on the GPU thread.
    pub fn is_gpu_thread(&self) -> bool {
        self.shared.is_gpu_thread()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AssetKind;
    use crate::state::AssetType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestSound;

    impl AssetKind for TestSound {
        const TYPE: AssetType = AssetType::Sound;
    }

    #[test]
    fn test_sort_key_ordering() {
        // Priority dominates
        assert!(sort_key(0, 1_000_000) < sort_key(1, 0));
        assert!(sort_key(-5, i32::MAX) < sort_key(-4, 0));
        // Complexity breaks ties, cheaper first
        assert!(sort_key(3, 10) < sort_key(3, 11));
        // Negative complexity is clamped
        assert_eq!(sort_key(2, -7), sort_key(2, 0));
    }

    #[test]
    fn test_builder() {
        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestSound>("beep.wav");
        let task = AssetTask::builder(&asset, 0u32)
            .priority(4)
            .complexity(100)
            .action(ThreadAffinity::Worker, |_, _, _| true)
            .action(ThreadAffinity::Gpu, |_, _, _| true)
            .build();

        assert_eq!(task.asset(), &asset);
        assert_eq!(task.priority(), 4);
        assert_eq!(task.complexity(), 100);
        assert_eq!(task.action_count(), 2);
        assert_eq!(&*task.affinities, &[ThreadAffinity::Worker, ThreadAffinity::Gpu]);
        assert_eq!(task.sort_key(), sort_key(4, 100));
    }

    #[test]
    fn test_entry_progress() {
        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestSound>("beep.wav");
        let task = AssetTask::builder(&asset, ())
            .action(ThreadAffinity::Gpu, |_, _, _| true)
            .action(ThreadAffinity::Worker, |_, _, _| true)
            .build();
        let mut entry = TaskEntry::new(1, task);

        assert_eq!(entry.current_affinity(), Some(ThreadAffinity::Gpu));
        assert!(entry.is_runnable());

        entry.gpu_job = Some(GpuJob::new(|| true));
        assert!(!entry.is_runnable());
        entry.gpu_job.as_ref().unwrap().run();
        assert!(entry.is_runnable());

        entry.set_complexity(9);
        assert_eq!(entry.sort, sort_key(0, 9));

        entry.abort();
        assert!(entry.is_complete());
        assert_eq!(entry.current_affinity(), None);
    }

    #[test]
    fn test_body_hooks() {
        static FREED: AtomicUsize = AtomicUsize::new(0);

        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestSound>("beep.wav");
        let task = AssetTask::builder(&asset, vec![1u8, 2, 3])
            .on_failure(|_, _, data| data.clear())
            .free_data(|_, _, data| {
                FREED.fetch_add(data.len() + 1, Ordering::SeqCst);
            })
            .build();

        let mut body = task.body;
        body.fail(&registry, &asset);
        body.free(&registry, &asset);
        // The failure hook emptied the data before it was freed
        assert_eq!(FREED.load(Ordering::SeqCst), 1);
    }
}
