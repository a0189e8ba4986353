//! The pending and active task lists.

use parking_lot::{Condvar, Mutex};

use crate::registry::AssetRegistry;
use crate::task::{AssetTask, TaskEntry};

#[derive(Debug, Clone, Copy)]
struct ActiveTask {
    id: u64,
    priority: i32,
}

#[derive(Default)]
struct QueueState {
    /// Sorted by `sort`, most urgent first.
    pending: Vec<TaskEntry>,
    /// Tasks currently claimed by a worker.
    active: Vec<ActiveTask>,
    shutdown: bool,
    next_id: u64,
    total: u64,
    completed: u64,
}

impl QueueState {
    fn acquire(&mut self) -> Option<TaskEntry> {
        let index = self.pending.iter().position(TaskEntry::is_runnable)?;
        let entry = self.pending.remove(index);
        self.active.push(ActiveTask {
            id: entry.id,
            priority: entry.priority,
        });
        Some(entry)
    }

    fn deactivate(&mut self, id: u64) {
        if let Some(index) = self.active.iter().position(|task| task.id == id) {
            self.active.swap_remove(index);
        }
    }
}

/// Priority-ordered task queue shared by the workers.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        }
    }

    /// Insert a task in sort order, behind tasks with an equal key. Takes a
    /// reference on the task's asset for as long as the task lives.
    pub(crate) fn push(&self, task: AssetTask, registry: &AssetRegistry) -> u64 {
        registry.addref(&task.asset);

        let mut state = self.state.lock();
        state.next_id += 1;
        state.total += 1;
        let entry = TaskEntry::new(state.next_id, task);
        let id = entry.id;

        tracing::trace!(
            asset = %entry.asset.display_name(),
            priority = entry.priority,
            complexity = entry.complexity,
            actions = entry.action_count(),
            "Enqueued asset task"
        );

        let index = state.pending.partition_point(|other| other.sort <= entry.sort);
        state.pending.insert(index, entry);

        if state.pending.len() == 1 {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
        id
    }

    /// Claim the most urgent task a worker can make progress on.
    ///
    /// Tasks whose GPU job is still outstanding are skipped.
    pub(crate) fn acquire_next(&self) -> Option<TaskEntry> {
        self.state.lock().acquire()
    }

    /// Block until a task can be claimed. Returns `None` once the queue is
    /// shut down.
    pub(crate) fn wait_next(&self) -> Option<TaskEntry> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(entry) = state.acquire() {
                return Some(entry);
            }
            self.cond.wait(&mut state);
        }
    }

    /// Put a partially advanced task back at the front of the pending list.
    pub(crate) fn return_task(&self, entry: TaskEntry) {
        let mut state = self.state.lock();
        state.deactivate(entry.id);
        state.pending.insert(0, entry);
        self.cond.notify_all();
    }

    /// Mark a claimed task as done.
    pub(crate) fn finish(&self, id: u64) {
        let mut state = self.state.lock();
        state.deactivate(id);
        state.completed += 1;
    }

    /// Wake every waiting worker, e.g. after GPU jobs finished.
    pub(crate) fn notify_all(&self) {
        // Taking the lock orders this wakeup after any worker that is
        // between its runnable check and `wait`.
        let _state = self.state.lock();
        self.cond.notify_all();
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.cond.notify_all();
    }

    /// Remove and return every pending task.
    pub(crate) fn drain_pending(&self) -> Vec<TaskEntry> {
        std::mem::take(&mut self.state.lock().pending)
    }

    /// Most urgent priority among pending and active tasks, `i32::MAX` when
    /// there are none.
    pub(crate) fn current_priority(&self) -> i32 {
        let state = self.state.lock();
        let pending = state.pending.iter().map(|entry| entry.priority);
        let active = state.active.iter().map(|task| task.priority);
        pending.chain(active).min().unwrap_or(i32::MAX)
    }

    pub(crate) fn total(&self) -> u64 {
        self.state.lock().total
    }

    pub(crate) fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub(crate) fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuJob;
    use crate::record::{AssetHandle, AssetKind};
    use crate::state::AssetType;
    use crate::task::ThreadAffinity;

    #[derive(Default)]
    struct TestMesh;

    impl AssetKind for TestMesh {
        const TYPE: AssetType = AssetType::Mesh;
    }

    fn task(asset: &AssetHandle, priority: i32, complexity: i32, affinity: ThreadAffinity) -> AssetTask {
        AssetTask::builder(asset, ())
            .priority(priority)
            .complexity(complexity)
            .action(affinity, |_, _, _| true)
            .build()
    }

    #[test]
    fn test_push_takes_reference() {
        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestMesh>("cube");
        let queue = TaskQueue::new();
        queue.push(task(&asset, 0, 0, ThreadAffinity::Worker), &registry);
        assert_eq!(asset.refs(), 2);
        assert_eq!(queue.total(), 1);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_acquire_in_sort_order() {
        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestMesh>("cube");
        let queue = TaskQueue::new();
        let slow = queue.push(task(&asset, 1, 500, ThreadAffinity::Worker), &registry);
        let urgent = queue.push(task(&asset, 0, 900, ThreadAffinity::Worker), &registry);
        let cheap = queue.push(task(&asset, 1, 10, ThreadAffinity::Worker), &registry);
        let later = queue.push(task(&asset, 1, 10, ThreadAffinity::Worker), &registry);

        let order: Vec<u64> = std::iter::from_fn(|| queue.acquire_next().map(|e| e.id)).collect();
        // Equal keys stay in insertion order
        assert_eq!(order, vec![urgent, cheap, later, slow]);
        assert_eq!(queue.active_len(), 4);
    }

    #[test]
    fn test_acquire_skips_outstanding_gpu_job() {
        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestMesh>("cube");
        let queue = TaskQueue::new();
        queue.push(task(&asset, 0, 0, ThreadAffinity::Gpu), &registry);
        queue.push(task(&asset, 5, 0, ThreadAffinity::Worker), &registry);

        let mut gpu_task = queue.acquire_next().unwrap();
        assert_eq!(gpu_task.priority, 0);
        let job = GpuJob::new(|| true);
        gpu_task.gpu_job = Some(job.clone());
        queue.return_task(gpu_task);

        let next = queue.acquire_next().unwrap();
        assert_eq!(next.priority, 5);
        assert!(queue.acquire_next().is_none());

        job.run();
        let resumed = queue.acquire_next().unwrap();
        assert_eq!(resumed.priority, 0);
    }

    #[test]
    fn test_return_task_goes_to_front() {
        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestMesh>("cube");
        let queue = TaskQueue::new();
        queue.push(task(&asset, 3, 0, ThreadAffinity::Worker), &registry);
        queue.push(task(&asset, 1, 0, ThreadAffinity::Worker), &registry);

        let first = queue.acquire_next().unwrap();
        let id = first.id;
        assert_eq!(queue.active_len(), 1);
        queue.return_task(first);
        assert_eq!(queue.active_len(), 0);
        assert_eq!(queue.acquire_next().unwrap().id, id);
    }

    #[test]
    fn test_priority_and_counters() {
        let registry = AssetRegistry::new();
        let (_, asset) = registry.find_or_create::<TestMesh>("cube");
        let queue = TaskQueue::new();
        assert_eq!(queue.current_priority(), i32::MAX);

        queue.push(task(&asset, 7, 0, ThreadAffinity::Worker), &registry);
        queue.push(task(&asset, 2, 0, ThreadAffinity::Worker), &registry);
        assert_eq!(queue.current_priority(), 2);

        // Active tasks still count
        let urgent = queue.acquire_next().unwrap();
        assert_eq!(queue.current_priority(), 2);
        queue.finish(urgent.id);
        assert_eq!(queue.current_priority(), 7);
        assert_eq!(queue.completed(), 1);
        assert_eq!(queue.total(), 2);

        assert_eq!(queue.drain_pending().len(), 1);
        assert_eq!(queue.current_priority(), i32::MAX);
    }

    #[test]
    fn test_wait_next_returns_none_after_shutdown() {
        let queue = std::sync::Arc::new(TaskQueue::new());
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.wait_next().is_none())
        };
        queue.shutdown();
        assert!(waiter.join().unwrap());
    }
}
