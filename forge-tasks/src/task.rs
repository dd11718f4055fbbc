use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of in-flight task slots a single worker thread may claim before
/// allocation becomes fatal. Sized like the ring constants in the backend
/// caches (a generous power of two, not a tunable hot path).
pub const TASK_RING_SIZE: usize = 4096;

/// `DontCare` tasks are queued for any worker; `Realtime` tasks run inline
/// on the calling thread instead of being handed to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    DontCare,
    Realtime,
}

pub(crate) struct TaskInner {
    pub parent: Option<Arc<TaskInner>>,
    pub id: u32,
    pub unfinished_jobs: AtomicUsize,
    pub allow_in_idle: bool,
}

impl TaskInner {
    pub fn is_finished(&self) -> bool {
        self.unfinished_jobs.load(Ordering::Acquire) == 0
    }

    /// Decrements this task's own counter, then recurses to the parent.
    /// Mirrors the source's `FinishedJob` propagation: a child never
    /// leaves its parent's count decremented more than once.
    pub fn finish_one_job(self: &Arc<Self>) {
        let remaining = self.unfinished_jobs.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            if let Some(parent) = &self.parent {
                parent.finish_one_job();
            }
        }
    }
}

/// Monotonic per-pool task-id allocator, used only for completion-callback
/// correlation, not for ring slot identity.
pub(crate) static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) fn next_task_id() -> u32 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}
