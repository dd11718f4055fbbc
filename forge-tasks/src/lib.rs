//! Worker-thread task pool with dependent-task accounting and cooperative
//! reentrant waits.
//!
//! A [`Task`] tracks how many children are still outstanding. [`wait`]
//! blocks the calling thread until a task's children finish, picking up
//! other queued work in the meantime instead of idling.

mod error;
mod parallel_for;
mod pool;
mod task;

pub use error::TaskPoolError;
pub use parallel_for::ParallelForDescriptor;
pub use pool::{TaskHandle, TaskPool, TaskPoolConfig};
pub use task::{TaskPriority, TASK_RING_SIZE};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn pool_drain_leaves_zero_running() {
        let pool = TaskPool::new(TaskPoolConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.spawn(TaskPriority::DontCare, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_for_all(true);
        assert_eq!(counter.load(Ordering::SeqCst), 64);
        assert_eq!(pool.running_task_count(), 0);
    }

    #[test]
    fn realtime_priority_runs_inline() {
        let pool = TaskPool::new(TaskPoolConfig::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        pool.spawn(TaskPriority::Realtime, move |_| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        // Realtime tasks are not threaded: the increment has already
        // happened by the time spawn() returns.
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
