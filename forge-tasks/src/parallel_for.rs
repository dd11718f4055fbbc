use crate::task::TaskPriority;
use crate::pool::TaskPool;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mirrors the fields the original engine's `parallel_for` call site
/// fills in: how to split the range, whether the caller participates,
/// and whether it waits.
#[derive(Clone, Copy)]
pub struct ParallelForDescriptor {
    pub iter_count: usize,
    pub partition_size: usize,
    pub priority: TaskPriority,
    pub wait_for_finish: bool,
    pub use_current_thread: bool,
    pub allow_pool_idle: bool,
    pub allow_run_in_idle: bool,
}

impl Default for ParallelForDescriptor {
    fn default() -> Self {
        Self {
            iter_count: 0,
            partition_size: 1,
            priority: TaskPriority::DontCare,
            wait_for_finish: true,
            use_current_thread: true,
            allow_pool_idle: true,
            allow_run_in_idle: true,
        }
    }
}

struct Completion {
    remaining: AtomicUsize,
    lock: Mutex<()>,
    cv: Condvar,
}

impl TaskPool {
    /// Partitions `[0, descriptor.iter_count)` and invokes `body(i)`
    /// exactly once per index. With `use_current_thread`, one partition
    /// runs inline before any waiting begins.
    pub fn parallel_for<F>(&self, descriptor: ParallelForDescriptor, body: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if descriptor.iter_count == 0 {
            return;
        }
        let partition_size = descriptor.partition_size.max(1);
        let body = Arc::new(body);

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        while start < descriptor.iter_count {
            let end = (start + partition_size).min(descriptor.iter_count);
            ranges.push((start, end));
            start = end;
        }

        let mut inline_range = None;
        if descriptor.use_current_thread {
            inline_range = ranges.pop();
        }

        let completion = Arc::new(Completion {
            remaining: AtomicUsize::new(ranges.len()),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        });

        for (lo, hi) in ranges {
            let body = Arc::clone(&body);
            let completion = Arc::clone(&completion);
            self.spawn_with_parent(None, descriptor.priority, move |_| {
                for i in lo..hi {
                    body(i);
                }
            }, Some(Box::new(move || {
                if completion.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let _guard = completion.lock.lock();
                    completion.cv.notify_all();
                }
            })), descriptor.allow_run_in_idle);
        }

        if let Some((lo, hi)) = inline_range {
            for i in lo..hi {
                body(i);
            }
        }

        if descriptor.wait_for_finish {
            loop {
                self.flush_callback_queue();
                if completion.remaining.load(Ordering::Acquire) == 0 {
                    break;
                }
                if descriptor.allow_pool_idle {
                    let mut guard = completion.lock.lock();
                    if completion.remaining.load(Ordering::Acquire) == 0 {
                        break;
                    }
                    completion
                        .cv
                        .wait_for(&mut guard, std::time::Duration::from_millis(2));
                } else {
                    std::thread::yield_now();
                }
            }
        }
    }
}
