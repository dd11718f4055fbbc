use crate::task::{next_task_id, TaskInner, TaskPriority, TASK_RING_SIZE};
use crate::TaskPoolError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type Payload = Box<dyn FnOnce(&TaskHandle) + Send + 'static>;
type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// A reference to a task in flight. Held by callers that want to `wait`
/// on it; dropping it does not cancel the task.
#[derive(Clone)]
pub struct TaskHandle(pub(crate) Arc<TaskInner>);

impl TaskHandle {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    pub fn id(&self) -> u32 {
        self.0.id
    }
}

struct Job {
    task: Arc<TaskInner>,
    payload: Payload,
    on_complete: Option<(u32, CompletionCallback)>,
}

pub struct TaskPoolConfig {
    /// `None` picks `num_cpus::get().saturating_sub(1).max(1)`, matching
    /// the "leave one core for the caller" convention used by pooled
    /// renderers in this family.
    pub worker_count: Option<usize>,
    pub ring_size_per_worker: usize,
    pub thread_name_prefix: &'static str,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            ring_size_per_worker: TASK_RING_SIZE,
            thread_name_prefix: "forge-task-worker",
        }
    }
}

struct Shared {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    running: AtomicUsize,
    ring_in_flight: AtomicUsize,
    ring_capacity: usize,
    all_done: Condvar,
    all_done_lock: Mutex<()>,
    shutdown: AtomicBool,
    completed_tx: Sender<(u32, CompletionCallback)>,
    completed_rx: Receiver<(u32, CompletionCallback)>,
}

/// N-worker cooperative pool. Workers block-dequeue from a shared MPMC
/// queue; a caller blocked in [`TaskPool::wait`] picks up other queued
/// work instead of idling.
pub struct TaskPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    pub fn new(config: TaskPoolConfig) -> Self {
        let worker_count = config
            .worker_count
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1).max(1));
        let (sender, receiver) = crossbeam_channel::unbounded();
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            sender,
            receiver,
            running: AtomicUsize::new(0),
            ring_in_flight: AtomicUsize::new(0),
            ring_capacity: config.ring_size_per_worker * worker_count.max(1),
            all_done: Condvar::new(),
            all_done_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            completed_tx,
            completed_rx,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let shared = Arc::clone(&shared);
            let name = format!("{}-{idx}", config.thread_name_prefix);
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn task pool worker thread");
            workers.push(handle);
        }

        log::debug!("task pool started with {worker_count} workers");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    pub fn running_task_count(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Claims one ring slot, fatal (per spec) after a bounded retry count.
    fn claim_ring_slot(&self) -> Result<(), TaskPoolError> {
        const MAX_RETRIES: u32 = 64;
        for attempt in 0..MAX_RETRIES {
            let current = self.shared.ring_in_flight.load(Ordering::Acquire);
            if current >= self.shared.ring_capacity {
                std::thread::yield_now();
                continue;
            }
            if self
                .shared
                .ring_in_flight
                .compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(());
            }
            let _ = attempt;
        }
        Err(TaskPoolError::SlotRingExhausted {
            worker: 0,
            retries: MAX_RETRIES,
        })
    }

    fn release_ring_slot(&self) {
        self.shared.ring_in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Submits a unit of work with no parent and no completion callback.
    /// `Realtime` priority runs inline on the caller, never touching the
    /// queue.
    pub fn spawn<F>(&self, priority: TaskPriority, payload: F) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) + Send + 'static,
    {
        self.spawn_with_parent(None, priority, payload, None, true)
    }

    pub fn spawn_with_completion<F, C>(
        &self,
        priority: TaskPriority,
        payload: F,
        on_complete: C,
    ) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.spawn_with_parent(None, priority, payload, Some(Box::new(on_complete)), true)
    }

    /// `allow_in_idle` marks whether a thread that is cooperatively
    /// reentering the queue from [`Self::wait`]/[`Self::wait_for_all`]
    /// (rather than a dedicated worker) may run this job. Jobs that
    /// assume worker-thread-only execution should pass `false`.
    pub(crate) fn spawn_with_parent<F>(
        &self,
        parent: Option<Arc<TaskInner>>,
        priority: TaskPriority,
        payload: F,
        on_complete: Option<CompletionCallback>,
        allow_in_idle: bool,
    ) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) + Send + 'static,
    {
        if let Some(parent) = &parent {
            parent.unfinished_jobs.fetch_add(1, Ordering::AcqRel);
        }
        let task = Arc::new(TaskInner {
            parent,
            id: next_task_id(),
            unfinished_jobs: AtomicUsize::new(1),
            allow_in_idle,
        });

        if priority == TaskPriority::Realtime {
            // "not threaded": run inline, skip the ring and the queue.
            let handle = TaskHandle(Arc::clone(&task));
            payload(&handle);
            task.finish_one_job();
            if let Some(cb) = on_complete {
                cb();
            }
            return handle;
        }

        if let Err(err) = self.claim_ring_slot() {
            log::error!("{err}");
            panic!("{err}");
        }

        self.shared.running.fetch_add(1, Ordering::AcqRel);
        let job = Job {
            task: Arc::clone(&task),
            payload: Box::new(payload),
            on_complete: on_complete.map(|cb| (task.id, cb)),
        };
        if let Err(crossbeam_channel::SendError(job)) = self.shared.sender.send(job) {
            let err = TaskPoolError::QueueClosed;
            log::error!("{err}, running job {} inline as a fallback", job.task.id);
            self.release_ring_slot();
            self.shared.running.fetch_sub(1, Ordering::AcqRel);
            let handle = TaskHandle(Arc::clone(&job.task));
            (job.payload)(&handle);
            job.task.finish_one_job();
            if let Some((_, cb)) = job.on_complete {
                cb();
            }
            return handle;
        }
        TaskHandle(task)
    }

    /// Spawns a child of `parent`: `parent`'s child-count is incremented
    /// before the new task is queued, and `parent` is not considered
    /// finished until every such child also finishes. The public path to
    /// the dependent task trees `wait` cooperates with.
    pub fn spawn_child<F>(&self, parent: &TaskHandle, priority: TaskPriority, payload: F) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) + Send + 'static,
    {
        self.spawn_with_parent(Some(Arc::clone(&parent.0)), priority, payload, None, true)
    }

    pub fn spawn_child_with_completion<F, C>(
        &self,
        parent: &TaskHandle,
        priority: TaskPriority,
        payload: F,
        on_complete: C,
    ) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.spawn_with_parent(
            Some(Arc::clone(&parent.0)),
            priority,
            payload,
            Some(Box::new(on_complete)),
            true,
        )
    }

    /// Blocks until `handle` is finished, cooperatively running other
    /// queued work instead of idling. The calling thread is, by
    /// definition, not a dedicated worker while it waits here, so it
    /// only picks up jobs marked `allow_in_idle`.
    pub fn wait(&self, handle: &TaskHandle) {
        while !handle.is_finished() {
            if !self.run_one_queued_job(true) {
                // Queue was empty (or held only non-idle-eligible jobs);
                // avoid a hot spin.
                std::thread::sleep(Duration::from_micros(200));
            }
        }
    }

    /// Blocks until every outstanding task has completed. Only the
    /// thread that owns the pool (the driver thread) should call this.
    /// When `flush_callbacks` is set, drains `completed_rx` on the way
    /// out so the caller sees every completion callback run before this
    /// returns, rather than having to call [`Self::flush_callback_queue`]
    /// separately.
    pub fn wait_for_all(&self, flush_callbacks: bool) {
        let mut guard = self.shared.all_done_lock.lock();
        while self.shared.running.load(Ordering::Acquire) > 0 {
            if self.run_one_queued_job(true) {
                guard = self.shared.all_done_lock.lock();
                continue;
            }
            self.shared
                .all_done
                .wait_for(&mut guard, Duration::from_millis(2));
        }
        drop(guard);
        if flush_callbacks {
            self.flush_callback_queue();
        }
    }

    /// Drains completed-task callbacks and invokes them on the calling
    /// thread. Used by the owning thread to surface "done" work without
    /// a cross-thread call.
    pub fn flush_callback_queue(&self) {
        while let Ok((_id, cb)) = self.shared.completed_rx.try_recv() {
            cb();
        }
    }

    /// Tries to dequeue and run one job without blocking. Returns
    /// `false` if the queue was empty (or, with `require_idle_eligible`,
    /// held only jobs not marked safe to run from a waiting thread).
    ///
    /// This is the "thread is waiting, reschedule onto me" signal a
    /// reentrant [`Self::wait`]/[`Self::wait_for_all`] sends the queue:
    /// jobs it pulls out but skips are put back for a real worker to
    /// pick up, so nothing is lost, only reordered.
    fn run_one_queued_job(&self, require_idle_eligible: bool) -> bool {
        if !require_idle_eligible {
            return match self.shared.receiver.try_recv() {
                Ok(job) => {
                    self.execute(job);
                    true
                }
                Err(_) => false,
            };
        }

        let mut skipped = Vec::new();
        let eligible = loop {
            match self.shared.receiver.try_recv() {
                Ok(job) if job.task.allow_in_idle => break Some(job),
                Ok(job) => skipped.push(job),
                Err(_) => break None,
            }
        };
        for job in skipped {
            let _ = self.shared.sender.send(job);
        }
        match eligible {
            Some(job) => {
                self.execute(job);
                true
            }
            None => false,
        }
    }

    fn execute(&self, job: Job) {
        let handle = TaskHandle(Arc::clone(&job.task));
        (job.payload)(&handle);
        job.task.finish_one_job();
        self.release_ring_slot();
        self.shared.running.fetch_sub(1, Ordering::AcqRel);
        if let Some((id, cb)) = job.on_complete {
            let _ = self.shared.completed_tx.send((id, cb));
        }
        let _guard = self.shared.all_done_lock.lock();
        self.shared.all_done.notify_all();
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.wait_for_all(true);
        self.shared.shutdown.store(true, Ordering::Release);
        for worker in self.workers.get_mut().drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        match shared
            .receiver
            .recv_timeout(Duration::from_millis(50))
        {
            Ok(job) => {
                let handle = TaskHandle(Arc::clone(&job.task));
                (job.payload)(&handle);
                job.task.finish_one_job();
                shared.ring_in_flight.fetch_sub(1, Ordering::AcqRel);
                shared.running.fetch_sub(1, Ordering::AcqRel);
                if let Some((id, cb)) = job.on_complete {
                    let _ = shared.completed_tx.send((id, cb));
                }
                let _guard = shared.all_done_lock.lock();
                shared.all_done.notify_all();
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}
