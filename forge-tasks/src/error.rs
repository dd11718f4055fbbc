#[derive(Debug, thiserror::Error)]
pub enum TaskPoolError {
    #[error("task ring exhausted on worker {worker} after {retries} retries")]
    SlotRingExhausted { worker: usize, retries: u32 },
    #[error("task queue is closed, pool is shutting down")]
    QueueClosed,
}
