use crate::sync::FrameIndex;
use std::collections::BTreeMap;
use std::ops::Range;

slotmap::new_key_type! { pub struct BufferId; }

/// A claim that the GPU may still be reading byte range `[range.start,
/// range.end)` of some buffer, tagged with the frame that issued it and
/// the fence that will retire it.
#[derive(Clone)]
pub struct BufferLock {
    pub buffer: BufferId,
    pub range: Range<u64>,
    pub frame: FrameIndex,
    /// Monotonically increasing sequence number, used to keep locks on
    /// the same buffer totally ordered by creation.
    pub sequence: u64,
}

/// Owns every outstanding lock, grouped per buffer. Locks older than
/// `max_frames_in_flight` are garbage-collected whenever [`LockManager::retire_frame`]
/// is called, matching the ring-retirement cadence of [`crate::sync::FenceRetireQueue`].
#[derive(Default)]
pub struct LockManager {
    by_buffer: BTreeMap<BufferId, Vec<BufferLock>>,
    next_sequence: u64,
}

impl LockManager {
    pub fn lock_range(&mut self, buffer: BufferId, range: Range<u64>, frame: FrameIndex) -> BufferLock {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let lock = BufferLock {
            buffer,
            range,
            frame,
            sequence,
        };
        self.by_buffer.entry(buffer).or_default().push(lock.clone());
        lock
    }

    /// Blocks (by repeatedly invoking `wait_fence`) until every lock
    /// overlapping `range` on `buffer` has retired.
    pub fn wait_for_locked_range(
        &mut self,
        buffer: BufferId,
        range: Range<u64>,
        mut wait_fence: impl FnMut(FrameIndex),
    ) {
        if let Some(locks) = self.by_buffer.get(&buffer) {
            let mut overlapping: Vec<&BufferLock> = locks
                .iter()
                .filter(|l| ranges_overlap(&l.range, &range))
                .collect();
            // Total order by creation frame, oldest first, so retirement
            // is requested in the same order the locks were created.
            overlapping.sort_by_key(|l| l.sequence);
            for lock in overlapping {
                wait_fence(lock.frame);
            }
        }
    }

    /// Drops locks whose creating frame is more than `max_frames_in_flight`
    /// behind `current_frame`; those fences are guaranteed retired.
    pub fn garbage_collect(&mut self, current_frame: FrameIndex, max_frames_in_flight: u64) {
        for locks in self.by_buffer.values_mut() {
            locks.retain(|l| current_frame.saturating_sub(l.frame) <= max_frames_in_flight);
        }
    }

    pub fn outstanding_for(&self, buffer: BufferId) -> usize {
        self.by_buffer.get(&buffer).map_or(0, Vec::len)
    }
}

fn ranges_overlap(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_are_totally_ordered_by_creation() {
        let mut mgr = LockManager::default();
        let buffer = BufferId::default();
        let l1 = mgr.lock_range(buffer, 0..16, 1);
        let l2 = mgr.lock_range(buffer, 8..24, 2);
        assert!(l1.sequence < l2.sequence);
        let mut order = Vec::new();
        mgr.wait_for_locked_range(buffer, 0..32, |frame| order.push(frame));
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn gc_drops_old_locks() {
        let mut mgr = LockManager::default();
        let buffer = BufferId::default();
        mgr.lock_range(buffer, 0..16, 1);
        mgr.lock_range(buffer, 0..16, 10);
        mgr.garbage_collect(10, 3);
        assert_eq!(mgr.outstanding_for(buffer), 1);
    }
}
