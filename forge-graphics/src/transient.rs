use crate::lock::{BufferId, BufferLock, LockManager};
use crate::sync::FrameIndex;
use std::collections::HashMap;
use std::ops::Range;

/// How a transient buffer's binding is refreshed. `Persistent` is bound
/// once at creation (e.g. a large camera-uniform ring); `PerUse` is
/// rebound by the caller on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Persistent,
    PerUse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientUsage {
    Uniform,
    Storage,
    Vertex,
    Index,
    Staging,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFrequency {
    Once,
    Occasional,
    Frequent,
}

pub struct TransientBufferDescriptor {
    pub element_size: u64,
    pub element_count: u64,
    pub usage: TransientUsage,
    pub update_frequency: UpdateFrequency,
    pub binding_mode: BindingMode,
    pub label: &'static str,
}

/// One ring-backed, persistently-mapped GPU buffer with `R` frame slots.
/// Each slot is `element_count * element_size` bytes, rounded up to the
/// device's minimum alignment for `usage`.
pub struct TransientBuffer {
    pub id: BufferId,
    slot_stride: u64,
    slot_count: u64,
    write_index: u64,
    read_index: u64,
    /// Host-visible mirror backing `write_bytes`/`read_bytes`; the real
    /// backend replaces this with a persistently-mapped GPU pointer.
    storage: Vec<u8>,
    usage: TransientUsage,
    binding_mode: BindingMode,
    label: &'static str,
}

impl TransientBuffer {
    pub fn new(id: BufferId, descriptor: TransientBufferDescriptor, slot_count: u64, alignment: u64) -> Self {
        let raw_stride = descriptor.element_size * descriptor.element_count.max(1);
        let slot_stride = align_up(raw_stride, alignment);
        Self {
            id,
            slot_stride,
            slot_count,
            write_index: 0,
            read_index: 0,
            storage: vec![0u8; (slot_stride * slot_count) as usize],
            usage: descriptor.usage,
            binding_mode: descriptor.binding_mode,
            label: descriptor.label,
        }
    }

    pub fn current_write_slot(&self) -> u64 {
        self.write_index % self.slot_count
    }

    fn slot_offset(&self, slot: u64) -> u64 {
        slot * self.slot_stride
    }

    /// Writes into the current write slot, never blocking. Returns the
    /// absolute byte range written, tagged into a [`BufferLock`] by the
    /// caller (the allocator does not itself know the current frame).
    pub fn write_bytes(&mut self, offset_in_slot: u64, data: &[u8]) -> Range<u64> {
        assert!(
            offset_in_slot + data.len() as u64 <= self.slot_stride,
            "write for '{}' overflows a {}-byte transient slot",
            self.label,
            self.slot_stride
        );
        let base = self.slot_offset(self.current_write_slot()) + offset_in_slot;
        let start = base as usize;
        self.storage[start..start + data.len()].copy_from_slice(data);
        base..base + data.len() as u64
    }

    /// Reads back `range`, first blocking (via `wait_fence`, forwarded
    /// into [`crate::lock::LockManager::wait_for_locked_range`]) until
    /// every outstanding write lock overlapping it has retired, so the
    /// caller never observes a write still in flight on the GPU.
    pub fn read_bytes(
        &self,
        range: Range<u64>,
        locks: &mut LockManager,
        mut wait_fence: impl FnMut(FrameIndex),
    ) -> &[u8] {
        locks.wait_for_locked_range(self.id, range.clone(), &mut wait_fence);
        &self.storage[range.start as usize..range.end as usize]
    }

    /// Advances the write index at a frame boundary. The read index only
    /// advances once the backend confirms the matching fence retired.
    pub fn advance_write_index(&mut self) {
        self.write_index += 1;
        assert!(
            self.write_index - self.read_index <= self.slot_count,
            "transient buffer '{}' write index outran its {} ring slots",
            self.label,
            self.slot_count
        );
    }

    pub fn retire_read_slot(&mut self) {
        self.read_index += 1;
    }

    pub fn usage(&self) -> TransientUsage {
        self.usage
    }

    pub fn binding_mode(&self) -> BindingMode {
        self.binding_mode
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) / alignment * alignment
}

/// Uniform-block-sized write request keyed by reflected field name.
pub struct UniformWrite {
    pub name: &'static str,
    pub bytes: Vec<u8>,
}

/// Façade over a [`TransientBuffer`] of [`TransientUsage::Uniform`]:
/// accepts a set of named field writes matching a reflected block layout,
/// stages them into the ring, and returns the byte range to bind.
///
/// Supports sharing one staged block across multiple programs when their
/// reflected layouts are byte-identical (`shared_layout_key`).
pub struct UniformBlockUploader {
    layouts: HashMap<&'static str, Vec<(&'static str, Range<u64>)>>,
}

impl Default for UniformBlockUploader {
    fn default() -> Self {
        Self {
            layouts: HashMap::new(),
        }
    }
}

impl UniformBlockUploader {
    pub fn register_layout(&mut self, shared_layout_key: &'static str, fields: Vec<(&'static str, Range<u64>)>) {
        self.layouts.insert(shared_layout_key, fields);
    }

    /// Stages `writes` into `buffer`'s current slot according to
    /// `shared_layout_key`'s registered field offsets, and returns a
    /// [`BufferLock`] tagged to `frame` covering the whole block.
    pub fn upload(
        &self,
        buffer: &mut TransientBuffer,
        locks: &mut LockManager,
        frame: FrameIndex,
        shared_layout_key: &'static str,
        writes: &[UniformWrite],
    ) -> BufferLock {
        let layout = self
            .layouts
            .get(shared_layout_key)
            .unwrap_or_else(|| panic!("no registered uniform layout for '{shared_layout_key}'"));
        let mut block_range: Option<Range<u64>> = None;
        for write in writes {
            let Some((_, field_range)) = layout.iter().find(|(name, _)| *name == write.name) else {
                log::warn!("uniform field '{}' not present in layout '{shared_layout_key}'", write.name);
                continue;
            };
            let written = buffer.write_bytes(field_range.start, &write.bytes);
            block_range = Some(match block_range {
                Some(existing) => existing.start.min(written.start)..existing.end.max(written.end),
                None => written,
            });
        }
        let range = block_range.unwrap_or(0..0);
        locks.lock_range(buffer.id, range, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_buffer() -> TransientBuffer {
        TransientBuffer::new(
            BufferId::default(),
            TransientBufferDescriptor {
                element_size: 256,
                element_count: 1,
                usage: TransientUsage::Uniform,
                update_frequency: UpdateFrequency::Frequent,
                binding_mode: BindingMode::PerUse,
                label: "test-uniform",
            },
            3,
            256,
        )
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut buffer = make_buffer();
        let mut locks = LockManager::default();
        let range = buffer.write_bytes(0, &[1, 2, 3, 4]);
        assert_eq!(buffer.read_bytes(range, &mut locks, |_| {}), &[1, 2, 3, 4]);
    }

    #[test]
    fn read_blocks_until_overlapping_write_lock_retires() {
        let mut buffer = make_buffer();
        let mut locks = LockManager::default();
        let range = buffer.write_bytes(0, &[9, 9, 9, 9]);
        locks.lock_range(buffer.id, range.clone(), 1);
        let mut waited_for = Vec::new();
        buffer.read_bytes(range, &mut locks, |frame| waited_for.push(frame));
        assert_eq!(waited_for, vec![1]);
    }

    #[test]
    #[should_panic(expected = "outran its")]
    fn ring_overrun_past_capacity_panics() {
        let mut buffer = make_buffer();
        for _ in 0..4 {
            buffer.advance_write_index();
        }
    }
}
