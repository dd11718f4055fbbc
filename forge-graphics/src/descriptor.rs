use crate::command::{BufferHandle, SamplerHandle, TextureHandle};

/// The four-level binding-frequency hierarchy; a binding's usage class is
/// fixed at shader-reflection time and does not change at record time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UsageClass {
    PerDraw,
    PerBatch,
    PerPass,
    PerFrame,
}

pub const MAX_BINDINGS_PER_SET: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct BufferRange {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CombinedImageSampler {
    pub texture: TextureHandle,
    pub sampler: SamplerHandle,
}

#[derive(Debug, Clone, Copy)]
pub enum ResourceBinding {
    UniformBuffer(BufferRange),
    StorageBuffer(BufferRange),
    CombinedImageSampler(CombinedImageSampler),
    StorageImage(TextureHandle),
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct BindingEntry {
    pub slot: u8,
    pub binding: ResourceBinding,
}

/// A bounded array of entries bound together at record time. The backend
/// (C5) is responsible for recognizing when a set is unchanged from the
/// previous draw and skipping the re-upload via its per-usage-class dirty
/// flag.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    entries: Vec<BindingEntry>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn bind(&mut self, slot: u8, binding: ResourceBinding) {
        assert!(
            (slot as usize) < MAX_BINDINGS_PER_SET,
            "descriptor set slot {slot} exceeds the {MAX_BINDINGS_PER_SET}-entry bound"
        );
        if let Some(existing) = self.entries.iter_mut().find(|e| e.slot == slot) {
            existing.binding = binding;
        } else {
            self.entries.push(BindingEntry { slot, binding });
        }
    }

    pub fn entries(&self) -> &[BindingEntry] {
        &self.entries
    }
}

impl Default for DescriptorSet {
    fn default() -> Self {
        Self::new()
    }
}
