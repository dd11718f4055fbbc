use crate::command::{BufferBarrier, ResourceUsage};

/// Backend-neutral description of the pipeline-stage/access-mask pair a
/// concrete driver lowers `barrier` into. Mirrors the synchronization
/// scope a Vulkan barrier or a GL memory-barrier bit needs, without
/// naming either API's types here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweredBarrier {
    pub needs_host_flush: bool,
    pub needs_gpu_to_gpu_barrier: bool,
    pub is_present_transition: bool,
}

/// Static (source, target) usage table. CPU-write sources require a
/// persistent-map flush before the GPU may read; GPU-write sources only
/// need a pipeline barrier; anything transitioning to `Present` is
/// flagged so the backend can end the render pass in the right layout.
pub fn lower_buffer_barrier(barrier: &BufferBarrier) -> LoweredBarrier {
    use ResourceUsage::*;
    let needs_host_flush = matches!(barrier.from, CpuWrite);
    let needs_gpu_to_gpu_barrier = matches!(
        (barrier.from, barrier.to),
        (GpuWrite, GpuRead)
            | (GpuWrite, GpuReadWrite)
            | (GpuReadWrite, GpuRead)
            | (GpuReadWrite, GpuWrite)
            | (GpuRead, GpuWrite)
    );
    let is_present_transition = matches!(barrier.to, Present);
    LoweredBarrier {
        needs_host_flush,
        needs_gpu_to_gpu_barrier,
        is_present_transition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BufferHandle;

    #[test]
    fn cpu_write_source_requires_host_flush() {
        let barrier = BufferBarrier {
            buffer: BufferHandle::invalid(),
            range: 0..16,
            from: ResourceUsage::CpuWrite,
            to: ResourceUsage::GpuRead,
        };
        assert!(lower_buffer_barrier(&barrier).needs_host_flush);
    }

    #[test]
    fn gpu_write_to_gpu_read_needs_barrier() {
        let barrier = BufferBarrier {
            buffer: BufferHandle::invalid(),
            range: 0..16,
            from: ResourceUsage::GpuWrite,
            to: ResourceUsage::GpuRead,
        };
        assert!(lower_buffer_barrier(&barrier).needs_gpu_to_gpu_barrier);
    }
}
