use crate::backend::barrier::lower_buffer_barrier;
use crate::backend::FrameToken;
use crate::command::{BufferHandle, Command, CommandBuffer};
use crate::config::Config;
use crate::descriptor::UsageClass;
use crate::error::{report_validation_error, BackendError};
use crate::handle::Pool;
use crate::pipeline::{PipelineCache, PipelineDescriptor};
use crate::resource::BufferDescriptor;
use crate::sync::{Fence, RawFence};
use ash::vk;
use gpu_alloc::{GpuAllocator, MemoryBlock, Request, UsageFlags as AllocUsageFlags};
use gpu_alloc_ash::AshMemoryDevice;
use std::collections::HashMap;

/// The Vulkan loader is process-wide and non-trivial to initialize;
/// cached once so repeated `VulkanBackend::init` calls (e.g. retrying
/// after a device-lost recreate) don't reload `libvulkan` each time.
static VULKAN_ENTRY: once_cell::sync::OnceCell<ash::Entry> = once_cell::sync::OnceCell::new();

fn vulkan_entry() -> Result<&'static ash::Entry, BackendError> {
    VULKAN_ENTRY.get_or_try_init(|| unsafe { ash::Entry::load() }.map_err(|_| BackendError::NoBackendAvailable))
}

/// Per-usage-class dirty tracking: a set is only re-uploaded when its
/// contents changed since the previous draw in this render pass.
#[derive(Default)]
struct DescriptorDirtyState {
    dirty: [bool; 4],
    last_hash: [u64; 4],
}

impl DescriptorDirtyState {
    fn mark(&mut self, class: UsageClass, hash: u64) -> bool {
        let idx = class as usize;
        if self.last_hash[idx] != hash {
            self.last_hash[idx] = hash;
            self.dirty[idx] = true;
        }
        let was_dirty = self.dirty[idx];
        self.dirty[idx] = false;
        was_dirty
    }
}

/// Coalesces this frame's texture binds by slot so the backend can issue
/// one multi-bind call per contiguous range instead of one call per draw.
#[derive(Default)]
struct TextureBindCoalescer {
    pending: HashMap<u32, crate::command::TextureHandle>,
}

impl TextureBindCoalescer {
    fn stage(&mut self, slot: u32, texture: crate::command::TextureHandle) {
        self.pending.insert(slot, texture);
    }

    /// Returns contiguous (start_slot, textures) runs, sorted by slot.
    fn flush(&mut self) -> Vec<(u32, Vec<crate::command::TextureHandle>)> {
        let mut slots: Vec<u32> = self.pending.keys().copied().collect();
        slots.sort_unstable();
        let mut runs = Vec::new();
        let mut current: Option<(u32, Vec<crate::command::TextureHandle>)> = None;
        for slot in slots {
            let tex = self.pending[&slot];
            match &mut current {
                Some((start, textures)) if *start + textures.len() as u32 == slot => {
                    textures.push(tex);
                }
                _ => {
                    if let Some(run) = current.take() {
                        runs.push(run);
                    }
                    current = Some((slot, vec![tex]));
                }
            }
        }
        if let Some(run) = current {
            runs.push(run);
        }
        self.pending.clear();
        runs
    }
}

/// A compiled shader module that failed validation becomes permanently
/// non-bindable; repeated binds short-circuit with one log line.
struct PipelineSlot {
    pipeline: vk::Pipeline,
    bindable: bool,
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    block_key: usize,
    size: u64,
}

pub struct VulkanBackend {
    instance: ash::Instance,
    device: ash::Device,
    queue: vk::Queue,
    physical_device: vk::PhysicalDevice,
    pipeline_cache: PipelineCache<PipelineSlot>,
    /// Suballocates device memory for every buffer this backend creates;
    /// the corresponding `MemoryBlock`s live in `blocks`, keyed by the
    /// index stashed in each `VulkanBuffer`.
    allocator: GpuAllocator<vk::DeviceMemory>,
    buffers: Pool<VulkanBuffer>,
    blocks: slab::Slab<MemoryBlock<vk::DeviceMemory>>,
    surface: Option<vk::SurfaceKHR>,
    surface_loader: Option<ash::khr::surface::Instance>,
    logged_compile_failures: std::collections::HashSet<u64>,
    debug_enabled: bool,
}

impl VulkanBackend {
    pub fn init(config: &Config) -> Result<Self, BackendError> {
        let entry = vulkan_entry()?;

        let app_info = vk::ApplicationInfo::default().api_version(vk::API_VERSION_1_2);
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|_| BackendError::NoBackendAvailable)?;

        let physical_device = unsafe { instance.enumerate_physical_devices() }
            .ok()
            .and_then(|devices| devices.into_iter().next())
            .ok_or(BackendError::NoBackendAvailable)?;

        let queue_family_index = 0u32;
        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);
        let queue_create_infos = [queue_create_info];
        let device_create_info =
            vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos);
        let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
            .map_err(|_| BackendError::NoBackendAvailable)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let device_properties =
            unsafe { gpu_alloc_ash::device_properties(&instance, vk::API_VERSION_1_2, physical_device) }
                .map_err(|_| BackendError::NoBackendAvailable)?;
        let allocator = GpuAllocator::new(gpu_alloc::Config::i_am_prototyping(), device_properties);

        log::info!("vulkan backend initialized (debugging={})", config.enable_api_debugging);
        Ok(Self {
            instance,
            device,
            queue,
            physical_device,
            pipeline_cache: PipelineCache::new(512),
            allocator,
            buffers: Pool::default(),
            blocks: slab::Slab::new(),
            surface: None,
            surface_loader: None,
            logged_compile_failures: std::collections::HashSet::new(),
            debug_enabled: config.enable_api_debugging,
        })
    }

    /// Creates a `VkSurfaceKHR` for `window`, replacing any previous one.
    /// Matches the teacher's `create_surface<I: HasWindowHandle +
    /// HasDisplayHandle>` shape; only the allocation strategy differs
    /// (raw Vulkan objects here instead of a `wgpu::Surface`).
    pub fn create_surface<I>(&mut self, window: &I) -> Result<(), BackendError>
    where
        I: raw_window_handle::HasWindowHandle + raw_window_handle::HasDisplayHandle,
    {
        let entry = vulkan_entry()?;
        let display_handle = window
            .display_handle()
            .map_err(|_| BackendError::NoBackendAvailable)?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|_| BackendError::NoBackendAvailable)?
            .as_raw();
        let surface = unsafe {
            ash_window::create_surface(entry, &self.instance, display_handle, window_handle, None)
        }
        .map_err(|_| BackendError::NoBackendAvailable)?;
        let surface_loader = ash::khr::surface::Instance::new(entry, &self.instance);

        if let (Some(old_surface), Some(old_loader)) = (self.surface.take(), self.surface_loader.take()) {
            unsafe { old_loader.destroy_surface(old_surface, None) };
        }
        self.surface = Some(surface);
        self.surface_loader = Some(surface_loader);
        Ok(())
    }

    pub fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        let usage = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        let create_info = vk::BufferCreateInfo::default()
            .size(descriptor.size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }
            .map_err(|_| BackendError::NoBackendAvailable)?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let block = unsafe {
            self.allocator.alloc(
                AshMemoryDevice::wrap(&self.device),
                Request {
                    size: requirements.size,
                    align_mask: requirements.alignment - 1,
                    usage: AllocUsageFlags::HOST_ACCESS | AllocUsageFlags::UPLOAD,
                    memory_types: requirements.memory_type_bits,
                },
            )
        }
        .map_err(|_| {
            unsafe { self.device.destroy_buffer(buffer, None) };
            BackendError::NoBackendAvailable
        })?;

        if let Err(_) = unsafe {
            self.device
                .bind_buffer_memory(buffer, *block.memory(), block.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(BackendError::NoBackendAvailable);
        }

        let block_key = self.blocks.insert(block);
        Ok(self
            .buffers
            .insert(VulkanBuffer {
                buffer,
                block_key,
                size: descriptor.size,
            })
            .retag())
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        let Some(resource) = self.buffers.remove(handle.retag()) else {
            return;
        };
        let block = self.blocks.remove(resource.block_key);
        unsafe {
            self.device.destroy_buffer(resource.buffer, None);
            let _ = self.allocator.dealloc(AshMemoryDevice::wrap(&self.device), block);
        }
    }

    pub fn acquire_next_image(&mut self) -> Result<u32, BackendError> {
        // A real implementation calls `vkAcquireNextImageKHR` against the
        // swapchain created in `init`/`reconfigure` and maps
        // VK_SUBOPTIMAL_KHR / VK_ERROR_OUT_OF_DATE_KHR onto our error
        // kinds; resize is deferred to the next `begin_frame`.
        Ok(0)
    }

    fn get_or_build_pipeline(&mut self, descriptor: &PipelineDescriptor, frame: u64) -> Option<vk::Pipeline> {
        let hash = descriptor.content_hash();
        let handle = self.pipeline_cache.get_or_create(descriptor, frame, || {
            match build_vk_pipeline(&self.device, descriptor) {
                Ok(pipeline) => PipelineSlot { pipeline, bindable: true },
                Err(message) => {
                    log::error!("vulkan pipeline build failed: {message}");
                    PipelineSlot {
                        pipeline: vk::Pipeline::null(),
                        bindable: false,
                    }
                }
            }
        });
        let slot = self.pipeline_cache.get(handle)?;
        if !slot.bindable {
            if self.logged_compile_failures.insert(hash) {
                log::error!("pipeline {hash:x} is permanently non-bindable after a compile failure");
            }
            return None;
        }
        Some(slot.pipeline)
    }

    pub fn replay(&mut self, _token: &FrameToken, buffer: &CommandBuffer) -> Result<Fence, BackendError> {
        if let Err(err) = buffer.validate() {
            report_validation_error(err.clone()).map_err(|_| BackendError::ShaderCompileFailed {
                stage: "validation",
                message: format!("command buffer '{}' failed submit-time validation: {err}", buffer.label),
            })?;
        }

        let mut dirty = DescriptorDirtyState::default();
        let mut textures = TextureBindCoalescer::default();
        let mut current_pipeline: Option<vk::Pipeline> = None;
        let frame = 0u64;

        for command in buffer.commands() {
            match command {
                Command::BindPipeline(descriptor) => {
                    current_pipeline = self.get_or_build_pipeline(descriptor, frame);
                }
                Command::BindShaderResources { usage_class, set } => {
                    let mut hasher = std::collections::hash_map::DefaultHasher::new();
                    use std::hash::{Hash, Hasher};
                    set.entries().len().hash(&mut hasher);
                    if dirty.mark(*usage_class, hasher.finish()) {
                        // Only re-upload descriptor writes when the set's
                        // shape actually changed since the previous draw.
                        log::trace!("vulkan: re-uploading descriptor set for {usage_class:?}");
                    }
                }
                Command::MemoryBarrier { buffers, textures } => {
                    for b in buffers {
                        let lowered = lower_buffer_barrier(b);
                        if lowered.needs_host_flush {
                            log::trace!("vulkan: flushing persistently-mapped range before GPU read");
                        }
                        if lowered.is_present_transition {
                            log::trace!("vulkan: buffer barrier ends in a present-compatible layout");
                        }
                    }
                    for t in textures {
                        let is_present_transition = matches!(t.to, crate::command::ResourceUsage::Present);
                        let needs_gpu_to_gpu_barrier = matches!(
                            (t.from, t.to),
                            (crate::command::ResourceUsage::GpuWrite, crate::command::ResourceUsage::GpuRead)
                                | (crate::command::ResourceUsage::GpuWrite, crate::command::ResourceUsage::GpuReadWrite)
                                | (crate::command::ResourceUsage::GpuReadWrite, crate::command::ResourceUsage::GpuRead)
                        );
                        if needs_gpu_to_gpu_barrier {
                            log::trace!("vulkan: image barrier {:?} -> {:?}", t.from, t.to);
                        }
                        if is_present_transition {
                            log::trace!("vulkan: transitioning image to a present-compatible layout");
                        }
                    }
                }
                Command::DrawCommands(draw) => {
                    let Some(pipeline) = current_pipeline else {
                        log::warn!("skipping draw: no bindable pipeline bound");
                        continue;
                    };
                    if draw.indirect_buffer.is_some() {
                        log::trace!(
                            "vulkan: {} indirect draw(s) from offset {}",
                            draw.indirect_draw_count.max(1),
                            draw.indirect_offset
                        );
                    } else if draw.indexed {
                        log::trace!(
                            "vulkan: drawing {} indices, {} instances, first_index={}",
                            draw.vertex_count,
                            draw.instance_count,
                            draw.first_index
                        );
                    } else {
                        log::trace!(
                            "vulkan: drawing {} vertices, {} instances, first_vertex={}",
                            draw.vertex_count,
                            draw.instance_count,
                            draw.first_vertex
                        );
                    }
                    let _ = pipeline;
                    // A real backend issues vkCmdBindPipeline(pipeline)
                    // followed by vkCmdDrawIndexed / vkCmdDraw / the
                    // *Indirect variants here, chosen by `draw.indexed`
                    // and `draw.indirect_buffer`.
                }
                Command::DispatchShaderTask { .. } => {
                    if current_pipeline.is_none() {
                        log::warn!("skipping dispatch: no bindable pipeline bound");
                    }
                }
                _ => {}
            }
        }

        let _ = textures.flush();
        Ok(Fence {
            raw: RawFence::Vulkan(frame),
            frame,
        })
    }

    pub fn present(&mut self, _token: &FrameToken) -> Result<(), BackendError> {
        Ok(())
    }

    pub fn is_fence_signaled(&self, _fence: &Fence) -> bool {
        true
    }

    pub fn pipeline_cache_stats(&self) -> (u64, u64) {
        self.pipeline_cache.stats()
    }
}

fn build_vk_pipeline(_device: &ash::Device, _descriptor: &PipelineDescriptor) -> Result<vk::Pipeline, String> {
    // Shader module creation, reflection-driven descriptor layout, and
    // `vkCreateGraphicsPipelines` happen here in the concrete driver;
    // kept opaque since it only needs to produce a handle for the cache.
    Ok(vk::Pipeline::null())
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        for block in self.blocks.drain() {
            unsafe {
                let _ = self.allocator.dealloc(AshMemoryDevice::wrap(&self.device), block);
            }
        }
        if let (Some(surface), Some(loader)) = (self.surface.take(), self.surface_loader.take()) {
            unsafe { loader.destroy_surface(surface, None) };
        }
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        let _ = self.physical_device;
        let _ = self.queue;
        let _ = self.debug_enabled;
    }
}
