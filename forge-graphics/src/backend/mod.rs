//! Backend dispatch surface.
//!
//! Per the redesign notes, dispatch is a small, fixed set of methods
//! (`begin_frame` / `submit` / `end_frame` / `create_*`); everything else
//! flows through the typed [`crate::command::Command`] stream so there is
//! no virtual call per draw. `Context` holds one of two concrete backends
//! behind an enum rather than a `Box<dyn Trait>`.

mod barrier;
mod gl;
mod vulkan;

pub use barrier::lower_buffer_barrier;
pub use gl::GlBackend;
pub use vulkan::VulkanBackend;

use crate::command::{BufferHandle, CommandBuffer};
use crate::config::{Config, RequestedBackend};
use crate::error::BackendError;
use crate::resource::BufferDescriptor;
use crate::shader::{traits::ShaderReflect, ReflectedShader};
use crate::sync::{Fence, FrameIndex};

/// A single frame's worth of submission bookkeeping, handed back from
/// `begin_frame` and consumed by `submit`/`end_frame`.
pub struct FrameToken {
    pub frame: FrameIndex,
    pub swapchain_image_index: u32,
}

enum Inner {
    Vulkan(VulkanBackend),
    Gl(GlBackend),
}

/// Owns exactly one live backend, chosen at construction time. All
/// device-owned object creation happens here, on the thread that owns
/// the `Context`.
pub struct Context {
    inner: Inner,
    frame_counter: FrameIndex,
}

impl Context {
    pub fn init(config: &Config) -> Result<Self, BackendError> {
        let inner = match config.backend {
            RequestedBackend::Vulkan => Inner::Vulkan(VulkanBackend::init(config)?),
            RequestedBackend::Gl => Inner::Gl(GlBackend::init(config)?),
            RequestedBackend::Auto => match VulkanBackend::init(config) {
                Ok(vk) => Inner::Vulkan(vk),
                Err(err) => {
                    log::warn!("vulkan backend unavailable ({err}), falling back to GL");
                    Inner::Gl(GlBackend::init(config)?)
                }
            },
        };
        Ok(Self {
            inner,
            frame_counter: 0,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner {
            Inner::Vulkan(_) => "vulkan",
            Inner::Gl(_) => "gl",
        }
    }

    /// Acquires the next swapchain image. `SurfaceSuboptimal` is
    /// recoverable (continue, recreate at the next boundary);
    /// `SurfaceOutOfDate` requires an immediate recreate.
    pub fn begin_frame(&mut self) -> Result<FrameToken, BackendError> {
        let frame = self.frame_counter;
        let swapchain_image_index = match &mut self.inner {
            Inner::Vulkan(vk) => vk.acquire_next_image()?,
            Inner::Gl(gl) => gl.acquire_next_image()?,
        };
        Ok(FrameToken {
            frame,
            swapchain_image_index,
        })
    }

    /// Replays one recorded buffer. Must be called from the single
    /// replay thread the backend was initialized on.
    pub fn submit(&mut self, token: &FrameToken, buffer: &CommandBuffer) -> Result<Fence, BackendError> {
        match &mut self.inner {
            Inner::Vulkan(vk) => vk.replay(token, buffer),
            Inner::Gl(gl) => gl.replay(token, buffer),
        }
    }

    pub fn end_frame(&mut self, token: FrameToken) -> Result<(), BackendError> {
        match &mut self.inner {
            Inner::Vulkan(vk) => vk.present(&token)?,
            Inner::Gl(gl) => gl.present(&token)?,
        }
        self.frame_counter += 1;
        Ok(())
    }

    pub fn is_fence_signaled(&self, fence: &Fence) -> bool {
        match &self.inner {
            Inner::Vulkan(vk) => vk.is_fence_signaled(fence),
            Inner::Gl(gl) => gl.is_fence_signaled(fence),
        }
    }

    pub fn pipeline_cache_stats(&self) -> (u64, u64) {
        match &self.inner {
            Inner::Vulkan(vk) => vk.pipeline_cache_stats(),
            Inner::Gl(gl) => gl.pipeline_cache_stats(),
        }
    }

    /// Allocates a device buffer. Dispatches to `gpu-alloc` on Vulkan and
    /// to a driver-managed allocation on GL.
    pub fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        match &mut self.inner {
            Inner::Vulkan(vk) => vk.create_buffer(descriptor),
            Inner::Gl(gl) => gl.create_buffer(descriptor),
        }
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        match &mut self.inner {
            Inner::Vulkan(vk) => vk.destroy_buffer(handle),
            Inner::Gl(gl) => gl.destroy_buffer(handle),
        }
    }

    /// Creates a presentable surface from a windowing-system handle.
    /// Must be called once, after `init`, before the first `begin_frame`.
    pub fn create_surface<I>(&mut self, window: &I) -> Result<(), BackendError>
    where
        I: raw_window_handle::HasWindowHandle + raw_window_handle::HasDisplayHandle,
    {
        match &mut self.inner {
            Inner::Vulkan(vk) => vk.create_surface(window),
            Inner::Gl(gl) => gl.create_surface(window),
        }
    }
}

#[hidden_trait::expose]
impl ShaderReflect for Context {
    fn reflect_shader(&self, label: &'static str, source: &str) -> Result<ReflectedShader, BackendError> {
        crate::shader::reflect_wgsl(label, source).map(|(_, reflected)| reflected)
    }
}
