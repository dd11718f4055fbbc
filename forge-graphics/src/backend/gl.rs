use crate::backend::barrier::lower_buffer_barrier;
use crate::backend::FrameToken;
use crate::command::{BufferHandle, Command, CommandBuffer};
use crate::config::Config;
use crate::error::{report_validation_error, BackendError};
use crate::handle::Pool;
use crate::pipeline::{PipelineCache, PipelineDescriptor};
use crate::resource::BufferDescriptor;
use crate::sync::{Fence, RawFence};
use glow::HasContext;
use std::rc::Rc;

struct GlPipeline {
    program: glow::Program,
    bindable: bool,
}

type EglInstance = egl::DynamicInstance<egl::EGL1_5>;

const EGL_LIB_NAMES: &[&str] = &["libEGL.so.1", "libEGL.so"];

/// Dynamically loads `libEGL` via `libloading` and binds it through
/// `khronos-egl`'s dynamic-instance wrapper, the same two-step load the
/// teacher's native GLES surface negotiation needs before it can ask for
/// a window surface.
fn load_egl() -> Result<EglInstance, BackendError> {
    let library = EGL_LIB_NAMES
        .iter()
        .find_map(|name| unsafe { libloading::Library::new(name) }.ok())
        .ok_or(BackendError::NoBackendAvailable)?;
    unsafe { EglInstance::load_required_from(library) }.map_err(|err| {
        log::warn!("failed to bind libEGL entry points: {err}");
        BackendError::NoBackendAvailable
    })
}

const EGL_CONFIG_ATTRIBS: &[i32] = &[
    egl::SURFACE_TYPE,
    (egl::PBUFFER_BIT | egl::WINDOW_BIT) as i32,
    egl::RENDERABLE_TYPE,
    egl::OPENGL_ES3_BIT as i32,
    egl::RED_SIZE,
    8,
    egl::GREEN_SIZE,
    8,
    egl::BLUE_SIZE,
    8,
    egl::ALPHA_SIZE,
    8,
    egl::NONE,
];

const EGL_CONTEXT_ATTRIBS: &[i32] = &[egl::CONTEXT_MAJOR_VERSION, 3, egl::NONE];

/// Extracts the native window pointer EGL's `eglCreateWindowSurface`
/// needs from a `raw-window-handle` 0.6 handle. Only the desktop
/// platforms the teacher's windowed GL path targets are recognized;
/// anything else falls back to `NoBackendAvailable`.
fn native_window_ptr(raw: raw_window_handle::RawWindowHandle) -> Option<*mut std::ffi::c_void> {
    use raw_window_handle::RawWindowHandle;
    match raw {
        RawWindowHandle::Xlib(h) => Some(h.window as *mut std::ffi::c_void),
        RawWindowHandle::Win32(h) => Some(h.hwnd.get() as *mut std::ffi::c_void),
        RawWindowHandle::AppKit(h) => Some(h.ns_view.as_ptr()),
        _ => None,
    }
}

/// OpenGL replay is pinned to the single thread that owns the context —
/// there is no separate submission thread the way Vulkan may use one.
pub struct GlBackend {
    gl: Rc<glow::Context>,
    egl: Option<EglInstance>,
    egl_display: Option<egl::Display>,
    egl_context: Option<egl::Context>,
    egl_config: Option<egl::Config>,
    egl_surface: Option<egl::Surface>,
    pipeline_cache: PipelineCache<GlPipeline>,
    buffers: Pool<glow::Buffer>,
    logged_compile_failures: std::collections::HashSet<u64>,
    debug_enabled: bool,
}

impl GlBackend {
    /// Stands up a context against a throwaway 1x1 pbuffer surface so
    /// `Auto` gets a real `NoBackendAvailable` when no driver is
    /// installed, without needing a window yet. `create_surface` swaps
    /// the pbuffer for the real windowed surface once one exists.
    pub fn init(config: &Config) -> Result<Self, BackendError> {
        let egl = load_egl()?;
        let display = unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }.ok_or(BackendError::NoBackendAvailable)?;
        egl.initialize(display).map_err(|_| BackendError::NoBackendAvailable)?;

        let egl_config = egl
            .choose_config(display, EGL_CONFIG_ATTRIBS, 1)
            .map_err(|_| BackendError::NoBackendAvailable)?
            .ok_or(BackendError::NoBackendAvailable)?;

        egl.bind_api(egl::OPENGL_ES_API)
            .map_err(|_| BackendError::NoBackendAvailable)?;
        let context = egl
            .create_context(display, egl_config, None, EGL_CONTEXT_ATTRIBS)
            .map_err(|_| BackendError::NoBackendAvailable)?;

        let pbuffer_attribs = [egl::WIDTH, 1, egl::HEIGHT, 1, egl::NONE];
        let pbuffer = egl
            .create_pbuffer_surface(display, egl_config, &pbuffer_attribs)
            .map_err(|_| BackendError::NoBackendAvailable)?;
        egl.make_current(display, Some(pbuffer), Some(pbuffer), Some(context))
            .map_err(|_| BackendError::NoBackendAvailable)?;

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name).map_or(std::ptr::null(), |f| f as *const _)
            })
        };

        log::info!("gl backend initialized on a headless pbuffer, awaiting a window surface");
        Ok(Self {
            gl: Rc::new(gl),
            egl: Some(egl),
            egl_display: Some(display),
            egl_context: Some(context),
            egl_config: Some(egl_config),
            egl_surface: Some(pbuffer),
            pipeline_cache: PipelineCache::new(256),
            buffers: Pool::default(),
            logged_compile_failures: std::collections::HashSet::new(),
            debug_enabled: config.enable_api_debugging,
        })
    }

    /// Binds an EGL window surface to `window`, replacing the pbuffer
    /// `init` made current. Mirrors the teacher's windowed
    /// `create_surface` on the native (non-WebGPU) path.
    pub fn create_surface<I>(&mut self, window: &I) -> Result<(), BackendError>
    where
        I: raw_window_handle::HasWindowHandle + raw_window_handle::HasDisplayHandle,
    {
        let egl = self.egl.as_ref().ok_or(BackendError::NoBackendAvailable)?;
        let display = self.egl_display.ok_or(BackendError::NoBackendAvailable)?;
        let config = self.egl_config.ok_or(BackendError::NoBackendAvailable)?;
        let context = self.egl_context.ok_or(BackendError::NoBackendAvailable)?;

        let raw = window
            .window_handle()
            .map_err(|_| BackendError::NoBackendAvailable)?
            .as_raw();
        let native_window = native_window_ptr(raw).ok_or(BackendError::NoBackendAvailable)?;
        let _ = window.display_handle();

        let surface = unsafe { egl.create_window_surface(display, config, native_window, None) }
            .map_err(|_| BackendError::NoBackendAvailable)?;
        egl.make_current(display, Some(surface), Some(surface), Some(context))
            .map_err(|_| BackendError::NoBackendAvailable)?;

        if let Some(old_surface) = self.egl_surface.replace(surface) {
            let _ = egl.destroy_surface(display, old_surface);
        }
        Ok(())
    }

    #[cfg(test)]
    fn new_headless_for_test(gl: Rc<glow::Context>, config: &Config) -> Self {
        Self {
            gl,
            egl: None,
            egl_display: None,
            egl_context: None,
            egl_config: None,
            egl_surface: None,
            pipeline_cache: PipelineCache::new(256),
            buffers: Pool::default(),
            logged_compile_failures: std::collections::HashSet::new(),
            debug_enabled: config.enable_api_debugging,
        }
    }

    pub fn acquire_next_image(&mut self) -> Result<u32, BackendError> {
        Ok(0)
    }

    pub fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        let buffer = unsafe { self.gl.create_buffer() }.map_err(|_| BackendError::NoBackendAvailable)?;
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl
                .buffer_data_size(glow::ARRAY_BUFFER, descriptor.size.max(1) as i32, glow::DYNAMIC_DRAW);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        Ok(self.buffers.insert(buffer).retag())
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(handle.retag()) {
            unsafe { self.gl.delete_buffer(buffer) };
        }
    }

    fn get_or_build_pipeline(&mut self, descriptor: &PipelineDescriptor, frame: u64) -> Option<glow::Program> {
        let hash = descriptor.content_hash();
        let gl = Rc::clone(&self.gl);
        let handle = self.pipeline_cache.get_or_create(descriptor, frame, || {
            match compile_gl_program(&gl, descriptor) {
                Ok(program) => GlPipeline { program, bindable: true },
                Err(message) => {
                    log::error!("GL program link failed: {message}");
                    GlPipeline {
                        program: unsafe { std::mem::zeroed() },
                        bindable: false,
                    }
                }
            }
        });
        let slot = self.pipeline_cache.get(handle)?;
        if !slot.bindable {
            if self.logged_compile_failures.insert(hash) {
                log::error!("GL program {hash:x} is permanently non-bindable after a link failure");
            }
            return None;
        }
        Some(slot.program)
    }

    pub fn replay(&mut self, _token: &FrameToken, buffer: &CommandBuffer) -> Result<Fence, BackendError> {
        if let Err(err) = buffer.validate() {
            report_validation_error(err.clone()).map_err(|_| BackendError::ShaderCompileFailed {
                stage: "validation",
                message: format!("command buffer '{}' failed submit-time validation: {err}", buffer.label),
            })?;
        }

        let frame = 0u64;
        let mut current_program: Option<glow::Program> = None;

        for command in buffer.commands() {
            match command {
                Command::BindPipeline(descriptor) => {
                    current_program = self.get_or_build_pipeline(descriptor, frame);
                    if let Some(program) = current_program {
                        unsafe { self.gl.use_program(Some(program)) };
                    }
                }
                Command::MemoryBarrier { buffers, textures } => {
                    let needs_barrier = buffers.iter().any(|b| lower_buffer_barrier(b).needs_gpu_to_gpu_barrier)
                        || textures.iter().any(|t| {
                            matches!(
                                (t.from, t.to),
                                (crate::command::ResourceUsage::GpuWrite, crate::command::ResourceUsage::GpuRead)
                                    | (crate::command::ResourceUsage::GpuWrite, crate::command::ResourceUsage::GpuReadWrite)
                                    | (crate::command::ResourceUsage::GpuReadWrite, crate::command::ResourceUsage::GpuRead)
                            )
                        });
                    if needs_barrier {
                        unsafe { self.gl.memory_barrier(glow::ALL_BARRIER_BITS) };
                    }
                }
                Command::DrawCommands(draw) => {
                    if current_program.is_none() {
                        log::warn!("skipping draw: no bindable program bound");
                        continue;
                    }
                    let mode = glow::TRIANGLES;
                    unsafe {
                        if draw.indexed {
                            let index_type = match draw.index_type {
                                crate::command::IndexType::U16 => glow::UNSIGNED_SHORT,
                                crate::command::IndexType::U32 => glow::UNSIGNED_INT,
                            };
                            if draw.instance_count > 1 {
                                self.gl.draw_elements_instanced(
                                    mode,
                                    draw.vertex_count as i32,
                                    index_type,
                                    draw.first_index as i32,
                                    draw.instance_count as i32,
                                );
                            } else {
                                self.gl.draw_elements(mode, draw.vertex_count as i32, index_type, draw.first_index as i32);
                            }
                        } else if draw.instance_count > 1 {
                            self.gl.draw_arrays_instanced(
                                mode,
                                draw.first_vertex as i32,
                                draw.vertex_count as i32,
                                draw.instance_count as i32,
                            );
                        } else {
                            self.gl.draw_arrays(mode, draw.first_vertex as i32, draw.vertex_count as i32);
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Fence {
            raw: RawFence::Gl(frame),
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

/// Mirrors `vulkan::build_vk_pipeline`'s opaque placeholder: translating
/// the reflected naga module into GLSL and compiling/linking it happens
/// in the concrete driver once a shader source table exists. This
/// returns a live, empty program object so the pipeline cache gets a
/// real bindable handle, the same way the Vulkan stub returns a
/// null-but-bindable `vk::Pipeline` rather than failing by construction.
fn compile_gl_program(gl: &glow::Context, _descriptor: &PipelineDescriptor) -> Result<glow::Program, String> {
    unsafe { gl.create_program() }.map_err(|err| format!("glCreateProgram failed: {err}"))
}
