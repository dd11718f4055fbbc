use crate::collaborators::{Drawable, Frustum, MaterialResolver, ResolvedMaterial, SceneProvider, WindowHost};
use crate::frame::{FrameContext, ViewSnapshot};
use crate::stage::{RenderStage, RenderStagePass, STAGE_ORDER};
use forge_graphics::backend::Context;
use forge_graphics::command::{
    Camera, ClipPlane, ClipPlaneSet, Command, CommandBuffer, DrawCommand, IndexType, RenderPassSpec,
    MAX_CLIP_PLANES,
};
use forge_graphics::config::Config;
use forge_graphics::descriptor::{CombinedImageSampler, DescriptorSet, ResourceBinding, UsageClass};
use forge_graphics::error::BackendError;
use forge_graphics::lock::{BufferId, LockManager};
use forge_graphics::pipeline::PipelineDescriptor;
use forge_graphics::pipeline_cache_blob;
use forge_graphics::sync::FenceRetireQueue;
use forge_graphics::transient::{
    BindingMode, TransientBuffer, TransientBufferDescriptor, TransientUsage, UniformBlockUploader, UniformWrite,
    UpdateFrequency,
};
use forge_tasks::{TaskPool, TaskPoolConfig, TaskPriority};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Byte length of [`Camera::to_uniform_bytes`]'s fixed layout (a 4x4
/// matrix plus a padded vec3), used to size the camera uniform ring.
const CAMERA_UNIFORM_BYTES: u64 = 80;
const CAMERA_UNIFORM_ALIGNMENT: u64 = 256;

/// Per-frame board the recording tasks write into and the submit loop
/// reads from. One condvar per stage signals "this stage's buffer is
/// ready to submit".
struct StageBoard {
    buffers: Mutex<HashMap<RenderStage, CommandBuffer>>,
    ready: Mutex<[bool; STAGE_ORDER.len()]>,
    cv: Condvar,
}

impl StageBoard {
    fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            ready: Mutex::new([false; STAGE_ORDER.len()]),
            cv: Condvar::new(),
        }
    }

    fn stage_index(stage: RenderStage) -> usize {
        STAGE_ORDER.iter().position(|s| *s == stage).unwrap()
    }

    fn mark_ready(&self, stage: RenderStage, buffer: CommandBuffer) {
        self.buffers.lock().insert(stage, buffer);
        let mut ready = self.ready.lock();
        ready[Self::stage_index(stage)] = true;
        self.cv.notify_all();
    }

    /// Blocks until every stage in `upstream` has been marked ready.
    fn wait_for(&self, upstream: &[RenderStage]) {
        let mut ready = self.ready.lock();
        loop {
            if upstream.iter().all(|s| ready[Self::stage_index(*s)]) {
                return;
            }
            self.cv.wait(&mut ready);
        }
    }

    fn take(&self, stage: RenderStage) -> Option<CommandBuffer> {
        self.buffers.lock().remove(&stage)
    }
}

/// Orchestrates one frame: advances the frame index and view snapshots,
/// fans out per-stage recording onto the task pool in dependency order,
/// replays each finished stage on the single backend thread, and
/// finalizes with a swapchain present.
pub struct FrameEngine {
    tasks: Arc<TaskPool>,
    graphics: Context,
    fence_queue: FenceRetireQueue,
    lock_manager: LockManager,
    camera_uniforms: TransientBuffer,
    uniform_uploader: UniformBlockUploader,
    frame_index: u64,
    max_frames_in_flight: usize,
    config: Config,
    pipeline_cache_path: Option<PathBuf>,
    shutdown_requested: Arc<AtomicBool>,
}

impl FrameEngine {
    /// `pipeline_cache_path`, if given, is read once at startup and again
    /// after every backend recreation to warm the pipeline cache; see
    /// [`Self::try_reload_pipeline_cache`].
    pub fn new(
        config: &Config,
        max_frames_in_flight: usize,
        pipeline_cache_path: Option<PathBuf>,
    ) -> Result<Self, BackendError> {
        let worker_count = if config.max_worker_threads < 0 {
            None
        } else {
            Some(config.max_worker_threads as usize)
        };
        let tasks = Arc::new(TaskPool::new(TaskPoolConfig {
            worker_count,
            ..TaskPoolConfig::default()
        }));
        let graphics = Context::init(config)?;

        let mut uniform_uploader = UniformBlockUploader::default();
        uniform_uploader.register_layout("camera", vec![("camera_block", 0..CAMERA_UNIFORM_BYTES)]);
        let camera_uniforms = TransientBuffer::new(
            BufferId::default(),
            TransientBufferDescriptor {
                element_size: CAMERA_UNIFORM_BYTES,
                element_count: 1,
                usage: TransientUsage::Uniform,
                update_frequency: UpdateFrequency::Frequent,
                binding_mode: BindingMode::PerUse,
                label: "camera-uniforms",
            },
            max_frames_in_flight.max(1) as u64,
            CAMERA_UNIFORM_ALIGNMENT,
        );

        let engine = Self {
            tasks,
            graphics,
            fence_queue: FenceRetireQueue::new(max_frames_in_flight),
            lock_manager: LockManager::default(),
            camera_uniforms,
            uniform_uploader,
            frame_index: 0,
            max_frames_in_flight,
            config: config.clone(),
            pipeline_cache_path,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        };
        engine.try_reload_pipeline_cache();
        Ok(engine)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Runs exactly one frame. Returns `Ok(false)` once a shutdown
    /// request has been observed and fully drained (no more frames
    /// should be scheduled); `Ok(true)` otherwise, including the frame
    /// in which a device-lost or out-of-date swapchain was recovered
    /// from (that frame's drawing is dropped, not retried).
    pub fn run_frame(
        &mut self,
        views: Vec<ViewSnapshot>,
        scene: &'static (dyn SceneProvider + Sync),
        materials: &'static (dyn MaterialResolver + Sync),
        window: &mut dyn WindowHost,
    ) -> Result<bool, BackendError> {
        if self.is_shutdown_requested() {
            self.drain_for_shutdown();
            return Ok(false);
        }

        for event in window.poll_events() {
            log::debug!("frame {}: window event {event:?}", self.frame_index);
        }

        if let Some(primary) = views.first() {
            let camera = Camera {
                view_proj: primary.view_proj,
                position: primary.position,
            };
            let writes = [UniformWrite {
                name: "camera_block",
                bytes: camera.to_uniform_bytes(),
            }];
            self.uniform_uploader.upload(
                &mut self.camera_uniforms,
                &mut self.lock_manager,
                self.frame_index,
                "camera",
                &writes,
            );
        }

        let context = Arc::new(FrameContext::new(self.frame_index, 0.0, views));
        let board = Arc::new(StageBoard::new());

        for stage in STAGE_ORDER {
            if self.is_shutdown_requested() {
                break;
            }
            let board = Arc::clone(&board);
            let context = Arc::clone(&context);
            let upstream = stage.upstream();
            self.tasks.spawn(TaskPriority::DontCare, move |_| {
                board.wait_for(upstream);
                let buffer = record_stage(stage, &context, scene, materials);
                board.mark_ready(stage, buffer);
            });
        }

        self.tasks.wait_for_all(true);

        if self.is_shutdown_requested() {
            self.drain_for_shutdown();
            return Ok(false);
        }

        match self.submit_frame(&board) {
            Ok(()) => {}
            Err(err @ (BackendError::DeviceLost | BackendError::SurfaceOutOfDate)) => {
                log::warn!(
                    "frame {}: backend reported {err}, recreating the backend and resuming at the next frame",
                    self.frame_index
                );
                self.recover_backend()?;
                self.frame_index += 1;
                return Ok(true);
            }
            Err(err) => return Err(err),
        }

        self.tasks.flush_callback_queue();

        let retired = self
            .fence_queue
            .drain_signaled(|f| self.graphics.is_fence_signaled(f));
        for _ in &retired {
            self.camera_uniforms.retire_read_slot();
        }
        self.camera_uniforms.advance_write_index();
        self.lock_manager
            .garbage_collect(self.frame_index, self.fence_queue.outstanding_count() as u64);

        self.frame_index += 1;
        Ok(true)
    }

    /// Acquires, submits every ready stage's buffer in dependency order,
    /// and presents. A suboptimal swapchain is logged and tolerated;
    /// device-lost and out-of-date errors propagate for the caller to
    /// recover from.
    fn submit_frame(&mut self, board: &StageBoard) -> Result<(), BackendError> {
        let token = self.graphics.begin_frame()?;
        for stage in STAGE_ORDER {
            let Some(buffer) = board.take(stage) else {
                continue;
            };
            match self.graphics.submit(&token, &buffer) {
                Ok(fence) => {
                    self.fence_queue
                        .push(fence, |f| self.graphics.is_fence_signaled(f));
                }
                Err(BackendError::SurfaceSuboptimal) => {
                    log::warn!(
                        "stage {stage:?} submit reported a suboptimal swapchain, continuing and recreating at the next convenient boundary"
                    );
                }
                Err(err) => {
                    log::error!("stage {stage:?} submit failed: {err}");
                    return Err(err);
                }
            }
        }
        self.graphics.end_frame(token)?;
        Ok(())
    }

    /// Tears down and reinitializes the backend in place after a
    /// device-lost or out-of-date swapchain, then resets the fence queue
    /// (every fence it held belonged to the destroyed device).
    fn recover_backend(&mut self) -> Result<(), BackendError> {
        log::info!("frame engine rebuilding backend at frame {}", self.frame_index);
        self.graphics = Context::init(&self.config)?;
        self.fence_queue = FenceRetireQueue::new(self.max_frames_in_flight);
        self.try_reload_pipeline_cache();
        Ok(())
    }

    /// Best-effort warm-cache hint: the on-disk blob records which
    /// pipeline descriptors were seen last run, but `PipelineDescriptor`
    /// carries no shader source and the backends expose no binary
    /// import/export path, so this only logs what was found rather than
    /// reconstructing live pipeline objects from it.
    fn try_reload_pipeline_cache(&self) {
        let Some(path) = &self.pipeline_cache_path else {
            return;
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("no pipeline cache blob at {}: {err}", path.display());
                return;
            }
        };
        match pipeline_cache_blob::decode(&bytes) {
            Ok(records) => log::info!(
                "read {} cached pipeline record(s) from {}",
                records.len(),
                path.display()
            ),
            Err(err) => log::warn!("pipeline cache blob at {} unusable: {err}", path.display()),
        }
    }

    fn drain_for_shutdown(&mut self) {
        log::info!("frame engine draining for shutdown at frame {}", self.frame_index);
        self.tasks.wait_for_all(true);
        // Outstanding fences are waited on by draining the retire queue
        // unconditionally; the backend's is_fence_signaled is authoritative.
        let _ = self
            .fence_queue
            .drain_signaled(|f| self.graphics.is_fence_signaled(f));
    }
}

fn record_stage(
    stage: RenderStage,
    context: &FrameContext,
    scene: &(dyn SceneProvider + Sync),
    materials: &(dyn MaterialResolver + Sync),
) -> CommandBuffer {
    let label = format!("{stage:?}@{}", context.frame_index);
    let mut buffer = CommandBuffer::new(label);

    let Some(primary_view) = context.views.first() else {
        buffer.validate().expect("recorded stage buffer must validate");
        return buffer;
    };

    let frustum = frustum_from_view_proj(primary_view.view_proj);
    let pass = RenderStagePass { stage, pass_index: 0 };
    let drawables = scene.drawables_for(&frustum, pass);
    if drawables.is_empty() {
        buffer.validate().expect("recorded stage buffer must validate");
        return buffer;
    }

    buffer.push(Command::BeginRenderPass(empty_render_pass_spec()));
    buffer.push(Command::SetCamera(Camera {
        view_proj: primary_view.view_proj,
        position: primary_view.position,
    }));

    for drawable in &drawables {
        let material = materials.resolve(drawable.material);
        record_drawable(&mut buffer, drawable, &material);
    }

    buffer.push(Command::EndRenderPass);
    buffer.validate().expect("recorded stage buffer must validate");
    buffer
}

fn record_drawable(buffer: &mut CommandBuffer, drawable: &Drawable, material: &ResolvedMaterial) {
    buffer.push(Command::BindPipeline(PipelineDescriptor {
        shader_program: material.pipeline.raw() as u64,
        ..Default::default()
    }));

    if !material.textures.is_empty() {
        let mut set = DescriptorSet::new();
        for binding in &material.textures {
            set.bind(
                binding.slot,
                ResourceBinding::CombinedImageSampler(CombinedImageSampler {
                    texture: binding.texture,
                    sampler: binding.sampler,
                }),
            );
        }
        buffer.push(Command::BindShaderResources {
            usage_class: UsageClass::PerDraw,
            set,
        });
    }

    let mut push_constants = mat4_to_le_bytes(drawable.transform).to_vec();
    for uniform in &material.uniforms {
        push_constants.extend_from_slice(&uniform.bytes);
    }
    buffer.push(Command::SendPushConstants {
        offset: 0,
        data: push_constants,
    });

    buffer.push(Command::DrawCommands(DrawCommand {
        indexed: drawable.index_buffer.is_some(),
        index_type: IndexType::U32,
        vertex_count: drawable.index_count,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
        first_index: 0,
        vertex_offset: 0,
        indirect_buffer: None,
        indirect_offset: 0,
        indirect_draw_count: 0,
    }));
}

fn mat4_to_le_bytes(m: mint::ColumnMatrix4<f32>) -> [u8; 64] {
    let columns: [[f32; 4]; 4] = m.into();
    let mut out = [0u8; 64];
    for (col_index, column) in columns.iter().enumerate() {
        for (row_index, value) in column.iter().enumerate() {
            let offset = (col_index * 4 + row_index) * 4;
            out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
    out
}

fn empty_render_pass_spec() -> RenderPassSpec {
    RenderPassSpec {
        color_attachments: Vec::new(),
        depth_attachment: None,
        clip_planes: ClipPlaneSet {
            planes: [ClipPlane::default(); MAX_CLIP_PLANES],
            count: 0,
        },
        draw_mask: u32::MAX,
    }
}

/// Gribb-Hartmann plane extraction from a combined view-projection
/// matrix: each frustum plane is a linear combination of the matrix's
/// rows, normalized to a unit normal so later distance tests don't need
/// to renormalize.
fn frustum_from_view_proj(view_proj: mint::ColumnMatrix4<f32>) -> Frustum {
    let columns: [[f32; 4]; 4] = view_proj.into();
    let row = |r: usize| [columns[0][r], columns[1][r], columns[2][r], columns[3][r]];
    let r0 = row(0);
    let r1 = row(1);
    let r2 = row(2);
    let r3 = row(3);

    let combine = |a: [f32; 4], b: [f32; 4], sign: f32| {
        [
            a[0] + sign * b[0],
            a[1] + sign * b[1],
            a[2] + sign * b[2],
            a[3] + sign * b[3],
        ]
    };
    let normalize = |p: [f32; 4]| {
        let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        if len > f32::EPSILON {
            [p[0] / len, p[1] / len, p[2] / len, p[3] / len]
        } else {
            p
        }
    };

    let planes = [
        normalize(combine(r3, r0, 1.0)),
        normalize(combine(r3, r0, -1.0)),
        normalize(combine(r3, r1, 1.0)),
        normalize(combine(r3, r1, -1.0)),
        normalize(combine(r3, r2, 1.0)),
        normalize(combine(r3, r2, -1.0)),
    ];

    Frustum {
        planes: planes.map(mint::Vector4::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MaterialId;
    use forge_graphics::command::BufferHandle;
    use forge_graphics::pipeline::PipelineHandle;

    struct OneDrawableScene;
    impl SceneProvider for OneDrawableScene {
        fn drawables_for(&self, _frustum: &Frustum, _pass: RenderStagePass) -> Vec<Drawable> {
            vec![Drawable {
                material: MaterialId(1),
                transform: [[1.0; 4]; 4].into(),
                vertex_buffer: BufferHandle::new(0, 0),
                index_buffer: None,
                index_count: 3,
            }]
        }
    }

    struct EmptyScene;
    impl SceneProvider for EmptyScene {
        fn drawables_for(&self, _frustum: &Frustum, _pass: RenderStagePass) -> Vec<Drawable> {
            Vec::new()
        }
    }

    struct StubMaterials;
    impl MaterialResolver for StubMaterials {
        fn resolve(&self, _material: MaterialId) -> ResolvedMaterial {
            ResolvedMaterial {
                pipeline: PipelineHandle::new(0, 0),
                textures: Vec::new(),
                uniforms: Vec::new(),
            }
        }
    }

    fn a_view() -> ViewSnapshot {
        ViewSnapshot {
            view_proj: [[1.0; 4]; 4].into(),
            position: [0.0, 0.0, 0.0].into(),
        }
    }

    #[test]
    fn record_stage_with_no_views_is_empty() {
        let context = FrameContext::new(0, 0.0, Vec::new());
        let buffer = record_stage(RenderStage::Shadow, &context, &OneDrawableScene, &StubMaterials);
        assert!(buffer.is_empty());
    }

    #[test]
    fn record_stage_with_no_drawables_is_empty() {
        let context = FrameContext::new(0, 0.0, vec![a_view()]);
        let buffer = record_stage(RenderStage::Shadow, &context, &EmptyScene, &StubMaterials);
        assert!(buffer.is_empty());
    }

    #[test]
    fn record_stage_emits_a_balanced_pass_around_each_drawable() {
        let context = FrameContext::new(0, 0.0, vec![a_view()]);
        let buffer = record_stage(RenderStage::Shadow, &context, &OneDrawableScene, &StubMaterials);
        assert!(!buffer.is_empty());
        buffer.validate().expect("recorded buffer must validate");
        assert!(matches!(buffer.commands().first(), Some(Command::BeginRenderPass(_))));
        assert!(matches!(buffer.commands().last(), Some(Command::EndRenderPass)));
        assert!(buffer
            .commands()
            .iter()
            .any(|c| matches!(c, Command::DrawCommands(_))));
    }

    #[test]
    fn frustum_from_identity_view_proj_has_unit_length_normals() {
        let identity: mint::ColumnMatrix4<f32> = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
        .into();
        let frustum = frustum_from_view_proj(identity);
        for plane in frustum.planes {
            let normal_len = (plane.x * plane.x + plane.y * plane.y + plane.z * plane.z).sqrt();
            assert!((normal_len - 1.0).abs() < 1e-5, "normal length was {normal_len}");
        }
    }
}
