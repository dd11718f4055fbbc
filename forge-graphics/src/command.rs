use crate::descriptor::{DescriptorSet, UsageClass};
use crate::error::ValidationError;
use crate::handle::Handle;
use crate::pipeline::PipelineDescriptor;

pub struct BufferTag;
pub struct TextureTag;
pub struct SamplerTag;
pub struct RenderTargetTag;
pub struct QueryPoolTag;

pub type BufferHandle = Handle<BufferTag>;
pub type TextureHandle = Handle<TextureTag>;
pub type SamplerHandle = Handle<SamplerTag>;
pub type RenderTargetHandle = Handle<RenderTargetTag>;
pub type QueryPoolHandle = Handle<QueryPoolTag>;

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub view_proj: mint::ColumnMatrix4<f32>,
    pub position: mint::Vector3<f32>,
}

/// GPU-layout mirror of [`Camera`]: plain arrays rather than `mint`
/// types, `Pod`/`Zeroable` so it can be byte-cast directly into a
/// uniform buffer without a per-field copy.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    position: [f32; 3],
    _pad: f32,
}

impl Camera {
    pub fn to_uniform_bytes(&self) -> Vec<u8> {
        let uniform = CameraUniform {
            view_proj: self.view_proj.into(),
            position: self.position.into(),
            _pad: 0.0,
        };
        bytemuck::bytes_of(&uniform).to_vec()
    }
}

pub const MAX_CLIP_PLANES: usize = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClipPlane {
    pub normal_and_distance: [f32; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct ClipPlaneSet {
    pub planes: [ClipPlane; MAX_CLIP_PLANES],
    pub count: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ClearValue {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum LoadOp {
    Load,
    Clear(ClearValue),
    DontCare,
}

#[derive(Debug, Clone, Copy)]
pub enum StoreOp {
    Store,
    DontCare,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub target: RenderTargetHandle,
    pub load: LoadOp,
    pub store: StoreOp,
}

#[derive(Debug, Clone)]
pub struct RenderPassSpec {
    pub color_attachments: Vec<Attachment>,
    pub depth_attachment: Option<Attachment>,
    pub clip_planes: ClipPlaneSet,
    pub draw_mask: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

#[derive(Debug, Clone)]
pub struct DrawCommand {
    pub indexed: bool,
    pub index_type: IndexType,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub indirect_buffer: Option<BufferHandle>,
    pub indirect_offset: u64,
    pub indirect_draw_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Origin3D {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// (source-usage, target-usage) pair the backend lowers into an
/// API-specific pipeline/image barrier (see `crate::backend::barrier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    CpuWrite,
    GpuRead,
    GpuWrite,
    GpuReadWrite,
    Present,
}

#[derive(Debug, Clone)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub range: std::ops::Range<u64>,
    pub from: ResourceUsage,
    pub to: ResourceUsage,
}

#[derive(Debug, Clone)]
pub struct TextureBarrier {
    pub texture: TextureHandle,
    pub from: ResourceUsage,
    pub to: ResourceUsage,
}

/// The closed command set. Every member is an immutable record; behavior
/// lives entirely in `crate::backend`'s replay.
#[derive(Debug, Clone)]
pub enum Command {
    BeginRenderPass(RenderPassSpec),
    EndRenderPass,

    Blit {
        src: TextureHandle,
        dst: TextureHandle,
        src_region: (Origin3D, Extent3D),
        dst_region: (Origin3D, Extent3D),
    },

    BeginQuery { pool: QueryPoolHandle, index: u32 },
    EndQuery { pool: QueryPoolHandle, index: u32 },

    CopyTexture {
        src: TextureHandle,
        dst: TextureHandle,
        src_origin: Origin3D,
        dst_origin: Origin3D,
        extent: Extent3D,
    },
    ClearTexture {
        texture: TextureHandle,
        value: ClearValue,
    },
    ReadTexture {
        texture: TextureHandle,
        origin: Origin3D,
        extent: Extent3D,
        dst_buffer: BufferHandle,
        dst_offset: u64,
    },

    BindPipeline(PipelineDescriptor),
    BindShaderResources {
        usage_class: UsageClass,
        set: DescriptorSet,
    },
    SendPushConstants {
        offset: u32,
        data: Vec<u8>,
    },

    SetViewport(Viewport),
    PushViewport(Viewport),
    PopViewport,
    SetScissor(Scissor),
    SetCamera(Camera),
    PushCamera(Camera),
    PopCamera,
    SetClipPlanes(ClipPlaneSet),

    ReadBufferData {
        buffer: BufferHandle,
        range: std::ops::Range<u64>,
        dst_offset_in_staging: u64,
    },
    ClearBufferData {
        buffer: BufferHandle,
        range: std::ops::Range<u64>,
        value: u32,
    },

    BeginDebugScope { label: String },
    EndDebugScope,
    AddDebugMessage { label: String },

    ComputeMipmaps { texture: TextureHandle },

    DrawCommands(DrawCommand),
    DispatchShaderTask {
        group_count: [u32; 3],
        indirect_buffer: Option<BufferHandle>,
        indirect_offset: u64,
    },

    MemoryBarrier {
        buffers: Vec<BufferBarrier>,
        textures: Vec<TextureBarrier>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Idle,
    TargetBound,
    PipelineBound,
}

/// An append-only sequence of [`Command`]s recorded by one producer.
/// `scope_depth` tracks debug-scope nesting; `pass_state` models §4.C4's
/// render-pass state machine for validation.
pub struct CommandBuffer {
    pub label: String,
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Single pass over the buffer checking the submit-time rules: scope
    /// balance, render-pass state legality, handle liveness, and
    /// push-constant scoping. Pipeline/target format compatibility is
    /// left to the backend (it alone knows target formats).
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut pass_state = PassState::Idle;
        let mut debug_depth: i32 = 0;
        let mut pipeline_bound = false;

        fn require_valid<T>(handle: Handle<T>, command_index: usize, kind: &'static str) -> Result<(), ValidationError> {
            if handle.is_valid() {
                Ok(())
            } else {
                Err(ValidationError::StaleHandle { command_index, kind })
            }
        }

        for (index, command) in self.commands.iter().enumerate() {
            match command {
                Command::Blit { src, dst, .. } => {
                    require_valid(*src, index, "texture")?;
                    require_valid(*dst, index, "texture")?;
                }
                Command::CopyTexture { src, dst, .. } => {
                    require_valid(*src, index, "texture")?;
                    require_valid(*dst, index, "texture")?;
                }
                Command::ClearTexture { texture, .. } | Command::ComputeMipmaps { texture } => {
                    require_valid(*texture, index, "texture")?;
                }
                Command::ReadTexture { texture, dst_buffer, .. } => {
                    require_valid(*texture, index, "texture")?;
                    require_valid(*dst_buffer, index, "buffer")?;
                }
                Command::ReadBufferData { buffer, .. } | Command::ClearBufferData { buffer, .. } => {
                    require_valid(*buffer, index, "buffer")?;
                }
                Command::BeginQuery { pool, .. } | Command::EndQuery { pool, .. } => {
                    require_valid(*pool, index, "query pool")?;
                }
                Command::MemoryBarrier { buffers, textures } => {
                    for b in buffers {
                        require_valid(b.buffer, index, "buffer")?;
                    }
                    for t in textures {
                        require_valid(t.texture, index, "texture")?;
                    }
                }
                _ => {}
            }

            match command {
                Command::BeginRenderPass(_) => {
                    if pass_state != PassState::Idle {
                        return Err(ValidationError::NestedRenderPass { command_index: index });
                    }
                    pass_state = PassState::TargetBound;
                    pipeline_bound = false;
                }
                Command::EndRenderPass => {
                    if pass_state == PassState::Idle {
                        return Err(ValidationError::UnmatchedScope {
                            command_index: index,
                            expected: "BeginRenderPass",
                        });
                    }
                    pass_state = PassState::Idle;
                    pipeline_bound = false;
                }
                Command::BindPipeline(_) => {
                    if pass_state == PassState::Idle {
                        return Err(ValidationError::IllegalStateTransition { command_index: index });
                    }
                    pass_state = PassState::PipelineBound;
                    pipeline_bound = true;
                }
                Command::DrawCommands(draw) => {
                    if pass_state != PassState::PipelineBound {
                        return Err(ValidationError::IllegalStateTransition { command_index: index });
                    }
                    if let Some(indirect) = draw.indirect_buffer {
                        require_valid(indirect, index, "buffer")?;
                    }
                }
                Command::DispatchShaderTask { indirect_buffer, .. } => {
                    if pass_state != PassState::PipelineBound {
                        return Err(ValidationError::IllegalStateTransition { command_index: index });
                    }
                    if let Some(indirect) = indirect_buffer {
                        require_valid(*indirect, index, "buffer")?;
                    }
                }
                Command::SendPushConstants { .. } => {
                    if !pipeline_bound {
                        return Err(ValidationError::PushConstantOutsidePipelineScope { command_index: index });
                    }
                }
                Command::BeginDebugScope { .. } => debug_depth += 1,
                Command::EndDebugScope => {
                    debug_depth -= 1;
                    if debug_depth < 0 {
                        return Err(ValidationError::UnmatchedScope {
                            command_index: index,
                            expected: "BeginDebugScope",
                        });
                    }
                }
                _ => {}
            }
        }

        if pass_state != PassState::Idle {
            return Err(ValidationError::UnmatchedScope {
                command_index: self.commands.len(),
                expected: "EndRenderPass",
            });
        }
        if debug_depth != 0 {
            return Err(ValidationError::UnmatchedScope {
                command_index: self.commands.len(),
                expected: "EndDebugScope",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineDescriptor;

    #[test]
    fn camera_uniform_bytes_are_16_byte_aligned_and_stable_length() {
        let camera = Camera {
            view_proj: mint::ColumnMatrix4::from([[1.0; 4]; 4]),
            position: mint::Vector3::from([1.0, 2.0, 3.0]),
        };
        let bytes = camera.to_uniform_bytes();
        assert_eq!(bytes.len(), std::mem::size_of::<[f32; 4 * 4 + 4]>());
    }

    fn dummy_pass() -> RenderPassSpec {
        RenderPassSpec {
            color_attachments: Vec::new(),
            depth_attachment: None,
            clip_planes: ClipPlaneSet {
                planes: [ClipPlane::default(); MAX_CLIP_PLANES],
                count: 0,
            },
            draw_mask: 0,
        }
    }

    #[test]
    fn empty_buffer_is_valid() {
        let buffer = CommandBuffer::new("empty");
        assert!(buffer.validate().is_ok());
    }

    #[test]
    fn unmatched_scope_is_rejected() {
        let mut buffer = CommandBuffer::new("unbalanced");
        buffer.push(Command::BeginRenderPass(dummy_pass()));
        buffer.push(Command::BindPipeline(PipelineDescriptor::default()));
        buffer.push(Command::BeginRenderPass(dummy_pass()));
        match buffer.validate() {
            Err(ValidationError::NestedRenderPass { command_index: 2 }) => {}
            other => panic!("expected NestedRenderPass at index 2, got {other:?}"),
        }
    }

    #[test]
    fn push_constant_outside_pipeline_scope_is_rejected() {
        let mut buffer = CommandBuffer::new("pc");
        buffer.push(Command::BeginRenderPass(dummy_pass()));
        buffer.push(Command::SendPushConstants { offset: 0, data: vec![0; 4] });
        assert!(matches!(
            buffer.validate(),
            Err(ValidationError::PushConstantOutsidePipelineScope { command_index: 1 })
        ));
    }

    #[test]
    fn debug_scope_balance_round_trips() {
        let mut buffer = CommandBuffer::new("dbg");
        buffer.push(Command::BeginDebugScope { label: "x".into() });
        buffer.push(Command::EndDebugScope);
        assert!(buffer.validate().is_ok());
    }

    #[test]
    fn invalid_texture_handle_is_rejected() {
        let mut buffer = CommandBuffer::new("stale");
        buffer.push(Command::ClearTexture {
            texture: TextureHandle::invalid(),
            value: ClearValue { color: [0.0; 4], depth: 1.0, stencil: 0 },
        });
        match buffer.validate() {
            Err(ValidationError::StaleHandle { command_index: 0, kind: "texture" }) => {}
            other => panic!("expected StaleHandle at index 0, got {other:?}"),
        }
    }
}
