//! Narrow capability interfaces for the systems this crate treats as
//! external: scene/culling, materials, and windowing. Replacing the
//! source's friend-class access with these traits is the "attorney
//! pattern -> capability interface" redesign.

use crate::stage::RenderStagePass;
use forge_graphics::command::{BufferHandle, SamplerHandle, TextureHandle};
use forge_graphics::pipeline::PipelineHandle;

#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    pub planes: [mint::Vector4<f32>; 6],
}

#[derive(Debug, Clone, Copy)]
pub struct Drawable {
    pub material: MaterialId,
    pub transform: mint::ColumnMatrix4<f32>,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    pub index_count: u32,
}

/// Supplies per-stage drawable lists given a frustum and pass filter.
/// Implemented by the scene graph / ECS, out of scope for this crate.
pub trait SceneProvider {
    fn drawables_for(&self, frustum: &Frustum, pass: RenderStagePass) -> Vec<Drawable>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone)]
pub struct UniformEntry {
    pub name: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TextureBinding {
    pub slot: u8,
    pub texture: TextureHandle,
    pub sampler: SamplerHandle,
}

#[derive(Debug, Clone)]
pub struct ResolvedMaterial {
    pub pipeline: PipelineHandle,
    pub textures: Vec<TextureBinding>,
    pub uniforms: Vec<UniformEntry>,
}

/// Resolves a material ID to concrete shader/texture/uniform bindings.
/// Implemented by the material/texture authoring system, out of scope.
pub trait MaterialResolver {
    fn resolve(&self, material: MaterialId) -> ResolvedMaterial;
}

#[derive(Debug, Clone, Copy)]
pub enum WindowEvent {
    Resized { width: u32, height: u32 },
    VisibilityChanged { visible: bool },
    CloseRequested,
}

/// Supplies the window handle/dimensions and emits lifecycle events,
/// polled once per frame boundary. Implemented by the windowing/input
/// bootstrap, out of scope.
pub trait WindowHost {
    fn poll_events(&mut self) -> Vec<WindowEvent>;
    fn framebuffer_size(&self) -> (u32, u32);
}
