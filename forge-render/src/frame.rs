use forge_graphics::sync::FrameIndex;

/// A single player's view snapshot for one frame; the scene provider
/// reads these to build its frustum.
#[derive(Debug, Clone, Copy)]
pub struct ViewSnapshot {
    pub view_proj: mint::ColumnMatrix4<f32>,
    pub position: mint::Vector3<f32>,
}

/// Current frame index, interpolation factor against the previous frame,
/// and the per-player view snapshots for this frame. Handed to every
/// stage's recording task.
pub struct FrameContext {
    pub frame_index: FrameIndex,
    pub interpolation_factor: f32,
    pub views: Vec<ViewSnapshot>,
}

impl FrameContext {
    pub fn new(frame_index: FrameIndex, interpolation_factor: f32, views: Vec<ViewSnapshot>) -> Self {
        Self {
            frame_index,
            interpolation_factor,
            views,
        }
    }
}
