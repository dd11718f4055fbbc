//! Frame engine (component C6): advances the frame index, fans out
//! per-stage command-buffer recording onto the task pool in a fixed
//! dependency order, and drives the swapchain present.

pub mod collaborators;
pub mod engine;
pub mod frame;
pub mod stage;

pub use collaborators::{Drawable, Frustum, MaterialId, MaterialResolver, ResolvedMaterial, SceneProvider, WindowEvent, WindowHost};
pub use engine::FrameEngine;
pub use frame::{FrameContext, ViewSnapshot};
pub use stage::{RenderStage, RenderStagePass, STAGE_ORDER};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_fixed_and_acyclic() {
        assert_eq!(STAGE_ORDER.len(), 5);
        for (i, stage) in STAGE_ORDER.iter().enumerate() {
            for upstream in stage.upstream() {
                let upstream_index = STAGE_ORDER.iter().position(|s| s == upstream).unwrap();
                assert!(upstream_index < i, "{stage:?} depends on a later stage {upstream:?}");
            }
        }
    }
}
