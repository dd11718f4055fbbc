//! Cross-crate integration tests driven entirely through the `forge`
//! umbrella crate's public surface (`forge::{tasks, graphics, render}`),
//! the way a downstream consumer would use it. These exercise the seams
//! between the three workspace members without needing a live GPU
//! backend, mirroring the split blade-graphics keeps between its
//! in-module unit tests and its `tests/` integration suite.

use forge::graphics::command::{BufferHandle, Command, CommandBuffer, SamplerHandle, TextureHandle};
use forge::graphics::descriptor::{CombinedImageSampler, DescriptorSet, ResourceBinding, UsageClass};
use forge::graphics::lock::{BufferId, LockManager};
use forge::graphics::pipeline::PipelineHandle;
use forge::graphics::transient::{
    BindingMode, TransientBuffer, TransientBufferDescriptor, TransientUsage, UniformBlockUploader, UniformWrite,
    UpdateFrequency,
};
use forge::render::{Drawable, Frustum, MaterialId, MaterialResolver, ResolvedMaterial, SceneProvider};
use forge::render::{RenderStage, RenderStagePass};
use forge::tasks::{TaskPool, TaskPoolConfig, TaskPriority};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct OneTriangleScene;

impl SceneProvider for OneTriangleScene {
    fn drawables_for(&self, _frustum: &Frustum, pass: RenderStagePass) -> Vec<Drawable> {
        if pass.stage != RenderStage::Shadow {
            return Vec::new();
        }
        vec![Drawable {
            material: MaterialId(7),
            transform: [[1.0; 4]; 4].into(),
            vertex_buffer: BufferHandle::new(0, 0),
            index_buffer: None,
            index_count: 3,
        }]
    }
}

struct OneTextureMaterial;

impl MaterialResolver for OneTextureMaterial {
    fn resolve(&self, material: MaterialId) -> ResolvedMaterial {
        assert_eq!(material, MaterialId(7));
        ResolvedMaterial {
            pipeline: PipelineHandle::new(0, 0),
            textures: vec![forge::render::collaborators::TextureBinding {
                slot: 0,
                texture: TextureHandle::new(0, 0),
                sampler: SamplerHandle::new(0, 0),
            }],
            uniforms: Vec::new(),
        }
    }
}

/// Records one drawable the way the frame engine's stage recording
/// does: resolve its material, bind it, and draw. Exercises
/// `forge_render`'s collaborator traits together with `forge_graphics`'s
/// command/descriptor types end to end.
#[test]
fn scene_and_material_collaborators_compose_into_a_valid_command_buffer() {
    let scene = OneTriangleScene;
    let materials = OneTextureMaterial;

    let frustum = Frustum {
        planes: [mint::Vector4::from([0.0, 0.0, 0.0, 0.0]); 6],
    };
    let drawables = scene.drawables_for(
        &frustum,
        RenderStagePass {
            stage: RenderStage::Shadow,
            pass_index: 0,
        },
    );
    assert_eq!(drawables.len(), 1);

    let mut buffer = CommandBuffer::new("integration-shadow-pass");
    buffer.push(Command::BeginRenderPass(forge::graphics::command::RenderPassSpec {
        color_attachments: Vec::new(),
        depth_attachment: None,
        clip_planes: forge::graphics::command::ClipPlaneSet {
            planes: [forge::graphics::command::ClipPlane::default(); forge::graphics::command::MAX_CLIP_PLANES],
            count: 0,
        },
        draw_mask: u32::MAX,
    }));

    for drawable in &drawables {
        let resolved = materials.resolve(drawable.material);
        buffer.push(Command::BindPipeline(
            forge::graphics::pipeline::PipelineDescriptor {
                shader_program: resolved.pipeline.raw() as u64,
                ..Default::default()
            },
        ));
        let mut set = DescriptorSet::new();
        for binding in &resolved.textures {
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
        buffer.push(Command::DrawCommands(forge::graphics::command::DrawCommand {
            indexed: drawable.index_buffer.is_some(),
            index_type: forge::graphics::command::IndexType::U32,
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
    buffer.push(Command::EndRenderPass);

    buffer.validate().expect("composed buffer must validate");
    assert!(buffer.commands().iter().any(|c| matches!(c, Command::DrawCommands(_))));
}

/// Drives a camera-uniform ring through a full write/upload/retire
/// cycle the way the frame engine's per-frame loop does, composing
/// `transient::TransientBuffer`, `transient::UniformBlockUploader`, and
/// `lock::LockManager` from `forge_graphics`.
#[test]
fn uniform_ring_upload_blocks_readback_until_its_lock_retires() {
    let mut uploader = UniformBlockUploader::default();
    uploader.register_layout("camera", vec![("camera_block", 0..64)]);

    let mut ring = TransientBuffer::new(
        BufferId::default(),
        TransientBufferDescriptor {
            element_size: 64,
            element_count: 1,
            usage: TransientUsage::Uniform,
            update_frequency: UpdateFrequency::Frequent,
            binding_mode: BindingMode::PerUse,
            label: "integration-camera-uniforms",
        },
        3,
        256,
    );
    let mut locks = LockManager::default();

    let bytes = vec![0xAB_u8; 64];
    let lock = uploader.upload(&mut ring, &mut locks, 5, "camera", &[UniformWrite {
        name: "camera_block",
        bytes: bytes.clone(),
    }]);

    let mut waited_for = Vec::new();
    let read_back = ring
        .read_bytes(lock.range.clone(), &mut locks, |frame| waited_for.push(frame))
        .to_vec();

    assert_eq!(read_back, bytes);
    assert_eq!(waited_for, vec![5]);

    ring.advance_write_index();
    ring.retire_read_slot();
    // Several frames later the lock's creating frame (5) is outside the
    // 3-frame retention window, so garbage collection drops it.
    locks.garbage_collect(9, 3);
    assert_eq!(locks.outstanding_for(ring.id), 0);
}

/// A dependent task tree spanning `forge_tasks` fans out per-stage work
/// the way `forge_render`'s stage board does, confirming the pool
/// actually runs every stage exactly once and in the order its parent
/// completion callbacks are released.
#[test]
fn task_pool_runs_a_stage_shaped_dependent_tree_to_completion() {
    let pool = TaskPool::new(TaskPoolConfig::default());
    let completed = Arc::new(AtomicUsize::new(0));

    let parent = pool.spawn(TaskPriority::DontCare, {
        let completed = Arc::clone(&completed);
        move |_| {
            completed.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut children = Vec::new();
    for _ in 0..4 {
        let completed = Arc::clone(&completed);
        children.push(pool.spawn_child(&parent, TaskPriority::DontCare, move |_| {
            completed.fetch_add(1, Ordering::SeqCst);
        }));
    }

    pool.wait(&parent);
    for child in &children {
        pool.wait(child);
    }
    pool.wait_for_all(true);

    assert_eq!(completed.load(Ordering::SeqCst), 5);
}
