//! Render-API-agnostic command buffer, frame synchronization, and
//! transient allocator core (components C2-C5).
//!
//! Recording ([`command::CommandBuffer`]) may happen on any thread;
//! replay ([`backend::Context::submit`]) is strictly single-threaded.

pub mod backend;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod lock;
pub mod pipeline;
pub mod pipeline_cache_blob;
pub mod resource;
pub mod shader;
pub mod sync;
pub mod transient;

pub use command::{Command, CommandBuffer};
pub use config::{Config, RequestedBackend};
pub use error::{BackendError, ValidationError};
pub use handle::Handle;
pub use resource::{BufferDescriptor, BufferUsageFlags};
pub use shader::{traits::ShaderReflect, ReflectedShader, ShaderStageFlags};

/// Frames the engine may get ahead of the GPU before it must block.
/// Chosen as 3 to match the ring sizing convention used throughout the
/// rest of this family (triple buffering).
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
