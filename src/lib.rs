//! Sharp, simple real-time rendering core: a task pool, a render-API
//! agnostic command buffer, and the frame engine that drives them.
//!
//! Re-exports the three workspace members so a consumer depends on one
//! crate:
//! - [`forge_tasks`] - the worker-thread pool ([`tasks`]).
//! - [`forge_graphics`] - sync primitives, transient allocator, command
//!   buffer, and backend driver ([`graphics`]).
//! - [`forge_render`] - the frame engine ([`render`]).

pub use forge_graphics as graphics;
pub use forge_render as render;
pub use forge_tasks as tasks;
