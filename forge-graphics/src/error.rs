/// Backend-level failures. `DeviceLost` and the two swapchain variants are
/// recoverable by the frame engine; `ShaderCompileFailed` only disables the
/// affected pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("device lost")]
    DeviceLost,
    #[error("swapchain is out of date and must be recreated")]
    SurfaceOutOfDate,
    #[error("swapchain is suboptimal, recreate at the next convenient boundary")]
    SurfaceSuboptimal,
    #[error("shader compile failed in stage {stage}: {message}")]
    ShaderCompileFailed { stage: &'static str, message: String },
    #[error("no graphics backend could be initialized")]
    NoBackendAvailable,
}

/// Command-buffer structural failures, raised by [`crate::command::CommandBuffer::validate`].
///
/// Fatal in debug builds (the caller should `panic!`); logged-and-skipped
/// in release, per the error-handling design.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("command {command_index}: unmatched {expected}")]
    UnmatchedScope {
        command_index: usize,
        expected: &'static str,
    },
    #[error("command {command_index}: stale or unknown {kind} handle")]
    StaleHandle {
        command_index: usize,
        kind: &'static str,
    },
    #[error("command {command_index}: pipeline incompatible with bound render target")]
    IncompatiblePipeline { command_index: usize },
    #[error("command {command_index}: push constants sent outside a bound-pipeline scope")]
    PushConstantOutsidePipelineScope { command_index: usize },
    #[error("command {command_index}: nested render pass is not permitted")]
    NestedRenderPass { command_index: usize },
    #[error("command {command_index}: command issued outside the expected render-pass state")]
    IllegalStateTransition { command_index: usize },
}

/// Asserts in debug builds, logs-and-returns in release, matching the
/// "fatal in debug, logged-and-skip in release" rule from the error design.
#[track_caller]
pub fn report_validation_error(err: ValidationError) -> Result<(), ValidationError> {
    if cfg!(debug_assertions) {
        panic!("command buffer validation failed: {err}");
    } else {
        log::error!("command buffer validation failed, skipping buffer: {err}");
        Err(err)
    }
}
