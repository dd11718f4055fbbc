//! WGSL reflection shared by both backends: parsing, validation, and
//! entry-point metadata. Ported from the teacher's `load_shader`, which
//! pulls entry-point stage and workgroup-size information out of a naga
//! module before handing it to the concrete API.

use crate::error::BackendError;
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{self, termcolor::{Buffer, ColorChoice}};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
    }
}

impl From<naga::ShaderStage> for ShaderStageFlags {
    fn from(stage: naga::ShaderStage) -> Self {
        match stage {
            naga::ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            naga::ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
            naga::ShaderStage::Compute => ShaderStageFlags::COMPUTE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReflectedShader {
    pub entry_points: Vec<String>,
    pub stages: ShaderStageFlags,
    pub workgroup_size: [u32; 3],
}

/// Parses and validates a WGSL module, returning both the module (for
/// the caller to translate into the target API's shading language) and
/// the entry-point metadata the pipeline cache keys on.
pub fn reflect_wgsl(label: &str, source: &str) -> Result<(naga::Module, ReflectedShader), BackendError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| {
        BackendError::ShaderCompileFailed {
            stage: "parse",
            message: render_diagnostic(label, source, &err.emit_to_string(source)),
        }
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    let info = validator.validate(&module).map_err(|err| BackendError::ShaderCompileFailed {
        stage: "validate",
        message: render_diagnostic(label, source, &err.to_string()),
    })?;

    let mut stages = ShaderStageFlags::empty();
    let mut entry_points = Vec::new();
    let mut workgroup_size = [0u32; 3];
    for (index, ep) in module.entry_points.iter().enumerate() {
        stages |= ShaderStageFlags::from(ep.stage);
        entry_points.push(ep.name.clone());
        if ep.stage == naga::ShaderStage::Compute {
            workgroup_size = ep.workgroup_size;
        }
        let _ = info.get_entry_point(index);
    }

    Ok((
        module,
        ReflectedShader {
            entry_points,
            stages,
            workgroup_size,
        },
    ))
}

/// Pretty-prints a naga error against the offending source, the way a
/// shader-compile failure should be surfaced to a developer rather than
/// as a bare error string.
fn render_diagnostic(label: &str, source: &str, message: &str) -> String {
    let file = SimpleFile::new(label, source);
    let diagnostic = codespan_reporting::diagnostic::Diagnostic::error().with_message(message);
    let mut buffer = Buffer::no_color();
    let config = term::Config::default();
    let _ = term::emit(&mut buffer, &config, &file, &diagnostic);
    String::from_utf8_lossy(buffer.as_slice()).into_owned()
}

/// Mirrors the teacher's `#[hidden_trait::expose]` split: reflection is
/// defined as a trait so it can live in its own module, but callers see
/// it as an inherent method on `Context`.
pub mod traits {
    use super::ReflectedShader;
    use crate::error::BackendError;

    pub trait ShaderReflect {
        fn reflect_shader(&self, label: &'static str, source: &str) -> Result<ReflectedShader, BackendError>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_compute_shader_reflects_workgroup_size() {
        let source = r#"
            @compute @workgroup_size(8, 8, 1)
            fn main() {}
        "#;
        let (_, reflected) = reflect_wgsl("test", source).unwrap();
        assert_eq!(reflected.workgroup_size, [8, 8, 1]);
        assert!(reflected.stages.contains(ShaderStageFlags::COMPUTE));
    }

    #[test]
    fn malformed_source_reports_a_rendered_diagnostic() {
        let err = reflect_wgsl("broken", "fn main( {").unwrap_err();
        match err {
            BackendError::ShaderCompileFailed { stage, message } => {
                assert_eq!(stage, "parse");
                assert!(!message.is_empty());
            }
            other => panic!("expected ShaderCompileFailed, got {other:?}"),
        }
    }
}
