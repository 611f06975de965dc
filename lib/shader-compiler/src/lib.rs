//! GLSL cross-compilation front for the gpu-api backends.
//!
//! Shader sources reach the backend as GLSL fragments plus caller-supplied
//! prefix snippets. Native drivers want HLSL, so the build pipeline is:
//!
//! 1. Compose one translation unit per stage: a stage define, the caller
//!    prefixes, one `_HAS_ATTR<n>` define per declared vertex attribute,
//!    then the stage's source fragments.
//! 2. Parse the unit with naga's GLSL front-end and validate the IR.
//! 3. Emit SPIR-V with debug info retained and no optimization.
//! 4. Cross-compile the SPIR-V to HLSL at shader model 5.0 via SPIRV-Cross.
//!
//! The final HLSL to bytecode step belongs to the backend that owns the
//! driver compiler; this crate stops at HLSL text.
//!
//! Compute sources must not reference `gl_NumWorkGroups`: HLSL has no
//! equivalent builtin, so the build is rejected up front with a diagnostic
//! pointing at user-provided uniforms instead.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use spirv_cross::{hlsl, spirv};
use thiserror::Error;

/// Pipeline stage a source fragment belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl Stage {
    fn define(self) -> &'static str {
        match self {
            Self::Compute => "#define _COMPUTE_SHADER\n",
            Self::Geometry => "#define _GEOMETRY_SHADER\n",
            Self::Fragment => "#define _FRAGMENT_SHADER\n",
            Self::Vertex => "#define _VERTEX_SHADER\n",
        }
    }

    fn to_naga(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Fragment => naga::ShaderStage::Fragment,
            // naga has no geometry stage; geometry sources are rejected in
            // `glsl_to_spirv` before this conversion is reached.
            Self::Geometry => naga::ShaderStage::Vertex,
            Self::Compute => naga::ShaderStage::Compute,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Validation(String),
    #[error("SPIR-V emission failed: {0}")]
    SpvWrite(String),
    #[error("cross-compilation failed: {0}")]
    Cross(String),
    #[error("geometry shaders are not supported by the GLSL front-end")]
    GeometryUnsupported,
    #[error(
        "compute shaders must not reference gl_NumWorkGroups; there is no \
         HLSL equivalent, pass the counts via a user-provided uniform instead"
    )]
    NumWorkGroups,
    #[error("shader sources must not declare #version; it is injected")]
    VersionDirective,
}

/// One stage's worth of composition input.
pub struct StageSources<'a> {
    pub stage: Stage,
    /// Source fragments for this stage, concatenated in order.
    pub sources: &'a [&'a str],
    /// Caller prefix snippets, shared across stages.
    pub prefixes: &'a [&'a str],
    /// Declared vertex attribute locations; each emits `_HAS_ATTR<n>`.
    pub attributes: &'a [u8],
}

const GLSL_VERSION_DIRECTIVE: &str = "#version 450 core\n";

/// Compose the translation unit for a stage.
///
/// The version directive is injected first so the defines that follow stay
/// legal; source fragments carrying their own `#version` are rejected.
pub fn compose(input: &StageSources<'_>) -> Result<String, CompileError> {
    for src in input.sources.iter().chain(input.prefixes.iter()) {
        if src.contains("#version") {
            return Err(CompileError::VersionDirective);
        }
    }

    let mut unit = String::with_capacity(
        input.sources.iter().map(|s| s.len()).sum::<usize>() + 256,
    );
    unit.push_str(GLSL_VERSION_DIRECTIVE);
    unit.push_str(input.stage.define());
    for prefix in input.prefixes {
        unit.push_str(prefix);
        unit.push('\n');
    }
    for location in input.attributes {
        unit.push_str(&format!("#define _HAS_ATTR{location}\n"));
    }
    for src in input.sources {
        unit.push_str(src);
        unit.push('\n');
    }
    Ok(unit)
}

/// Compile a composed GLSL unit to SPIR-V.
///
/// Debug info is kept and the module is left unoptimized so the HLSL that
/// comes out the other side stays diagnosable.
pub fn glsl_to_spirv(source: &str, stage: Stage) -> Result<Vec<u32>, CompileError> {
    if stage == Stage::Geometry {
        return Err(CompileError::GeometryUnsupported);
    }
    if stage == Stage::Compute && references_num_workgroups(source) {
        return Err(CompileError::NumWorkGroups);
    }

    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(stage.to_naga());
    let module = frontend
        .parse(&options, source)
        .map_err(|e| CompileError::Parse(format!("{e:?}")))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| CompileError::Validation(format!("{e:?}")))?;

    let spv_options = naga::back::spv::Options {
        lang_version: (1, 4),
        flags: naga::back::spv::WriterFlags::DEBUG,
        ..Default::default()
    };
    naga::back::spv::write_vec(&module, &info, &spv_options, None)
        .map_err(|e| CompileError::SpvWrite(format!("{e:?}")))
}

/// Cross-compile a SPIR-V module to HLSL at shader model 5.0.
pub fn spirv_to_hlsl(words: &[u32]) -> Result<String, CompileError> {
    let module = spirv::Module::from_words(words);
    let mut ast = spirv::Ast::<hlsl::Target>::parse(&module)
        .map_err(|e| CompileError::Cross(format!("{e:?}")))?;

    let mut options = hlsl::CompilerOptions::default();
    options.shader_model = hlsl::ShaderModel::V5_0;
    ast.set_compiler_options(&options)
        .map_err(|e| CompileError::Cross(format!("{e:?}")))?;

    ast.compile()
        .map_err(|e| CompileError::Cross(format!("{e:?}")))
}

/// Full pipeline: compose, parse, emit SPIR-V, cross-compile to HLSL.
///
/// `name` only feeds diagnostics.
pub fn glsl_to_hlsl(input: &StageSources<'_>, name: &str) -> Result<String, CompileError> {
    let unit = compose(input)?;
    let spirv = glsl_to_spirv(&unit, input.stage).map_err(|e| {
        log::error!("{name}: {e}");
        e
    })?;
    spirv_to_hlsl(&spirv).map_err(|e| {
        log::error!("{name}: {e}");
        e
    })
}

fn references_num_workgroups(source: &str) -> bool {
    // Stands in for the cross-compiler's remap-builtin query, which the
    // spirv_cross binding does not expose.
    source.contains("gl_NumWorkGroups")
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "
        layout(location = 0) in vec3 a_position;
        void main() {
            gl_Position = vec4(a_position, 1.0);
        }";

    const FS: &str = "
        layout(location = 0) out vec4 o_color;
        void main() {
            o_color = vec4(1.0, 0.0, 0.0, 1.0);
        }";

    const CS: &str = "
        layout(local_size_x = 8, local_size_y = 8) in;
        void main() {
        }";

    #[test]
    fn compose_orders_version_defines_sources() {
        let unit = compose(&StageSources {
            stage: Stage::Vertex,
            sources: &[VS],
            prefixes: &["#define FOO 1"],
            attributes: &[0, 3],
        })
        .unwrap();

        let version_at = unit.find("#version").unwrap();
        let stage_at = unit.find("_VERTEX_SHADER").unwrap();
        let prefix_at = unit.find("FOO").unwrap();
        let attr_at = unit.find("_HAS_ATTR0").unwrap();
        let attr3_at = unit.find("_HAS_ATTR3").unwrap();
        let src_at = unit.find("a_position").unwrap();
        assert!(version_at < stage_at);
        assert!(stage_at < prefix_at);
        assert!(prefix_at < attr_at);
        assert!(attr_at < attr3_at);
        assert!(attr3_at < src_at);
    }

    #[test]
    fn compose_rejects_caller_version() {
        let err = compose(&StageSources {
            stage: Stage::Vertex,
            sources: &["#version 450\nvoid main() {}"],
            prefixes: &[],
            attributes: &[],
        });
        assert!(matches!(err, Err(CompileError::VersionDirective)));
    }

    #[test]
    fn vertex_shader_cross_compiles() {
        let hlsl = glsl_to_hlsl(
            &StageSources {
                stage: Stage::Vertex,
                sources: &[VS],
                prefixes: &[],
                attributes: &[0],
            },
            "test_vs",
        )
        .unwrap();
        assert!(hlsl.contains("main"));
        assert!(hlsl.contains("SV_Position"));
    }

    #[test]
    fn fragment_shader_cross_compiles() {
        let hlsl = glsl_to_hlsl(
            &StageSources {
                stage: Stage::Fragment,
                sources: &[FS],
                prefixes: &[],
                attributes: &[],
            },
            "test_fs",
        )
        .unwrap();
        assert!(hlsl.contains("main"));
    }

    #[test]
    fn compute_shader_cross_compiles() {
        let hlsl = glsl_to_hlsl(
            &StageSources {
                stage: Stage::Compute,
                sources: &[CS],
                prefixes: &[],
                attributes: &[],
            },
            "test_cs",
        )
        .unwrap();
        assert!(hlsl.contains("numthreads"));
    }

    #[test]
    fn num_workgroups_is_rejected() {
        let src = "
            layout(local_size_x = 1) in;
            layout(std430, binding = 0) buffer Out { uvec3 counts; };
            void main() {
                counts = gl_NumWorkGroups;
            }";
        let err = glsl_to_hlsl(
            &StageSources {
                stage: Stage::Compute,
                sources: &[src],
                prefixes: &[],
                attributes: &[],
            },
            "test_bad_cs",
        );
        assert!(matches!(err, Err(CompileError::NumWorkGroups)));
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = glsl_to_hlsl(
            &StageSources {
                stage: Stage::Vertex,
                sources: &["void main() { this is not glsl }"],
                prefixes: &[],
                attributes: &[],
            },
            "test_broken",
        );
        assert!(matches!(err, Err(CompileError::Parse(_))));
    }
}
