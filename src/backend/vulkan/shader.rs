//! WGSL to SPIR-V translation through naga

use crate::backend::traits::{BackendError, BackendResult};

/// Parse and validate `source` once, then emit one SPIR-V blob per entry point.
pub fn compile_wgsl(source: &str, entries: &[(naga::ShaderStage, &str)]) -> BackendResult<Vec<Vec<u32>>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        BackendError::ShaderCreationFailed(format!("WGSL parse error: {}", e.emit_to_string(source)))
    })?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| BackendError::ShaderCreationFailed(format!("Shader validation error: {e}")))?;

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        ..Default::default()
    };

    entries
        .iter()
        .map(|&(stage, entry_point)| {
            let found = module
                .entry_points
                .iter()
                .any(|ep| ep.name == entry_point && ep.stage == stage);
            if !found {
                return Err(BackendError::ShaderCreationFailed(format!(
                    "Entry point '{entry_point}' ({stage:?}) not found"
                )));
            }

            let pipeline_options = naga::back::spv::PipelineOptions {
                shader_stage: stage,
                entry_point: entry_point.to_string(),
            };
            naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
                .map_err(|e| BackendError::ShaderCreationFailed(format!("SPIR-V generation error: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    return out;
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_both_stages_compile() {
        let blobs = compile_wgsl(
            TRIANGLE,
            &[
                (naga::ShaderStage::Vertex, "vs_main"),
                (naga::ShaderStage::Fragment, "fs_main"),
            ],
        )
        .unwrap();
        assert_eq!(blobs.len(), 2);
        assert!(blobs.iter().all(|spv| spv.first() == Some(&SPIRV_MAGIC)));
    }

    #[test]
    fn test_missing_entry_point_is_an_error() {
        let result = compile_wgsl(TRIANGLE, &[(naga::ShaderStage::Fragment, "vs_main")]);
        assert!(matches!(result, Err(BackendError::ShaderCreationFailed(_))));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = compile_wgsl("fn broken(", &[(naga::ShaderStage::Vertex, "vs_main")]);
        assert!(matches!(result, Err(BackendError::ShaderCreationFailed(_))));
    }
}
