//! Program build: GLSL fragments cross-compile to HLSL through the
//! shader-compiler crate, then the driver compiler turns the HLSL into
//! bytecode. Vertex attributes become the input layout.

use std::ffi::{CStr, CString};

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::{
    D3DCompile, D3DCOMPILE_DEBUG, D3DCOMPILE_PACK_MATRIX_COLUMN_MAJOR,
};
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;

use super::resources::{attribute_dxgi_format, Program};
use crate::{GfxError, GfxResult, ShaderSource, ShaderStage, VertexDecl, MAX_ATTRIBUTES};

const SEMANTIC_NAME: &[u8] = b"TEXCOORD\0";

fn target_profile(stage: ShaderStage) -> &'static [u8] {
    match stage {
        ShaderStage::Vertex => b"vs_5_0\0",
        ShaderStage::Fragment => b"ps_5_0\0",
        ShaderStage::Geometry => b"gs_5_0\0",
        ShaderStage::Compute => b"cs_5_0\0",
    }
}

fn compile_hlsl(hlsl: &str, stage: ShaderStage, name: &str) -> GfxResult<ID3DBlob> {
    let source =
        CString::new(hlsl).map_err(|_| GfxError::Shader("shader text contains NUL".to_string()))?;
    let diag_name = CString::new(name).unwrap_or_default();

    let mut output: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const core::ffi::c_void,
            hlsl.len(),
            PCSTR(diag_name.as_ptr() as _),
            None,
            None,
            PCSTR(b"main\0".as_ptr()),
            PCSTR(target_profile(stage).as_ptr()),
            D3DCOMPILE_PACK_MATRIX_COLUMN_MAJOR | D3DCOMPILE_DEBUG,
            0,
            &mut output,
            Some(&mut errors),
        )
    };

    if let Some(errors) = errors {
        let text = unsafe {
            CStr::from_ptr(errors.GetBufferPointer() as *const i8)
                .to_string_lossy()
                .into_owned()
        };
        if result.is_ok() {
            log::info!("{name}: {text}");
        } else {
            log::error!("{name}: {text}");
        }
    }
    result.map_err(GfxError::from)?;
    output.ok_or_else(|| GfxError::Shader(format!("{name}: compiler produced no bytecode")))
}

fn compile_stage(
    stage: ShaderStage,
    sources: &[ShaderSource<'_>],
    prefixes: &[&str],
    attributes: &[u8],
    name: &str,
) -> GfxResult<Option<ID3DBlob>> {
    let stage_sources: Vec<&str> = sources
        .iter()
        .filter(|s| s.stage == stage)
        .map(|s| s.code)
        .collect();
    if stage_sources.is_empty() {
        return Ok(None);
    }

    let hlsl = shader_compiler::glsl_to_hlsl(
        &shader_compiler::StageSources {
            stage: stage.to_compiler(),
            sources: &stage_sources,
            prefixes,
            attributes,
        },
        name,
    )?;
    compile_hlsl(&hlsl, stage, name).map(Some)
}

pub(crate) fn build_program(
    decl: &VertexDecl,
    sources: &[ShaderSource<'_>],
    prefixes: &[&str],
    name: &str,
) -> GfxResult<Program> {
    let attribute_locations: Vec<u8> = decl.attributes().iter().map(|a| a.location).collect();

    let vs = compile_stage(ShaderStage::Vertex, sources, prefixes, &attribute_locations, name)?;
    let ps = compile_stage(
        ShaderStage::Fragment,
        sources,
        prefixes,
        &attribute_locations,
        name,
    )?;
    let cs = compile_stage(
        ShaderStage::Compute,
        sources,
        prefixes,
        &attribute_locations,
        name,
    )?;
    let gs = compile_stage(
        ShaderStage::Geometry,
        sources,
        prefixes,
        &attribute_locations,
        name,
    )?;

    let mut attributes: [D3D12_INPUT_ELEMENT_DESC; MAX_ATTRIBUTES] = Default::default();
    for (element, attr) in attributes.iter_mut().zip(decl.attributes().iter()) {
        *element = D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(SEMANTIC_NAME.as_ptr()),
            SemanticIndex: attr.location as u32,
            Format: attribute_dxgi_format(attr.ty, attr.components),
            InputSlot: if attr.instanced { 1 } else { 0 },
            AlignedByteOffset: attr.byte_offset as u32,
            InputSlotClass: if attr.instanced {
                D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA
            } else {
                D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA
            },
            InstanceDataStepRate: if attr.instanced { 1 } else { 0 },
        };
    }

    Ok(Program {
        vs,
        ps,
        gs,
        cs,
        attributes,
        attribute_count: decl.attributes().len() as u32,
        attribute_hash: decl.hash(),
    })
}
