//! Pipeline-state cache.
//!
//! Graphics pipelines key on the packed state tuple, the program, its
//! attribute layout, the bound framebuffer formats and the topology type;
//! compute pipelines key on the program alone. The cache never evicts; the
//! combinatorial space an application reaches in steady state bounds it.

use std::hash::{Hash, Hasher};

use fnv::{FnvHashMap, FnvHasher};
use windows::Win32::Foundation::BOOL;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;

use super::resources::Program;
use crate::{
    BlendFactor, GfxResult, ProgramHandle, RenderState, StateFlags, StencilFunc, StencilOp,
    MAX_COLOR_ATTACHMENTS,
};

/// Everything a graphics pipeline's identity depends on. Hashed instead of
/// the raw descriptor memory, which embeds blob pointers.
#[derive(Hash)]
struct GraphicsKey {
    state: u64,
    program: u32,
    attribute_hash: u32,
    color_formats: [u32; MAX_COLOR_ATTACHMENTS],
    color_count: u32,
    ds_format: u32,
    topology_type: i32,
}

fn graphics_key_hash(
    state: RenderState,
    program_index: u32,
    attribute_hash: u32,
    color_formats: &[DXGI_FORMAT],
    ds_format: DXGI_FORMAT,
    topology_type: D3D12_PRIMITIVE_TOPOLOGY_TYPE,
) -> u32 {
    let mut key = GraphicsKey {
        state: state.0,
        program: program_index,
        attribute_hash,
        color_formats: [0; MAX_COLOR_ATTACHMENTS],
        color_count: color_formats.len() as u32,
        ds_format: ds_format.0,
        topology_type: topology_type.0,
    };
    for (dst, src) in key.color_formats.iter_mut().zip(color_formats.iter()) {
        *dst = src.0;
    }
    let mut hasher = FnvHasher::default();
    key.hash(&mut hasher);
    hasher.finish() as u32
}

pub(crate) struct PipelineCache {
    pipelines: FnvHashMap<u32, ID3D12PipelineState>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self {
            pipelines: FnvHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn get_graphics(
        &mut self,
        device: &ID3D12Device,
        root_signature: &ID3D12RootSignature,
        program_handle: ProgramHandle,
        program: &Program,
        state: RenderState,
        color_formats: &[DXGI_FORMAT],
        ds_format: DXGI_FORMAT,
        topology_type: D3D12_PRIMITIVE_TOPOLOGY_TYPE,
    ) -> GfxResult<ID3D12PipelineState> {
        let hash = graphics_key_hash(
            state,
            program_handle.index() as u32,
            program.attribute_hash,
            color_formats,
            ds_format,
            topology_type,
        );

        if let Some(pso) = self.pipelines.get(&hash) {
            return Ok(pso.clone());
        }

        let desc = graphics_desc(
            root_signature,
            program,
            state,
            color_formats,
            ds_format,
            topology_type,
        );
        let pso: ID3D12PipelineState = unsafe { device.CreateGraphicsPipelineState(&desc)? };
        self.pipelines.insert(hash, pso.clone());
        Ok(pso)
    }

    pub fn get_compute(
        &mut self,
        device: &ID3D12Device,
        root_signature: &ID3D12RootSignature,
        program_handle: ProgramHandle,
        program: &Program,
    ) -> GfxResult<ID3D12PipelineState> {
        let mut hasher = FnvHasher::default();
        "compute".hash(&mut hasher);
        (program_handle.index() as u32).hash(&mut hasher);
        let hash = hasher.finish() as u32;

        if let Some(pso) = self.pipelines.get(&hash) {
            return Ok(pso.clone());
        }

        let cs = program.cs.as_ref().expect("compute program without CS");
        let desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
            CS: bytecode(Some(cs)),
            NodeMask: 1,
            Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
            ..Default::default()
        };
        let pso: ID3D12PipelineState = unsafe { device.CreateComputePipelineState(&desc)? };
        self.pipelines.insert(hash, pso.clone());
        Ok(pso)
    }
}

fn bytecode(blob: Option<&windows::Win32::Graphics::Direct3D::ID3DBlob>) -> D3D12_SHADER_BYTECODE {
    match blob {
        Some(blob) => D3D12_SHADER_BYTECODE {
            pShaderBytecode: unsafe { blob.GetBufferPointer() },
            BytecodeLength: unsafe { blob.GetBufferSize() },
        },
        None => D3D12_SHADER_BYTECODE {
            pShaderBytecode: std::ptr::null_mut(),
            BytecodeLength: 0,
        },
    }
}

fn to_d3d12_blend(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcColor => D3D12_BLEND_SRC_COLOR,
        BlendFactor::InvSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::InvSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstColor => D3D12_BLEND_DEST_COLOR,
        BlendFactor::InvDstColor => D3D12_BLEND_INV_DEST_COLOR,
        BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::InvDstAlpha => D3D12_BLEND_INV_DEST_ALPHA,
        BlendFactor::Src1Color => D3D12_BLEND_SRC1_COLOR,
        BlendFactor::InvSrc1Color => D3D12_BLEND_INV_SRC1_COLOR,
        BlendFactor::Src1Alpha => D3D12_BLEND_SRC1_ALPHA,
        BlendFactor::InvSrc1Alpha => D3D12_BLEND_INV_SRC1_ALPHA,
    }
}

fn to_d3d12_stencil_op(op: StencilOp) -> D3D12_STENCIL_OP {
    match op {
        StencilOp::Keep => D3D12_STENCIL_OP_KEEP,
        StencilOp::Zero => D3D12_STENCIL_OP_ZERO,
        StencilOp::Replace => D3D12_STENCIL_OP_REPLACE,
        StencilOp::IncrSat => D3D12_STENCIL_OP_INCR_SAT,
        StencilOp::DecrSat => D3D12_STENCIL_OP_DECR_SAT,
        StencilOp::Invert => D3D12_STENCIL_OP_INVERT,
        StencilOp::Incr => D3D12_STENCIL_OP_INCR,
        StencilOp::Decr => D3D12_STENCIL_OP_DECR,
    }
}

fn graphics_desc(
    root_signature: &ID3D12RootSignature,
    program: &Program,
    state: RenderState,
    color_formats: &[DXGI_FORMAT],
    ds_format: DXGI_FORMAT,
    topology_type: D3D12_PRIMITIVE_TOPOLOGY_TYPE,
) -> D3D12_GRAPHICS_PIPELINE_STATE_DESC {
    let flags = state.flags();

    let cull_mode = if flags.contains(StateFlags::CULL_BACK) {
        D3D12_CULL_MODE_BACK
    } else if flags.contains(StateFlags::CULL_FRONT) {
        D3D12_CULL_MODE_FRONT
    } else {
        D3D12_CULL_MODE_NONE
    };

    let depth_test = flags.contains(StateFlags::DEPTH_TEST);
    let stencil_func = state.stencil_func();
    let stencil_enable = stencil_func != StencilFunc::Disable;

    let mut depth_stencil = D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: BOOL::from(depth_test),
        DepthWriteMask: if depth_test && flags.contains(StateFlags::DEPTH_WRITE) {
            D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            D3D12_DEPTH_WRITE_MASK_ZERO
        },
        // reversed depth; no test means every fragment passes
        DepthFunc: if depth_test {
            D3D12_COMPARISON_FUNC_GREATER_EQUAL
        } else {
            D3D12_COMPARISON_FUNC_ALWAYS
        },
        StencilEnable: BOOL::from(stencil_enable),
        ..Default::default()
    };
    if stencil_enable {
        let func = match stencil_func {
            StencilFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
            StencilFunc::Equal => D3D12_COMPARISON_FUNC_EQUAL,
            StencilFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
            StencilFunc::Disable => unreachable!(),
        };
        let (sfail, zfail, zpass) = state.stencil_ops();
        let face = D3D12_DEPTH_STENCILOP_DESC {
            StencilFailOp: to_d3d12_stencil_op(sfail),
            StencilDepthFailOp: to_d3d12_stencil_op(zfail),
            StencilPassOp: to_d3d12_stencil_op(zpass),
            StencilFunc: func,
        };
        depth_stencil.StencilReadMask = state.stencil_read_mask();
        depth_stencil.StencilWriteMask = state.stencil_write_mask();
        depth_stencil.FrontFace = face;
        depth_stencil.BackFace = face;
    }

    let mut blend_desc = D3D12_BLEND_DESC {
        AlphaToCoverageEnable: BOOL::from(false),
        IndependentBlendEnable: BOOL::from(false),
        ..Default::default()
    };
    for rt in blend_desc.RenderTarget.iter_mut() {
        *rt = match state.blend() {
            Some((src_rgb, dst_rgb, src_a, dst_a)) => D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: BOOL::from(true),
                SrcBlend: to_d3d12_blend(src_rgb),
                DestBlend: to_d3d12_blend(dst_rgb),
                BlendOp: D3D12_BLEND_OP_ADD,
                SrcBlendAlpha: to_d3d12_blend(src_a),
                DestBlendAlpha: to_d3d12_blend(dst_a),
                BlendOpAlpha: D3D12_BLEND_OP_ADD,
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                ..Default::default()
            },
            None => D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: BOOL::from(false),
                SrcBlend: D3D12_BLEND_SRC_ALPHA,
                DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
                BlendOp: D3D12_BLEND_OP_ADD,
                SrcBlendAlpha: D3D12_BLEND_SRC_ALPHA,
                DestBlendAlpha: D3D12_BLEND_INV_SRC_ALPHA,
                BlendOpAlpha: D3D12_BLEND_OP_ADD,
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                ..Default::default()
            },
        };
    }

    let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
        VS: bytecode(program.vs.as_ref()),
        PS: bytecode(program.ps.as_ref()),
        GS: bytecode(program.gs.as_ref()),
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: if flags.contains(StateFlags::WIREFRAME) {
                D3D12_FILL_MODE_WIREFRAME
            } else {
                D3D12_FILL_MODE_SOLID
            },
            CullMode: cull_mode,
            FrontCounterClockwise: BOOL::from(true),
            DepthClipEnable: BOOL::from(false),
            ..Default::default()
        },
        BlendState: blend_desc,
        DepthStencilState: depth_stencil,
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: program.attributes.as_ptr() as *mut D3D12_INPUT_ELEMENT_DESC,
            NumElements: program.attribute_count,
        },
        PrimitiveTopologyType: topology_type,
        NumRenderTargets: color_formats.len() as u32,
        DSVFormat: ds_format,
        SampleMask: u32::MAX,
        SampleDesc: windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        NodeMask: 1,
        Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
        ..Default::default()
    };
    for (i, format) in color_formats.iter().enumerate() {
        desc.RTVFormats[i] = *format;
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateFlags;
    use windows::Win32::Graphics::Dxgi::Common::{
        DXGI_FORMAT_D32_FLOAT, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_UNKNOWN,
    };

    #[test]
    fn identical_inputs_hash_identically() {
        let state = RenderState::from_flags(StateFlags::DEPTH_TEST | StateFlags::DEPTH_WRITE);
        let formats = [DXGI_FORMAT_R8G8B8A8_UNORM];
        let a = graphics_key_hash(
            state,
            3,
            0xdead,
            &formats,
            DXGI_FORMAT_D32_FLOAT,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        );
        let b = graphics_key_hash(
            state,
            3,
            0xdead,
            &formats,
            DXGI_FORMAT_D32_FLOAT,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn each_key_component_discriminates() {
        let state = RenderState::default();
        let formats = [DXGI_FORMAT_R8G8B8A8_UNORM];
        let base = graphics_key_hash(
            state,
            0,
            0,
            &formats,
            DXGI_FORMAT_UNKNOWN,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        );
        let other_state = graphics_key_hash(
            RenderState::from_flags(StateFlags::WIREFRAME),
            0,
            0,
            &formats,
            DXGI_FORMAT_UNKNOWN,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        );
        let other_program = graphics_key_hash(
            state,
            1,
            0,
            &formats,
            DXGI_FORMAT_UNKNOWN,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        );
        let other_topology = graphics_key_hash(
            state,
            0,
            0,
            &formats,
            DXGI_FORMAT_UNKNOWN,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        );
        let other_ds = graphics_key_hash(
            state,
            0,
            0,
            &formats,
            DXGI_FORMAT_D32_FLOAT,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        );
        assert_ne!(base, other_state);
        assert_ne!(base, other_program);
        assert_ne!(base, other_topology);
        assert_ne!(base, other_ds);
    }
}
