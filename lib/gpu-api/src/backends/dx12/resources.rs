//! Resource objects and the per-resource state machine.

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::dds::DdsFormat;
use crate::{
    AttributeType, BufferHandle, ResourceState, TextureFlags, TextureFormat, TextureHandle,
    MAX_ATTRIBUTES,
};

pub(crate) const fn to_d3d12_resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

pub(crate) fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    let trans = std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        StateBefore: state_before,
        StateAfter: state_after,
        Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
    });
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 { Transition: trans },
    }
}

pub(crate) fn switch_state(
    cmd_list: &ID3D12GraphicsCommandList,
    resource: &ID3D12Resource,
    old_state: ResourceState,
    new_state: ResourceState,
) {
    let barrier = transition_barrier(
        resource,
        to_d3d12_resource_state(old_state),
        to_d3d12_resource_state(new_state),
    );
    unsafe {
        cmd_list.ResourceBarrier(&[barrier.clone()]);
        let _: D3D12_RESOURCE_TRANSITION_BARRIER =
            std::mem::ManuallyDrop::into_inner(barrier.Anonymous.Transition);
    }
}

pub(crate) struct Buffer {
    pub resource: ID3D12Resource,
    pub size: usize,
    pub state: ResourceState,
    pub heap_id: u32,
    pub mapped: bool,
    /// Host-side shadow for persistent buffers, flushed on demand.
    pub persistent: Option<Vec<u8>>,
}

impl Buffer {
    /// Emit a transition to `new_state` and return the previous state so
    /// callers can restore it.
    pub fn set_state(
        &mut self,
        cmd_list: &ID3D12GraphicsCommandList,
        new_state: ResourceState,
    ) -> ResourceState {
        let old_state = self.state;
        if old_state != new_state {
            switch_state(cmd_list, &self.resource, old_state, new_state);
            self.state = new_state;
        }
        old_state
    }
}

pub(crate) struct Texture {
    pub resource: ID3D12Resource,
    pub state: ResourceState,
    pub heap_id: u32,
    pub dxgi_format: DXGI_FORMAT,
    pub flags: TextureFlags,
}

impl Texture {
    pub fn set_state(
        &mut self,
        cmd_list: &ID3D12GraphicsCommandList,
        new_state: ResourceState,
    ) -> ResourceState {
        let old_state = self.state;
        if old_state != new_state {
            switch_state(cmd_list, &self.resource, old_state, new_state);
            self.state = new_state;
        }
        old_state
    }
}

pub(crate) struct Program {
    pub vs: Option<windows::Win32::Graphics::Direct3D::ID3DBlob>,
    pub ps: Option<windows::Win32::Graphics::Direct3D::ID3DBlob>,
    pub gs: Option<windows::Win32::Graphics::Direct3D::ID3DBlob>,
    pub cs: Option<windows::Win32::Graphics::Direct3D::ID3DBlob>,
    pub attributes: [D3D12_INPUT_ELEMENT_DESC; MAX_ATTRIBUTES],
    pub attribute_count: u32,
    pub attribute_hash: u32,
}

/// Recorded SRV/UAV slot content for the next draw or dispatch.
#[derive(Clone, Copy)]
pub(crate) enum ShaderRes {
    None,
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

impl Default for ShaderRes {
    fn default() -> Self {
        Self::None
    }
}

pub(crate) fn is_depth_format(format: DXGI_FORMAT) -> bool {
    format == DXGI_FORMAT_R24G8_TYPELESS || format == DXGI_FORMAT_R32_TYPELESS
}

/// Storage format; depth formats allocate typeless and pick the view format
/// per usage.
pub(crate) fn to_dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::R8 => DXGI_FORMAT_R8_UNORM,
        TextureFormat::D32 | TextureFormat::D24 => DXGI_FORMAT_R32_TYPELESS,
        TextureFormat::D24S8 => DXGI_FORMAT_R24G8_TYPELESS,
        TextureFormat::Srgba => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        TextureFormat::Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        TextureFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Rgba16 => DXGI_FORMAT_R16G16B16A16_UNORM,
        TextureFormat::Rgba16F => DXGI_FORMAT_R16G16B16A16_FLOAT,
        TextureFormat::Rgba32F => DXGI_FORMAT_R32G32B32A32_FLOAT,
        TextureFormat::R16 => DXGI_FORMAT_R16_UNORM,
        TextureFormat::R16F => DXGI_FORMAT_R16_FLOAT,
        TextureFormat::R32F => DXGI_FORMAT_R32_FLOAT,
        TextureFormat::Rg32F => DXGI_FORMAT_R32G32_FLOAT,
    }
}

pub(crate) fn to_view_format(format: DXGI_FORMAT) -> DXGI_FORMAT {
    match format {
        DXGI_FORMAT_R24G8_TYPELESS => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        DXGI_FORMAT_R32_TYPELESS => DXGI_FORMAT_R32_FLOAT,
        other => other,
    }
}

pub(crate) fn to_ds_view_format(format: DXGI_FORMAT) -> DXGI_FORMAT {
    match format {
        DXGI_FORMAT_R24G8_TYPELESS => DXGI_FORMAT_D24_UNORM_S8_UINT,
        DXGI_FORMAT_R32_TYPELESS => DXGI_FORMAT_D32_FLOAT,
        other => other,
    }
}

pub(crate) fn attribute_dxgi_format(ty: AttributeType, components: u8) -> DXGI_FORMAT {
    match (ty, components) {
        (AttributeType::Float, 1) => DXGI_FORMAT_R32_FLOAT,
        (AttributeType::Float, 2) => DXGI_FORMAT_R32G32_FLOAT,
        (AttributeType::Float, 3) => DXGI_FORMAT_R32G32B32_FLOAT,
        (AttributeType::Float, 4) => DXGI_FORMAT_R32G32B32A32_FLOAT,
        (AttributeType::I8, 1) => DXGI_FORMAT_R8_SNORM,
        (AttributeType::I8, 2) => DXGI_FORMAT_R8G8_SNORM,
        (AttributeType::I8, 4) => DXGI_FORMAT_R8G8B8A8_SNORM,
        (AttributeType::U8, 1) => DXGI_FORMAT_R8_UNORM,
        (AttributeType::U8, 2) => DXGI_FORMAT_R8G8_UNORM,
        (AttributeType::U8, 4) => DXGI_FORMAT_R8G8B8A8_UNORM,
        (AttributeType::I16, 4) => DXGI_FORMAT_R16G16B16A16_SINT,
        _ => {
            debug_assert!(false, "unsupported attribute layout");
            DXGI_FORMAT_R32_FLOAT
        }
    }
}

/// DXGI storage format for a recognized container format.
pub(crate) fn dds_dxgi_format(format: DdsFormat, srgb: bool) -> DXGI_FORMAT {
    match (format, srgb) {
        (DdsFormat::Bc1, false) => DXGI_FORMAT_BC1_UNORM,
        (DdsFormat::Bc1, true) => DXGI_FORMAT_BC1_UNORM_SRGB,
        (DdsFormat::Bc2, false) => DXGI_FORMAT_BC2_UNORM,
        (DdsFormat::Bc2, true) => DXGI_FORMAT_BC2_UNORM_SRGB,
        (DdsFormat::Bc3, false) => DXGI_FORMAT_BC3_UNORM,
        (DdsFormat::Bc3, true) => DXGI_FORMAT_BC3_UNORM_SRGB,
        (DdsFormat::Bc4, _) => DXGI_FORMAT_BC4_UNORM,
        (DdsFormat::Bc5, _) => DXGI_FORMAT_BC5_UNORM,
        (DdsFormat::Bgra8, false) => DXGI_FORMAT_B8G8R8A8_UNORM,
        (DdsFormat::Bgra8, true) => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        (DdsFormat::Rgba8, false) => DXGI_FORMAT_R8G8B8A8_UNORM,
        (DdsFormat::Rgba8, true) => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        _ => DXGI_FORMAT_UNKNOWN,
    }
}
