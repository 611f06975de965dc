//! Explicit command-list backend over D3D12.
//!
//! One dedicated renderer thread owns the context. Frames rotate through a
//! 3-deep ring; each frame waits on its fence before its command allocator,
//! scratch arena and descriptor windows are reused, which also retires that
//! frame's release list.

mod capture;
mod frame;
mod heaps;
mod pipeline;
mod resources;
mod shader;
mod swapchain;

use raw_window_handle::{HasRawWindowHandle, RawWindowHandle};
use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D::{
    D3D_FEATURE_LEVEL_12_0, D3D_PRIMITIVE_TOPOLOGY, D3D_PRIMITIVE_TOPOLOGY_LINELIST,
    D3D_PRIMITIVE_TOPOLOGY_POINTLIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIFactory4, DXGI_CREATE_FACTORY_DEBUG,
};
use windows::Win32::System::Threading::GetCurrentThreadId;

use capture::{CaptureTool, PixRuntime};
use frame::{create_upload_buffer, Frame, Released};
use heaps::{SamplerHeap, SrvHeap, ViewHeap};
use pipeline::PipelineCache;
use resources::{
    dds_dxgi_format, is_depth_format, switch_state, to_ds_view_format, to_dxgi_format,
    to_view_format, Buffer, Program, ShaderRes, Texture,
};

use crate::{
    dds, mip, BufferFlags, BufferHandle, ClearFlags, FramebufferFlags, GfxError, GfxResult,
    GpuBackend, HandleAllocator, IndexType, InitFlags, PrimitiveType, ProgramHandle, RenderState,
    ResourceState, ShaderSource, TextureFlags, TextureFormat, TextureHandle, VertexDecl,
    MAX_BUFFERS, MAX_COLOR_ATTACHMENTS, MAX_PROGRAMS, MAX_SHADER_RESOURCES, MAX_TEXTURES,
    MAX_WINDOWS, NUM_FRAMES,
};

struct FrameBufferState {
    depth_stencil: Option<D3D12_CPU_DESCRIPTOR_HANDLE>,
    render_targets: [D3D12_CPU_DESCRIPTOR_HANDLE; MAX_COLOR_ATTACHMENTS],
    formats: [DXGI_FORMAT; MAX_COLOR_ATTACHMENTS],
    ds_format: DXGI_FORMAT,
    attachments: [TextureHandle; MAX_COLOR_ATTACHMENTS + 1],
    count: u32,
}

impl Default for FrameBufferState {
    fn default() -> Self {
        Self {
            depth_stencil: None,
            render_targets: [D3D12_CPU_DESCRIPTOR_HANDLE::default(); MAX_COLOR_ATTACHMENTS],
            formats: [DXGI_FORMAT_UNKNOWN; MAX_COLOR_ATTACHMENTS],
            ds_format: DXGI_FORMAT_UNKNOWN,
            attachments: [TextureHandle::INVALID; MAX_COLOR_ATTACHMENTS + 1],
            count: 0,
        }
    }
}

pub struct Dx12Backend {
    handles: HandleAllocator,
    thread_id: u32,

    device: ID3D12Device,
    factory: IDXGIFactory4,
    root_signature: ID3D12RootSignature,
    queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    fence_value: u64,
    cmd_list: ID3D12GraphicsCommandList,
    #[allow(dead_code)]
    debug: Option<ID3D12Debug>,

    frames: Vec<Frame>,
    frame_index: usize,

    srv_heap: SrvHeap,
    sampler_heap: SamplerHeap,
    rtv_heap: ViewHeap,
    dsv_heap: ViewHeap,

    windows: Vec<Option<swapchain::Window>>,
    current_window: usize,

    buffers: Vec<Option<Buffer>>,
    textures: Vec<Option<Texture>>,
    programs: Vec<Option<Program>>,

    pipelines: PipelineCache,

    current_framebuffer: FrameBufferState,
    current_srvs: [ShaderRes; MAX_SHADER_RESOURCES],
    current_images: [ShaderRes; MAX_SHADER_RESOURCES],
    current_state: RenderState,
    current_program: ProgramHandle,
    current_index_buffer: BufferHandle,

    capture: Option<CaptureTool>,
    pix: Option<PixRuntime>,
}

fn hwnd_from(window: &dyn HasRawWindowHandle) -> GfxResult<HWND> {
    match window.raw_window_handle() {
        RawWindowHandle::Win32(handle) => Ok(HWND(handle.hwnd as isize)),
        _ => Err(GfxError::from("expected a Win32 window handle")),
    }
}

fn set_debug_name(resource: &ID3D12Resource, name: &str) {
    if name.is_empty() {
        return;
    }
    let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe {
        resource.SetName(PCWSTR(wide.as_ptr())).ok();
    }
}

fn create_root_signature(device: &ID3D12Device) -> GfxResult<ID3D12RootSignature> {
    const MAX_TABLE_DESCRIPTORS: u32 = 32;

    let range = |ty: D3D12_DESCRIPTOR_RANGE_TYPE, count: u32| D3D12_DESCRIPTOR_RANGE {
        RangeType: ty,
        NumDescriptors: count,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    let ranges = [
        range(D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER, MAX_TABLE_DESCRIPTORS),
        range(D3D12_DESCRIPTOR_RANGE_TYPE_SRV, MAX_TABLE_DESCRIPTORS),
        range(D3D12_DESCRIPTOR_RANGE_TYPE_UAV, MAX_TABLE_DESCRIPTORS),
    ];

    let root_cbv = |register: u32| D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            Descriptor: D3D12_ROOT_DESCRIPTOR {
                ShaderRegister: register,
                RegisterSpace: 0,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };
    let table = |range: &D3D12_DESCRIPTOR_RANGE| D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                NumDescriptorRanges: 1,
                pDescriptorRanges: range as *const D3D12_DESCRIPTOR_RANGE
                    as *mut D3D12_DESCRIPTOR_RANGE,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };

    // b0..b4 as root CBVs, then samplers @ 5, SRVs @ 6, UAVs @ 7
    let params = [
        root_cbv(0),
        root_cbv(1),
        root_cbv(2),
        root_cbv(3),
        root_cbv(4),
        table(&ranges[0]),
        table(&ranges[1]),
        table(&ranges[2]),
    ];

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: params.len() as u32,
        pParameters: params.as_ptr() as *mut D3D12_ROOT_PARAMETER,
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null_mut(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    unsafe {
        let mut signature = None;
        let mut error = None;
        let _ = D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut signature,
            Some(&mut error),
        );
        if let Some(error) = error {
            let text = std::ffi::CStr::from_ptr(error.GetBufferPointer() as *const i8)
                .to_string_lossy()
                .into_owned();
            return Err(GfxError::String(format!(
                "root signature serialization failed: {text}"
            )));
        }
        let signature = signature.unwrap();
        let blob = std::slice::from_raw_parts(
            signature.GetBufferPointer() as *const u8,
            signature.GetBufferSize(),
        );
        Ok(device.CreateRootSignature(0, blob)?)
    }
}

fn topology(primitive: PrimitiveType) -> (D3D_PRIMITIVE_TOPOLOGY, D3D12_PRIMITIVE_TOPOLOGY_TYPE) {
    match primitive {
        PrimitiveType::Triangles => (
            D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        ),
        PrimitiveType::TriangleStrip => (
            D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        ),
        PrimitiveType::Lines => (
            D3D_PRIMITIVE_TOPOLOGY_LINELIST,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        ),
        PrimitiveType::Points => (
            D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        ),
    }
}

fn index_format(index_type: IndexType) -> DXGI_FORMAT {
    match index_type {
        IndexType::U16 => DXGI_FORMAT_R16_UINT,
        IndexType::U32 => DXGI_FORMAT_R32_UINT,
    }
}

/// One subresource's worth of tightly packed upload data.
struct SubresourceData {
    data: Vec<u8>,
    row_pitch: usize,
}

/// Copy every subresource into one staging buffer laid out by the driver's
/// copyable footprints, and record one copy region per subresource.
fn upload_subresources(
    device: &ID3D12Device,
    cmd_list: &ID3D12GraphicsCommandList,
    resource: &ID3D12Resource,
    desc: &D3D12_RESOURCE_DESC,
    subresources: &[SubresourceData],
) -> GfxResult<ID3D12Resource> {
    let count = subresources.len() as u32;
    let mut layouts = vec![D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default(); count as usize];
    let mut num_rows = vec![0_u32; count as usize];
    let mut row_sizes = vec![0_u64; count as usize];
    let mut total = 0_u64;
    unsafe {
        device.GetCopyableFootprints(
            desc,
            0,
            count,
            0,
            Some(layouts.as_mut_ptr()),
            Some(num_rows.as_mut_ptr()),
            Some(row_sizes.as_mut_ptr()),
            Some(&mut total),
        );
    }

    let staging = create_upload_buffer(device, None, total)?;
    unsafe {
        let mut ptr = std::ptr::null_mut();
        staging.Map(0, None, Some(&mut ptr))?;
        for (i, sub) in subresources.iter().enumerate() {
            let layout = &layouts[i];
            let rows = num_rows[i] as usize;
            let slices = layout.Footprint.Depth as usize;
            let dst_pitch = layout.Footprint.RowPitch as usize;
            let dst_base = (ptr as *mut u8).add(layout.Offset as usize);
            for z in 0..slices {
                for y in 0..rows {
                    let src_offset = (z * rows + y) * sub.row_pitch;
                    let dst_offset = (z * rows + y) * dst_pitch;
                    std::ptr::copy_nonoverlapping(
                        sub.data.as_ptr().add(src_offset),
                        dst_base.add(dst_offset),
                        sub.row_pitch,
                    );
                }
            }

            let src_loc = D3D12_TEXTURE_COPY_LOCATION {
                pResource: std::mem::transmute_copy(&staging),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: *layout,
                },
            };
            let dst_loc = D3D12_TEXTURE_COPY_LOCATION {
                pResource: std::mem::transmute_copy(resource),
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    SubresourceIndex: i as u32,
                },
            };
            cmd_list.CopyTextureRegion(&dst_loc, 0, 0, 0, &src_loc, None);
        }
        staging.Unmap(0, None);
    }
    Ok(staging)
}

/// Expand tightly packed RGB rows to RGBA; sRGB sources have no native
/// 3-channel storage format.
fn expand_rgb_to_rgba(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() / 3 * 4);
    for px in src.chunks_exact(3) {
        out.extend_from_slice(px);
        out.push(0xff);
    }
    out
}

impl Dx12Backend {
    fn check_thread(&self) {
        debug_assert_eq!(
            unsafe { GetCurrentThreadId() },
            self.thread_id,
            "renderer-thread operation called from a foreign thread"
        );
    }

    /// Number of pipeline states built so far.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn launch_replay_ui(&self) {
        if let Some(capture) = &self.capture {
            capture.launch_replay_ui();
        }
    }

    fn sampler_table(&mut self) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        let mut slot_flags: [Option<TextureFlags>; MAX_SHADER_RESOURCES] =
            [None; MAX_SHADER_RESOURCES];
        for (slot, res) in self.current_srvs.iter().enumerate() {
            if let ShaderRes::Texture(handle) = res {
                if handle.is_valid() {
                    slot_flags[slot] = self.textures[handle.index()].as_ref().map(|t| t.flags);
                }
            }
        }
        self.sampler_heap.alloc_samplers(&self.device, &slot_flags)
    }

    fn srv_table(&mut self, images: bool) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        let set = if images {
            self.current_images
        } else {
            self.current_srvs
        };
        let table = self.srv_heap.table_start();
        for res in &set {
            match res {
                ShaderRes::Buffer(handle) if handle.is_valid() => {
                    if let Some(buffer) = self.buffers[handle.index()].as_ref() {
                        self.srv_heap.copy(&self.device, buffer.heap_id);
                    }
                }
                ShaderRes::Texture(handle) if handle.is_valid() => {
                    if let Some(texture) = self.textures[handle.index()].as_ref() {
                        self.srv_heap.copy(&self.device, texture.heap_id);
                    }
                }
                _ => {}
            }
        }
        table
    }

    fn graphics_pipeline(
        &mut self,
        topology_type: D3D12_PRIMITIVE_TOPOLOGY_TYPE,
    ) -> GfxResult<ID3D12PipelineState> {
        let program = self.programs[self.current_program.index()]
            .as_ref()
            .ok_or_else(|| GfxError::from("draw without a live program"))?;
        self.pipelines.get_graphics(
            &self.device,
            &self.root_signature,
            self.current_program,
            program,
            self.current_state,
            &self.current_framebuffer.formats[..self.current_framebuffer.count as usize],
            self.current_framebuffer.ds_format,
            topology_type,
        )
    }

    fn bind_draw_tables(&mut self) {
        let samplers = self.sampler_table();
        let srvs = self.srv_table(false);
        unsafe {
            self.cmd_list.SetGraphicsRootDescriptorTable(5, samplers);
            self.cmd_list.SetGraphicsRootDescriptorTable(6, srvs);
        }
    }

    fn bind_index_buffer_view(&mut self, size_bytes: u32, index_type: IndexType) {
        let buffer = self.buffers[self.current_index_buffer.index()]
            .as_ref()
            .expect("draw with a dead index buffer");
        let ibv = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: unsafe { buffer.resource.GetGPUVirtualAddress() },
            SizeInBytes: size_bytes,
            Format: index_format(index_type),
        };
        unsafe {
            self.cmd_list.IASetIndexBuffer(Some(&ibv));
        }
    }

    fn register_window(&mut self, hwnd: HWND) -> GfxResult<usize> {
        for (i, slot) in self.windows.iter().enumerate() {
            if let Some(window) = slot {
                if window.hwnd == hwnd {
                    return Ok(i);
                }
            }
        }
        for (i, slot) in self.windows.iter_mut().enumerate() {
            if slot.is_none() {
                let window = swapchain::Window::new(&self.factory, &self.queue, hwnd)?;
                switch_state(
                    &self.cmd_list,
                    window.current_backbuffer(),
                    ResourceState::Common,
                    ResourceState::RenderTarget,
                );
                *slot = Some(window);
                return Ok(i);
            }
        }
        log::error!("Too many windows created.");
        Err(GfxError::from("window table exhausted"))
    }

    fn reset_recorder(&mut self) -> GfxResult<()> {
        unsafe {
            self.frames[self.frame_index].cmd_allocator.Reset()?;
            self.cmd_list
                .Reset(&self.frames[self.frame_index].cmd_allocator, None)?;
            self.cmd_list.SetGraphicsRootSignature(&self.root_signature);
            self.cmd_list.SetComputeRootSignature(&self.root_signature);
            let heaps = [self.srv_heap.heap.clone(), self.sampler_heap.heap.clone()];
            self.cmd_list.SetDescriptorHeaps(&heaps);
        }
        Ok(())
    }
}

impl GpuBackend for Dx12Backend {
    fn new(window: &dyn HasRawWindowHandle, flags: InitFlags) -> GfxResult<Self> {
        let debug_enabled = flags.contains(InitFlags::DEBUG_OUTPUT) || cfg!(debug_assertions);
        let thread_id = unsafe { GetCurrentThreadId() };

        let mut debug: Option<ID3D12Debug> = None;
        if debug_enabled {
            unsafe {
                if D3D12GetDebugInterface(&mut debug).is_ok() {
                    if let Some(debug) = &debug {
                        debug.EnableDebugLayer();
                    }
                }
            }
        }

        let factory: IDXGIFactory4 = unsafe {
            CreateDXGIFactory2(if debug_enabled {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                0
            })?
        };

        let mut device: Option<ID3D12Device> = None;
        unsafe {
            D3D12CreateDevice(
                None::<&windows::core::IUnknown>,
                D3D_FEATURE_LEVEL_12_0,
                &mut device,
            )?;
        }
        let device = device.unwrap();

        if debug_enabled {
            if let Ok(info_queue) = device.cast::<ID3D12InfoQueue>() {
                unsafe {
                    info_queue
                        .SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_CORRUPTION, true)
                        .ok();
                    info_queue
                        .SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_ERROR, true)
                        .ok();
                    info_queue
                        .SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_WARNING, false)
                        .ok();
                    let mut deny_ids = [
                        D3D12_MESSAGE_ID_CLEARRENDERTARGETVIEW_MISMATCHINGCLEARVALUE,
                        D3D12_MESSAGE_ID_CREATEINPUTLAYOUT_EMPTY_LAYOUT,
                    ];
                    let mut filter = D3D12_INFO_QUEUE_FILTER::default();
                    filter.DenyList.NumIDs = deny_ids.len() as u32;
                    filter.DenyList.pIDList = deny_ids.as_mut_ptr();
                    info_queue.PushStorageFilter(&filter).ok();
                }
            }
        }

        let root_signature = create_root_signature(&device)?;

        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 1,
                ..Default::default()
            })?
        };

        let srv_heap = SrvHeap::new(&device)?;
        let sampler_heap = SamplerHeap::new(&device)?;
        let rtv_heap = ViewHeap::new_rtv(&device)?;
        let dsv_heap = ViewHeap::new_dsv(&device)?;

        let frames = (0..NUM_FRAMES)
            .map(|_| Frame::new(&device))
            .collect::<GfxResult<Vec<_>>>()?;

        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE)? };

        let cmd_list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &frames[0].cmd_allocator, None)?
        };
        unsafe {
            cmd_list.Close()?;
        }

        let capture = if flags.contains(InitFlags::LOAD_CAPTURE_TOOL) {
            CaptureTool::load()
        } else {
            None
        };

        let mut backend = Self {
            handles: HandleAllocator::new(),
            thread_id,
            device,
            factory,
            root_signature,
            queue,
            fence,
            fence_value: 0,
            cmd_list,
            debug,
            frames,
            frame_index: 0,
            srv_heap,
            sampler_heap,
            rtv_heap,
            dsv_heap,
            windows: (0..MAX_WINDOWS).map(|_| None).collect(),
            current_window: 0,
            buffers: (0..MAX_BUFFERS).map(|_| None).collect(),
            textures: (0..MAX_TEXTURES).map(|_| None).collect(),
            programs: (0..MAX_PROGRAMS).map(|_| None).collect(),
            pipelines: PipelineCache::new(),
            current_framebuffer: FrameBufferState::default(),
            current_srvs: Default::default(),
            current_images: Default::default(),
            current_state: RenderState::default(),
            current_program: ProgramHandle::INVALID,
            current_index_buffer: BufferHandle::INVALID,
            capture,
            pix: PixRuntime::load(),
        };

        backend.reset_recorder()?;
        let hwnd = hwnd_from(window)?;
        backend.current_window = backend.register_window(hwnd)?;
        Ok(backend)
    }

    fn shutdown(&mut self) -> GfxResult<()> {
        self.check_thread();
        for frame in &mut self.frames {
            for released in frame.begin() {
                if let Released::HeapId(id) = released {
                    self.srv_heap.backing.free(id);
                }
            }
        }
        self.pipelines.clear();
        self.windows.iter_mut().for_each(|w| *w = None);
        Ok(())
    }

    fn handles(&self) -> &HandleAllocator {
        &self.handles
    }

    fn create_buffer(
        &mut self,
        handle: BufferHandle,
        flags: BufferFlags,
        size: usize,
        data: Option<&[u8]>,
    ) -> GfxResult<()> {
        self.check_thread();
        debug_assert!(self.buffers[handle.index()].is_none());

        let mappable = flags.intersects(BufferFlags::MAPPABLE | BufferFlags::PERSISTENT);
        let size = if flags.contains(BufferFlags::SHADER_BUFFER) {
            (size + 15) / 16 * 16
        } else {
            size
        };

        let props = D3D12_HEAP_PROPERTIES {
            Type: if mappable {
                D3D12_HEAP_TYPE_UPLOAD
            } else {
                D3D12_HEAP_TYPE_DEFAULT
            },
            ..Default::default()
        };
        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: size as u64,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &props,
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )?;
        }
        let resource = resource.unwrap();

        // raw-buffer view into the persistent backing store
        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_R32_UINT,
            ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_SRV {
                    FirstElement: 0,
                    NumElements: (size / 4) as u32,
                    StructureByteStride: 0,
                    Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                },
            },
        };
        let heap_id = self.srv_heap.alloc_srv(&self.device, &resource, &srv_desc)?;

        let mut buffer = Buffer {
            resource,
            size,
            state: ResourceState::GenericRead,
            heap_id,
            mapped: false,
            persistent: flags
                .contains(BufferFlags::PERSISTENT)
                .then(|| vec![0_u8; size]),
        };

        if let Some(data) = data {
            let upload = create_upload_buffer(&self.device, Some(data), size as u64)?;
            let old_state = buffer.set_state(&self.cmd_list, ResourceState::CopyDest);
            unsafe {
                self.cmd_list.CopyResource(&buffer.resource, &upload);
            }
            buffer.set_state(&self.cmd_list, old_state);
            self.frames[self.frame_index]
                .to_release
                .push(Released::Resource(upload));
        }

        self.buffers[handle.index()] = Some(buffer);
        Ok(())
    }

    fn create_texture(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        flags: TextureFlags,
        data: Option<&[u8]>,
        name: &str,
    ) -> GfxResult<()> {
        self.check_thread();
        let no_mips = flags.contains(TextureFlags::NO_MIPS);
        let is_3d = flags.contains(TextureFlags::IS_3D);
        let is_cube = flags.contains(TextureFlags::IS_CUBE);
        let render_target = flags.contains(TextureFlags::RENDER_TARGET);
        let compute_write = flags.contains(TextureFlags::COMPUTE_WRITE);

        if !no_mips && !format.supports_cpu_mips() {
            return Err(GfxError::String(format!(
                "format {format:?} requires NO_MIPS"
            )));
        }
        if is_3d && data.is_some() && !no_mips {
            return Err(GfxError::from("3D textures with data must use NO_MIPS"));
        }

        let mip_count = if no_mips {
            1
        } else {
            mip::mip_count(width, height, depth)
        };
        let dxgi_format = to_dxgi_format(format);

        let mut resource_flags = D3D12_RESOURCE_FLAG_NONE;
        if render_target {
            resource_flags |= if is_depth_format(dxgi_format) {
                D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
            } else {
                D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET
            };
        }
        if compute_write {
            resource_flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }

        let desc = D3D12_RESOURCE_DESC {
            Dimension: if is_3d {
                D3D12_RESOURCE_DIMENSION_TEXTURE3D
            } else {
                D3D12_RESOURCE_DIMENSION_TEXTURE2D
            },
            Width: width as u64,
            Height: height,
            DepthOrArraySize: if is_cube { 6 } else { depth.max(1) as u16 },
            MipLevels: mip_count as u16,
            Format: dxgi_format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: resource_flags,
            ..Default::default()
        };

        // render targets carry their optimized clear value; reversed depth
        // clears to zero
        let clear_value = D3D12_CLEAR_VALUE {
            Format: if is_depth_format(dxgi_format) {
                to_ds_view_format(dxgi_format)
            } else {
                to_view_format(dxgi_format)
            },
            Anonymous: if is_depth_format(dxgi_format) {
                D3D12_CLEAR_VALUE_0 {
                    DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                        Depth: 0.0,
                        Stencil: 0,
                    },
                }
            } else {
                D3D12_CLEAR_VALUE_0 {
                    Color: [0.0, 0.0, 0.0, 1.0],
                }
            },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: D3D12_HEAP_TYPE_DEFAULT,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                if render_target { Some(&clear_value) } else { None },
                &mut resource,
            )?;
        }
        let resource = resource.unwrap();
        set_debug_name(&resource, name);

        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: to_view_format(dxgi_format),
            ViewDimension: if is_3d {
                D3D12_SRV_DIMENSION_TEXTURE3D
            } else {
                D3D12_SRV_DIMENSION_TEXTURE2D
            },
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: if is_3d {
                D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture3D: D3D12_TEX3D_SRV {
                        MostDetailedMip: 0,
                        MipLevels: mip_count,
                        ResourceMinLODClamp: 0.0,
                    },
                }
            } else {
                D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_SRV {
                        MostDetailedMip: 0,
                        MipLevels: mip_count,
                        PlaneSlice: 0,
                        ResourceMinLODClamp: 0.0,
                    },
                }
            },
        };
        let heap_id = self.srv_heap.alloc_srv(&self.device, &resource, &srv_desc)?;

        let mut texture = Texture {
            resource,
            state: ResourceState::GenericRead,
            heap_id,
            dxgi_format,
            flags,
        };

        if let Some(data) = data {
            let src_px = format.source_pixel_size().ok_or_else(|| {
                GfxError::String(format!("format {format:?} does not accept upload data"))
            })? as usize;
            let storage_px = format.bytes_per_pixel() as usize;
            // 3D slices share one subresource per mip; cube faces and 2D
            // array layers each get their own chain
            let layers = if is_cube {
                6
            } else if is_3d {
                1
            } else {
                depth.max(1) as usize
            };
            let layer_size = width as usize
                * height as usize
                * src_px
                * if is_3d { depth.max(1) as usize } else { 1 };

            let mut subresources = Vec::with_capacity(layers * mip_count as usize);
            for layer in 0..layers {
                let level0 = &data[layer * layer_size..(layer + 1) * layer_size];
                let mut level: Vec<u8> = if format == TextureFormat::Srgb {
                    expand_rgb_to_rgba(level0)
                } else {
                    level0.to_vec()
                };
                let mut w = width;
                let mut h = height;
                subresources.push(SubresourceData {
                    row_pitch: w as usize * storage_px,
                    data: level.clone(),
                });
                for _ in 1..mip_count {
                    // channel-appropriate resize of the previous level
                    level = match format {
                        TextureFormat::R8 => mip::downsample_u8(&level, w, h, 1),
                        TextureFormat::Rgba8 | TextureFormat::Srgba | TextureFormat::Srgb => {
                            mip::downsample_u8(&level, w, h, 4)
                        }
                        TextureFormat::R32F | TextureFormat::Rgba32F => {
                            let channels = if format == TextureFormat::R32F { 1 } else { 4 };
                            let floats = unsafe {
                                std::slice::from_raw_parts(
                                    level.as_ptr() as *const f32,
                                    level.len() / 4,
                                )
                            };
                            let smaller = mip::downsample_f32(floats, w, h, channels);
                            unsafe {
                                std::slice::from_raw_parts(
                                    smaller.as_ptr() as *const u8,
                                    smaller.len() * 4,
                                )
                            }
                            .to_vec()
                        }
                        _ => unreachable!(),
                    };
                    w = (w / 2).max(1);
                    h = (h / 2).max(1);
                    subresources.push(SubresourceData {
                        row_pitch: w as usize * storage_px,
                        data: level.clone(),
                    });
                }
            }

            let old_state = texture.set_state(&self.cmd_list, ResourceState::CopyDest);
            let staging = upload_subresources(
                &self.device,
                &self.cmd_list,
                &texture.resource,
                &desc,
                &subresources,
            )?;
            texture.set_state(&self.cmd_list, old_state);
            self.frames[self.frame_index]
                .to_release
                .push(Released::Resource(staging));
        }

        self.textures[handle.index()] = Some(texture);
        Ok(())
    }

    fn load_texture(
        &mut self,
        handle: TextureHandle,
        blob: &[u8],
        flags: TextureFlags,
        name: &str,
    ) -> GfxResult<()> {
        self.check_thread();
        debug_assert!(!name.is_empty());

        let parsed = dds::parse(blob).map_err(|e| {
            log::error!("wrong dds format or corrupted dds ({name})");
            e
        })?;
        if !parsed.load.compressed {
            return Err(GfxError::String(format!(
                "uncompressed dds upload is not supported ({name})"
            )));
        }

        let is_srgb = flags.contains(TextureFlags::SRGB) && parsed.load.has_srgb;
        let dxgi_format = dds_dxgi_format(parsed.load.format, is_srgb);
        let info = parsed.info;
        let faces = if info.is_cubemap { 6 } else { 1 };
        let array_size = faces * info.layers;

        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: info.width.max(parsed.load.block_width) as u64,
            Height: info.height.max(parsed.load.block_width),
            DepthOrArraySize: array_size as u16,
            MipLevels: info.mips as u16,
            Format: dxgi_format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_NONE,
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: D3D12_HEAP_TYPE_DEFAULT,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_COPY_DEST,
                None,
                &mut resource,
            )?;
        }
        let resource = resource.unwrap();
        set_debug_name(&resource, name);

        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: to_view_format(dxgi_format),
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: info.mips,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };
        let heap_id = self.srv_heap.alloc_srv(&self.device, &resource, &srv_desc)?;

        // one tightly packed subresource per (layer, mip); compressed rows
        // pitch at ((w+3)/4) * block-bytes
        let mut subresources = Vec::with_capacity((array_size * info.mips) as usize);
        let mut cursor = 0_usize;
        for _ in 0..array_size {
            for level in 0..info.mips {
                let w = (info.width >> level).max(1);
                let h = (info.height >> level).max(1);
                let size = dds::size_dxtc(w, h, parsed.load.format) as usize;
                if cursor + size > parsed.data.len() {
                    return Err(GfxError::String(format!("dds payload truncated ({name})")));
                }
                subresources.push(SubresourceData {
                    row_pitch: (((w + 3) / 4) * parsed.load.block_bytes) as usize,
                    data: parsed.data[cursor..cursor + size].to_vec(),
                });
                cursor += size;
            }
        }

        let staging = upload_subresources(
            &self.device,
            &self.cmd_list,
            &resource,
            &desc,
            &subresources,
        )?;
        switch_state(
            &self.cmd_list,
            &resource,
            ResourceState::CopyDest,
            ResourceState::GenericRead,
        );
        self.frames[self.frame_index]
            .to_release
            .push(Released::Resource(staging));

        self.textures[handle.index()] = Some(Texture {
            resource,
            state: ResourceState::GenericRead,
            heap_id,
            dxgi_format,
            flags,
        });
        Ok(())
    }

    fn create_program(
        &mut self,
        handle: ProgramHandle,
        decl: &VertexDecl,
        sources: &[ShaderSource<'_>],
        prefixes: &[&str],
        name: &str,
    ) -> GfxResult<()> {
        self.check_thread();
        let program = shader::build_program(decl, sources, prefixes, name)?;
        self.programs[handle.index()] = Some(program);
        Ok(())
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        self.check_thread();
        if let Some(buffer) = self.buffers[handle.index()].take() {
            let frame = &mut self.frames[self.frame_index];
            frame.to_release.push(Released::Resource(buffer.resource));
            frame.to_release.push(Released::HeapId(buffer.heap_id));
        }
        self.handles.dealloc_buffer(handle);
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        self.check_thread();
        if let Some(texture) = self.textures[handle.index()].take() {
            let frame = &mut self.frames[self.frame_index];
            frame.to_release.push(Released::Resource(texture.resource));
            frame.to_release.push(Released::HeapId(texture.heap_id));
        }
        self.handles.dealloc_texture(handle);
    }

    fn destroy_program(&mut self, handle: ProgramHandle) {
        self.check_thread();
        if let Some(program) = self.programs[handle.index()].take() {
            let frame = &mut self.frames[self.frame_index];
            for blob in [program.vs, program.ps, program.gs, program.cs]
                .into_iter()
                .flatten()
            {
                frame.to_release.push(Released::Blob(blob));
            }
        }
        self.handles.dealloc_program(handle);
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u32, stride: u32) {
        if buffer.is_valid() {
            let b = self.buffers[buffer.index()].as_ref().expect("live buffer");
            let vbv = D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: unsafe { b.resource.GetGPUVirtualAddress() } + offset as u64,
                StrideInBytes: stride,
                SizeInBytes: (b.size - offset as usize) as u32,
            };
            unsafe {
                self.cmd_list.IASetVertexBuffers(slot, Some(&[vbv]));
            }
        } else {
            unsafe {
                self.cmd_list
                    .IASetVertexBuffers(slot, Some(&[D3D12_VERTEX_BUFFER_VIEW::default()]));
            }
        }
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle) {
        self.current_index_buffer = buffer;
    }

    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: usize, _size: usize) {
        let address = if buffer.is_valid() {
            let b = self.buffers[buffer.index()].as_ref().expect("live buffer");
            unsafe { b.resource.GetGPUVirtualAddress() } + offset as u64
        } else {
            0
        };
        unsafe {
            self.cmd_list.SetGraphicsRootConstantBufferView(slot, address);
            self.cmd_list.SetComputeRootConstantBufferView(slot, address);
        }
    }

    fn bind_textures(&mut self, handles: &[TextureHandle], offset: u32) {
        for (i, &handle) in handles.iter().enumerate() {
            self.current_srvs[offset as usize + i] = ShaderRes::Texture(handle);
            if !handle.is_valid() {
                continue;
            }
            if let Some(texture) = self.textures[handle.index()].as_mut() {
                match texture.state {
                    ResourceState::DepthWrite => {
                        texture.set_state(&self.cmd_list, ResourceState::DepthRead);
                    }
                    ResourceState::DepthRead | ResourceState::GenericRead => {}
                    _ => {
                        texture.set_state(&self.cmd_list, ResourceState::GenericRead);
                    }
                }
            }
        }
    }

    fn bind_image_texture(&mut self, handle: TextureHandle, slot: u32) {
        self.current_images[slot as usize] = ShaderRes::Texture(handle);
        if handle.is_valid() {
            if let Some(texture) = self.textures[handle.index()].as_mut() {
                texture.set_state(&self.cmd_list, ResourceState::UnorderedAccess);
            }
        }
    }

    fn bind_shader_buffer(&mut self, buffer: BufferHandle, slot: u32, _flags: BufferFlags) {
        debug_assert!((slot as usize) < MAX_SHADER_RESOURCES);
        self.current_srvs[slot as usize] = ShaderRes::Buffer(buffer);
    }

    fn set_state(&mut self, state: RenderState) {
        if state != self.current_state {
            unsafe {
                self.cmd_list.OMSetStencilRef(state.stencil_ref() as u32);
            }
        }
        self.current_state = state;
    }

    fn viewport(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let vp = D3D12_VIEWPORT {
            TopLeftX: x as f32,
            TopLeftY: y as f32,
            Width: width as f32,
            Height: height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        unsafe {
            self.cmd_list.RSSetViewports(&[vp]);
        }
        self.scissor(x, y, width, height);
    }

    fn scissor(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let rect = windows::Win32::Foundation::RECT {
            left: x as i32,
            top: y as i32,
            right: (x + width) as i32,
            bottom: (y + height) as i32,
        };
        unsafe {
            self.cmd_list.RSSetScissorRects(&[rect]);
        }
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = program;
    }

    fn set_framebuffer(&mut self, attachments: Option<&[TextureHandle]>, flags: FramebufferFlags) {
        self.check_thread();

        // previous attachments return to shader-readable
        for i in 0..self.current_framebuffer.attachments.len() {
            let handle = self.current_framebuffer.attachments[i];
            if !handle.is_valid() {
                continue;
            }
            if let Some(texture) = self.textures[handle.index()].as_mut() {
                texture.set_state(&self.cmd_list, ResourceState::GenericRead);
            }
            self.current_framebuffer.attachments[i] = TextureHandle::INVALID;
        }

        let readonly_ds = flags.contains(FramebufferFlags::READONLY_DEPTH_STENCIL);
        let fb = &mut self.current_framebuffer;
        fb.count = 0;
        fb.depth_stencil = None;
        fb.ds_format = DXGI_FORMAT_UNKNOWN;

        match attachments {
            None => {
                let window = self.windows[self.current_window]
                    .as_ref()
                    .expect("current window has no swap chain");
                let rtv = self.rtv_heap.alloc();
                unsafe {
                    self.device
                        .CreateRenderTargetView(window.current_backbuffer(), None, rtv);
                }
                fb.count = 1;
                fb.formats[0] = DXGI_FORMAT_R8G8B8A8_UNORM;
                fb.render_targets[0] = rtv;
            }
            Some(attachments) => {
                for (i, &handle) in attachments.iter().enumerate() {
                    fb.attachments[i] = handle;
                    if !handle.is_valid() {
                        continue;
                    }
                    let Some(texture) = self.textures[handle.index()].as_mut() else {
                        continue;
                    };
                    if is_depth_format(texture.dxgi_format) {
                        texture.set_state(
                            &self.cmd_list,
                            if readonly_ds {
                                ResourceState::DepthRead
                            } else {
                                ResourceState::DepthWrite
                            },
                        );
                        let dsv = self.dsv_heap.alloc();
                        let dsv_desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                            Format: to_ds_view_format(texture.dxgi_format),
                            ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                            Flags: if readonly_ds {
                                D3D12_DSV_FLAG_READ_ONLY_DEPTH | D3D12_DSV_FLAG_READ_ONLY_STENCIL
                            } else {
                                D3D12_DSV_FLAG_NONE
                            },
                            Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                                Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                            },
                        };
                        unsafe {
                            self.device.CreateDepthStencilView(
                                &texture.resource,
                                Some(&dsv_desc),
                                dsv,
                            );
                        }
                        fb.depth_stencil = Some(dsv);
                        fb.ds_format = to_ds_view_format(texture.dxgi_format);
                    } else {
                        assert!((fb.count as usize) < MAX_COLOR_ATTACHMENTS);
                        texture.set_state(&self.cmd_list, ResourceState::RenderTarget);
                        let rtv = self.rtv_heap.alloc();
                        unsafe {
                            self.device.CreateRenderTargetView(&texture.resource, None, rtv);
                        }
                        fb.formats[fb.count as usize] = texture.dxgi_format;
                        fb.render_targets[fb.count as usize] = rtv;
                        fb.count += 1;
                    }
                }
            }
        }

        unsafe {
            self.cmd_list.OMSetRenderTargets(
                fb.count,
                Some(fb.render_targets.as_ptr()),
                false,
                fb.depth_stencil.as_ref().map(|ds| ds as *const _),
            );
        }
    }

    fn clear(&mut self, flags: ClearFlags, color: &[f32; 4], depth: f32) {
        if flags.contains(ClearFlags::COLOR) {
            for i in 0..self.current_framebuffer.count as usize {
                unsafe {
                    self.cmd_list.ClearRenderTargetView(
                        self.current_framebuffer.render_targets[i],
                        color.as_ptr(),
                        &[],
                    );
                }
            }
        }

        let mut dx_flags = D3D12_CLEAR_FLAGS(0);
        if flags.contains(ClearFlags::DEPTH) {
            dx_flags |= D3D12_CLEAR_FLAG_DEPTH;
        }
        if flags.contains(ClearFlags::STENCIL) {
            dx_flags |= D3D12_CLEAR_FLAG_STENCIL;
        }
        if dx_flags.0 != 0 {
            if let Some(ds) = self.current_framebuffer.depth_stencil {
                unsafe {
                    self.cmd_list.ClearDepthStencilView(ds, dx_flags, depth, 0, &[]);
                }
            }
        }
    }

    fn draw_arrays(&mut self, offset: u32, count: u32, primitive: PrimitiveType) {
        let (pt, ptt) = topology(primitive);
        let pso = match self.graphics_pipeline(ptt) {
            Ok(pso) => pso,
            Err(e) => {
                log::error!("pipeline resolution failed: {e}");
                return;
            }
        };
        unsafe {
            self.cmd_list.SetPipelineState(&pso);
            self.cmd_list.IASetPrimitiveTopology(pt);
        }
        self.bind_draw_tables();
        unsafe {
            self.cmd_list.DrawInstanced(count, 1, offset, 0);
        }
    }

    fn draw_elements(
        &mut self,
        offset_bytes: u32,
        count: u32,
        primitive: PrimitiveType,
        index_type: IndexType,
    ) {
        let shift = index_type.offset_shift();
        debug_assert_eq!(offset_bytes & ((1 << shift) - 1), 0);

        let (pt, ptt) = topology(primitive);
        let pso = match self.graphics_pipeline(ptt) {
            Ok(pso) => pso,
            Err(e) => {
                log::error!("pipeline resolution failed: {e}");
                return;
            }
        };
        unsafe {
            self.cmd_list.SetPipelineState(&pso);
        }
        self.bind_index_buffer_view(count * (1 << shift) + offset_bytes, index_type);
        unsafe {
            self.cmd_list.IASetPrimitiveTopology(pt);
        }
        self.bind_draw_tables();
        unsafe {
            self.cmd_list
                .DrawIndexedInstanced(count, 1, offset_bytes >> shift, 0, 0);
        }
    }

    fn draw_triangles(&mut self, indices_count: u32, index_type: IndexType) {
        self.draw_triangles_instanced(indices_count, 1, index_type);
    }

    fn draw_triangles_instanced(
        &mut self,
        indices_count: u32,
        instances_count: u32,
        index_type: IndexType,
    ) {
        let pso = match self.graphics_pipeline(D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE) {
            Ok(pso) => pso,
            Err(e) => {
                log::error!("pipeline resolution failed: {e}");
                return;
            }
        };
        unsafe {
            self.cmd_list.SetPipelineState(&pso);
        }
        self.bind_index_buffer_view(indices_count * (1 << index_type.offset_shift()), index_type);
        unsafe {
            self.cmd_list
                .IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
        self.bind_draw_tables();
        unsafe {
            self.cmd_list
                .DrawIndexedInstanced(indices_count, instances_count, 0, 0, 0);
        }
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        let program = match self.programs[self.current_program.index()].as_ref() {
            Some(program) => program,
            None => {
                log::error!("dispatch without a live program");
                return;
            }
        };
        let pso = match self.pipelines.get_compute(
            &self.device,
            &self.root_signature,
            self.current_program,
            program,
        ) {
            Ok(pso) => pso,
            Err(e) => {
                log::error!("compute pipeline resolution failed: {e}");
                return;
            }
        };
        unsafe {
            self.cmd_list.SetPipelineState(&pso);
        }
        let samplers = self.sampler_table();
        let srvs = self.srv_table(false);
        let uavs = self.srv_table(true);
        unsafe {
            self.cmd_list.SetComputeRootDescriptorTable(5, samplers);
            self.cmd_list.SetComputeRootDescriptorTable(6, srvs);
            self.cmd_list.SetComputeRootDescriptorTable(7, uavs);
            self.cmd_list.Dispatch(groups_x, groups_y, groups_z);
        }
    }

    fn map(&mut self, buffer: BufferHandle, size: usize) -> GfxResult<*mut u8> {
        let b = self.buffers[buffer.index()]
            .as_mut()
            .ok_or_else(|| GfxError::from("map of a dead buffer"))?;
        assert!(!b.mapped, "buffer already mapped");
        debug_assert!(size <= b.size);
        if let Some(persistent) = b.persistent.as_mut() {
            b.mapped = true;
            return Ok(persistent.as_mut_ptr());
        }
        let mut ptr = std::ptr::null_mut();
        unsafe {
            b.resource.Map(0, None, Some(&mut ptr))?;
        }
        b.mapped = true;
        Ok(ptr as *mut u8)
    }

    fn unmap(&mut self, buffer: BufferHandle) {
        let b = self.buffers[buffer.index()].as_mut().expect("live buffer");
        assert!(b.mapped, "unmap of an unmapped buffer");
        if b.persistent.is_none() {
            unsafe {
                b.resource.Unmap(0, None);
            }
        } else {
            // persistent shadow: push the whole range through on release
            let len = b.size;
            self.flush_buffer(buffer, 0, len);
            return;
        }
        b.mapped = false;
    }

    fn update(&mut self, buffer: BufferHandle, data: &[u8]) {
        self.check_thread();
        let (src_offset, ptr) = self.frames[self.frame_index].scratch_alloc(data.len());
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
        let scratch = self.frames[self.frame_index].scratch_resource().clone();
        let b = self.buffers[buffer.index()].as_mut().expect("live buffer");
        let old_state = b.set_state(&self.cmd_list, ResourceState::CopyDest);
        unsafe {
            self.cmd_list
                .CopyBufferRegion(&b.resource, 0, &scratch, src_offset, data.len() as u64);
        }
        b.set_state(&self.cmd_list, old_state);
    }

    fn copy(&mut self, dst: BufferHandle, src: BufferHandle, dst_offset: u32, size: u32) {
        let src_resource = {
            let s = self.buffers[src.index()].as_ref().expect("live buffer");
            assert!(!s.mapped);
            s.resource.clone()
        };
        let d = self.buffers[dst.index()].as_mut().expect("live buffer");
        assert!(!d.mapped);
        let old_state = d.set_state(&self.cmd_list, ResourceState::CopyDest);
        unsafe {
            self.cmd_list.CopyBufferRegion(
                &d.resource,
                dst_offset as u64,
                &src_resource,
                0,
                size as u64,
            );
        }
        d.set_state(&self.cmd_list, old_state);
    }

    fn flush_buffer(&mut self, buffer: BufferHandle, offset: usize, len: usize) {
        self.check_thread();
        let b = self.buffers[buffer.index()].as_mut().expect("live buffer");
        let shadow = {
            let persistent = b
                .persistent
                .as_ref()
                .expect("flush_buffer needs a persistent buffer");
            persistent[offset..offset + len].to_vec()
        };
        unsafe {
            let mut ptr = std::ptr::null_mut();
            if b.resource.Map(0, None, Some(&mut ptr)).is_ok() {
                std::ptr::copy_nonoverlapping(
                    shadow.as_ptr(),
                    (ptr as *mut u8).add(offset),
                    len,
                );
                b.resource.Unmap(0, None);
            }
        }
        // the mapping does not survive a flush
        b.mapped = false;
    }

    fn swap_buffers(&mut self) -> GfxResult<u32> {
        self.check_thread();

        for window in self.windows.iter().flatten() {
            switch_state(
                &self.cmd_list,
                window.current_backbuffer(),
                ResourceState::RenderTarget,
                ResourceState::Present,
            );
        }

        let submitted = self.frame_index as u32;
        {
            let frame = &mut self.frames[self.frame_index];
            frame.end(&self.queue, &self.cmd_list, &self.fence, &mut self.fence_value)?;
        }

        self.frame_index = (self.frame_index + 1) % NUM_FRAMES as usize;
        self.srv_heap.next_frame();
        self.rtv_heap.next_frame();
        self.dsv_heap.next_frame();

        for released in self.frames[self.frame_index].begin() {
            if let Released::HeapId(id) = released {
                self.srv_heap.backing.free(id);
            }
        }

        // react to client-area resizes; every frame must retire first
        for i in 0..self.windows.len() {
            let Some(window) = self.windows[i].as_ref() else {
                continue;
            };
            let size = swapchain::client_size(window.hwnd);
            if size != window.size && size.0 != 0 {
                for frame in &mut self.frames {
                    frame.wait();
                }
                self.windows[i].as_mut().unwrap().resize(size)?;
            }
        }

        self.reset_recorder()?;

        for window in self.windows.iter().flatten() {
            let hr = unsafe { window.swapchain.Present(1, 0) };
            if hr.is_err() {
                log::error!("present failed: {hr:?}");
            }
            switch_state(
                &self.cmd_list,
                window.current_backbuffer(),
                ResourceState::Present,
                ResourceState::RenderTarget,
            );
        }

        Ok(submitted)
    }

    fn set_current_window(&mut self, window: Option<&dyn HasRawWindowHandle>) {
        self.check_thread();
        let Some(window) = window else {
            self.current_window = 0;
            return;
        };
        match hwnd_from(window).and_then(|hwnd| self.register_window(hwnd)) {
            Ok(index) => self.current_window = index,
            Err(e) => log::error!("set_current_window failed: {e}"),
        }
    }

    fn wait_frame(&mut self, frame: u32) {
        self.frames[frame as usize].wait();
    }

    fn push_debug_group(&mut self, name: &str) {
        if let Some(pix) = &self.pix {
            pix.begin_event(&self.cmd_list, 0xff55_ff55, name);
        }
    }

    fn pop_debug_group(&mut self) {
        if let Some(pix) = &self.pix {
            pix.end_event(&self.cmd_list);
        }
    }

    fn start_capture(&mut self) {
        if let Some(capture) = &self.capture {
            capture.start_capture();
        }
    }

    fn stop_capture(&mut self) {
        if let Some(capture) = &self.capture {
            capture.stop_capture();
        }
    }
}
