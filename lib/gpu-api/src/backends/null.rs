//! Headless backend.
//!
//! Honors the public contract with host-side bookkeeping and no driver:
//! buffers carry real byte storage so map/update/copy behave, textures and
//! programs keep their metadata, and the frame ring retires release lists on
//! the same N-deep schedule the fence-based backend does. Work submitted
//! here "completes" instantly, so the fence wait is a no-op, but the *drain
//! timing* of a frame's release list is preserved: objects queued in frame
//! slot `i` are freed when slot `i` is begun again, not before.
//!
//! Useful for running the renderer on machines with no GPU and for driving
//! the contract test suite.

use raw_window_handle::HasRawWindowHandle;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

use crate::descriptors::{BackingAlloc, DescriptorRing, SamplerCache};
use crate::{
    dds, mip, BufferFlags, BufferHandle, ClearFlags, FramebufferFlags, GfxError, GfxResult,
    GpuBackend, HandleAllocator, IndexType, InitFlags, PrimitiveType, ProgramHandle, RenderState,
    ResourceState, ShaderSource, TextureFlags, TextureFormat, TextureHandle, VertexDecl,
    BACKING_DESCRIPTORS, DSV_DESCRIPTORS, MAX_BUFFERS, MAX_COLOR_ATTACHMENTS, MAX_DESCRIPTORS,
    MAX_PROGRAMS, MAX_SAMPLER_DESCRIPTORS, MAX_SHADER_RESOURCES, MAX_TEXTURES, NUM_FRAMES,
    RTV_DESCRIPTORS, SCRATCH_BUFFER_SIZE,
};

struct NullBuffer {
    data: Vec<u8>,
    flags: BufferFlags,
    state: ResourceState,
    heap_id: u32,
    mapped: bool,
    persistent: Option<Vec<u8>>,
}

struct NullTexture {
    width: u32,
    height: u32,
    depth: u32,
    format: Option<TextureFormat>,
    flags: TextureFlags,
    state: ResourceState,
    heap_id: u32,
    mips: u32,
}

struct NullProgram {
    stages: Vec<shader_compiler::Stage>,
}

enum Released {
    Buffer(#[allow(dead_code)] Vec<u8>),
    Texture,
    Program,
}

struct NullFrame {
    to_release: Vec<Released>,
    scratch_used: usize,
}

#[derive(Clone, Copy, Default)]
enum ShaderRes {
    #[default]
    None,
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

#[derive(Default)]
struct CurrentFramebuffer {
    attachments: Vec<TextureHandle>,
    color_formats: Vec<TextureFormat>,
}

pub struct NullBackend {
    handles: HandleAllocator,
    buffers: Vec<Option<NullBuffer>>,
    textures: Vec<Option<NullTexture>>,
    programs: Vec<Option<NullProgram>>,

    frames: Vec<NullFrame>,
    frame_index: usize,

    srv_ring: DescriptorRing,
    rtv_ring: DescriptorRing,
    dsv_ring: DescriptorRing,
    srv_backing: BackingAlloc,
    sampler_cache: SamplerCache,

    current_srvs: [ShaderRes; MAX_SHADER_RESOURCES],
    current_images: [ShaderRes; MAX_SHADER_RESOURCES],
    current_framebuffer: CurrentFramebuffer,
    current_state: RenderState,
    current_program: ProgramHandle,
    current_index_buffer: BufferHandle,
    debug_group_depth: u32,
}

impl NullBackend {
    fn frame(&mut self) -> &mut NullFrame {
        &mut self.frames[self.frame_index]
    }

    /// Number of native objects queued but not yet released; test hook for
    /// the deferred-destruction schedule.
    pub fn pending_release_count(&self) -> usize {
        self.frames.iter().map(|f| f.to_release.len()).sum()
    }

    /// Distinct sampler fingerprints allocated so far.
    pub fn sampler_count(&self) -> usize {
        self.sampler_cache.distinct()
    }

    /// Render state as last set; the headless backend has no pipeline to
    /// bake it into.
    pub fn render_state(&self) -> RenderState {
        self.current_state
    }

    pub fn texture_extent(&self, handle: TextureHandle) -> Option<(u32, u32, u32)> {
        self.textures[handle.index()]
            .as_ref()
            .map(|t| (t.width, t.height, t.depth))
    }

    pub fn texture_mip_count(&self, handle: TextureHandle) -> Option<u32> {
        self.textures[handle.index()].as_ref().map(|t| t.mips)
    }

    fn texture_state(&mut self, handle: TextureHandle, new: ResourceState) -> ResourceState {
        let t = self.textures[handle.index()].as_mut().expect("live texture");
        let old = t.state;
        t.state = new;
        old
    }

    fn alloc_srv_table(&mut self, images: bool) {
        let set = if images {
            self.current_images
        } else {
            self.current_srvs
        };
        for res in &set {
            match res {
                ShaderRes::Buffer(h) if h.is_valid() => {
                    self.srv_ring.alloc(1);
                }
                ShaderRes::Texture(h) if h.is_valid() => {
                    self.srv_ring.alloc(1);
                }
                _ => {}
            }
        }
    }

    fn alloc_samplers(&mut self) {
        let mut flags = [0_u32; MAX_SHADER_RESOURCES];
        for (slot, res) in self.current_srvs.iter().enumerate() {
            if let ShaderRes::Texture(h) = res {
                if h.is_valid() {
                    if let Some(t) = self.textures[h.index()].as_ref() {
                        flags[slot] = t.flags.bits();
                    }
                }
            }
        }
        let mut hasher = FnvHasher::default();
        flags.hash(&mut hasher);
        let fingerprint = hasher.finish() as u32;
        self.sampler_cache
            .lookup_or_reserve(fingerprint, MAX_SHADER_RESOURCES as u32);
    }

    fn resolve_draw(&mut self) {
        assert!(self.current_program.is_valid(), "no program bound");
        let program = self.programs[self.current_program.index()]
            .as_ref()
            .expect("draw with a dead program");
        debug_assert!(program.stages.contains(&shader_compiler::Stage::Vertex));
        self.alloc_samplers();
        self.alloc_srv_table(false);
    }
}

impl GpuBackend for NullBackend {
    fn new(_window: &dyn HasRawWindowHandle, _flags: InitFlags) -> GfxResult<Self> {
        // Descriptor rings run the same window arithmetic as the real heaps,
        // just over synthetic base addresses.
        let incr = 32;
        Ok(Self {
            handles: HandleAllocator::new(),
            buffers: (0..MAX_BUFFERS).map(|_| None).collect(),
            textures: (0..MAX_TEXTURES).map(|_| None).collect(),
            programs: (0..MAX_PROGRAMS).map(|_| None).collect(),
            frames: (0..NUM_FRAMES)
                .map(|_| NullFrame {
                    to_release: Vec::new(),
                    scratch_used: 0,
                })
                .collect(),
            frame_index: 0,
            srv_ring: DescriptorRing::new(0, 0, incr, MAX_DESCRIPTORS, NUM_FRAMES),
            rtv_ring: DescriptorRing::new(0, 0, incr, RTV_DESCRIPTORS, NUM_FRAMES),
            dsv_ring: DescriptorRing::new(0, 0, incr, DSV_DESCRIPTORS, NUM_FRAMES),
            srv_backing: BackingAlloc::new(BACKING_DESCRIPTORS),
            sampler_cache: SamplerCache::new(MAX_SAMPLER_DESCRIPTORS),
            current_srvs: Default::default(),
            current_images: Default::default(),
            current_framebuffer: CurrentFramebuffer::default(),
            current_state: RenderState::default(),
            current_program: ProgramHandle::INVALID,
            current_index_buffer: BufferHandle::INVALID,
            debug_group_depth: 0,
        })
    }

    fn shutdown(&mut self) -> GfxResult<()> {
        for frame in &mut self.frames {
            frame.to_release.clear();
            frame.scratch_used = 0;
        }
        if self.handles.live_buffers() != 0
            || self.handles.live_textures() != 0
            || self.handles.live_programs() != 0
        {
            log::warn!(
                "shutdown with live handles: {} buffers, {} textures, {} programs",
                self.handles.live_buffers(),
                self.handles.live_textures(),
                self.handles.live_programs()
            );
        }
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
        let size = if flags.contains(BufferFlags::SHADER_BUFFER) {
            (size + 15) / 16 * 16
        } else {
            size
        };
        let mut storage = vec![0_u8; size];
        if let Some(data) = data {
            storage[..data.len()].copy_from_slice(data);
        }
        let heap_id = self
            .srv_backing
            .alloc()
            .ok_or_else(|| GfxError::from("backing descriptor store exhausted"))?;
        self.buffers[handle.index()] = Some(NullBuffer {
            data: storage,
            flags,
            state: ResourceState::GenericRead,
            heap_id,
            mapped: false,
            persistent: flags
                .contains(BufferFlags::PERSISTENT)
                .then(|| vec![0_u8; size]),
        });
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
        _name: &str,
    ) -> GfxResult<()> {
        let no_mips = flags.contains(TextureFlags::NO_MIPS);
        if !no_mips && !format.supports_cpu_mips() {
            return Err(GfxError::String(format!(
                "format {format:?} requires NO_MIPS"
            )));
        }
        let mips = if no_mips {
            1
        } else {
            mip::mip_count(width, height, depth)
        };
        if let Some(data) = data {
            let px = format.source_pixel_size().ok_or_else(|| {
                GfxError::String(format!("format {format:?} does not accept upload data"))
            })?;
            let expected = (width * height * px) as usize
                * if flags.contains(TextureFlags::IS_CUBE) {
                    6
                } else {
                    depth.max(1) as usize
                };
            if data.len() < expected {
                return Err(GfxError::String(format!(
                    "texture data too small: {} < {expected}",
                    data.len()
                )));
            }
        }
        let heap_id = self
            .srv_backing
            .alloc()
            .ok_or_else(|| GfxError::from("backing descriptor store exhausted"))?;
        self.textures[handle.index()] = Some(NullTexture {
            width,
            height,
            depth: depth.max(1),
            format: Some(format),
            flags,
            state: ResourceState::GenericRead,
            heap_id,
            mips,
        });
        Ok(())
    }

    fn load_texture(
        &mut self,
        handle: TextureHandle,
        blob: &[u8],
        flags: TextureFlags,
        name: &str,
    ) -> GfxResult<()> {
        let parsed = dds::parse(blob).map_err(|e| {
            log::error!("wrong dds format or corrupted dds ({name}): {e}");
            e
        })?;
        if !parsed.load.compressed {
            return Err(GfxError::String(format!(
                "uncompressed dds upload is not supported ({name})"
            )));
        }
        // Validate the payload covers every subresource; compressed rows
        // pitch at ((w+3)/4) * block-bytes.
        let faces = if parsed.info.is_cubemap { 6 } else { 1 };
        let mut needed = 0_usize;
        for _ in 0..faces * parsed.info.layers {
            for level in 0..parsed.info.mips {
                let w = (parsed.info.width >> level).max(1);
                let h = (parsed.info.height >> level).max(1);
                needed += dds::size_dxtc(w, h, parsed.load.format) as usize;
            }
        }
        if parsed.data.len() < needed {
            return Err(GfxError::String(format!(
                "dds payload truncated ({name}): {} < {needed}",
                parsed.data.len()
            )));
        }
        let heap_id = self
            .srv_backing
            .alloc()
            .ok_or_else(|| GfxError::from("backing descriptor store exhausted"))?;
        self.textures[handle.index()] = Some(NullTexture {
            width: parsed.info.width,
            height: parsed.info.height,
            depth: parsed.info.depth,
            format: None,
            flags,
            state: ResourceState::GenericRead,
            heap_id,
            mips: parsed.info.mips,
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
        let attributes: Vec<u8> = decl.attributes().iter().map(|a| a.location).collect();
        let mut stages = Vec::new();
        for stage in [
            crate::ShaderStage::Vertex,
            crate::ShaderStage::Fragment,
            crate::ShaderStage::Compute,
            crate::ShaderStage::Geometry,
        ] {
            let stage_sources: Vec<&str> = sources
                .iter()
                .filter(|s| s.stage == stage)
                .map(|s| s.code)
                .collect();
            if stage_sources.is_empty() {
                continue;
            }
            let compiler_stage = stage.to_compiler();
            shader_compiler::glsl_to_hlsl(
                &shader_compiler::StageSources {
                    stage: compiler_stage,
                    sources: &stage_sources,
                    prefixes,
                    attributes: &attributes,
                },
                name,
            )?;
            stages.push(compiler_stage);
        }
        self.programs[handle.index()] = Some(NullProgram { stages });
        Ok(())
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers[handle.index()].take() {
            self.srv_backing.free(buffer.heap_id);
            self.frames[self.frame_index]
                .to_release
                .push(Released::Buffer(buffer.data));
        }
        self.handles.dealloc_buffer(handle);
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures[handle.index()].take() {
            self.srv_backing.free(texture.heap_id);
            self.frames[self.frame_index]
                .to_release
                .push(Released::Texture);
        }
        self.handles.dealloc_texture(handle);
    }

    fn destroy_program(&mut self, handle: ProgramHandle) {
        if self.programs[handle.index()].take().is_some() {
            self.frames[self.frame_index]
                .to_release
                .push(Released::Program);
        }
        self.handles.dealloc_program(handle);
    }

    fn bind_vertex_buffer(&mut self, _slot: u32, _buffer: BufferHandle, _offset: u32, _stride: u32) {
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle) {
        self.current_index_buffer = buffer;
    }

    fn bind_uniform_buffer(
        &mut self,
        _slot: u32,
        _buffer: BufferHandle,
        _offset: usize,
        _size: usize,
    ) {
    }

    fn bind_textures(&mut self, handles: &[TextureHandle], offset: u32) {
        for (i, &handle) in handles.iter().enumerate() {
            self.current_srvs[i + offset as usize] = ShaderRes::Texture(handle);
            if handle.is_valid() {
                let state = self.textures[handle.index()]
                    .as_ref()
                    .map(|t| t.state);
                match state {
                    Some(ResourceState::DepthWrite) => {
                        self.texture_state(handle, ResourceState::DepthRead);
                    }
                    Some(ResourceState::DepthRead) | Some(ResourceState::GenericRead) | None => {}
                    Some(_) => {
                        self.texture_state(handle, ResourceState::GenericRead);
                    }
                }
            }
        }
    }

    fn bind_image_texture(&mut self, handle: TextureHandle, slot: u32) {
        self.current_images[slot as usize] = ShaderRes::Texture(handle);
        if handle.is_valid() && self.textures[handle.index()].is_some() {
            self.texture_state(handle, ResourceState::UnorderedAccess);
        }
    }

    fn bind_shader_buffer(&mut self, buffer: BufferHandle, slot: u32, _flags: BufferFlags) {
        self.current_srvs[slot as usize] = ShaderRes::Buffer(buffer);
    }

    fn set_state(&mut self, state: RenderState) {
        self.current_state = state;
    }

    fn viewport(&mut self, _x: u32, _y: u32, _width: u32, _height: u32) {}

    fn scissor(&mut self, _x: u32, _y: u32, _width: u32, _height: u32) {}

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = program;
    }

    fn set_framebuffer(&mut self, attachments: Option<&[TextureHandle]>, flags: FramebufferFlags) {
        let previous = std::mem::take(&mut self.current_framebuffer.attachments);
        for handle in previous {
            if handle.is_valid() && self.textures[handle.index()].is_some() {
                self.texture_state(handle, ResourceState::GenericRead);
            }
        }
        self.current_framebuffer.color_formats.clear();

        let Some(attachments) = attachments else {
            // default window back buffer
            self.rtv_ring.alloc(1);
            self.current_framebuffer.color_formats.push(TextureFormat::Rgba8);
            return;
        };

        let readonly_ds = flags.contains(FramebufferFlags::READONLY_DEPTH_STENCIL);
        for &handle in attachments {
            self.current_framebuffer.attachments.push(handle);
            if !handle.is_valid() {
                continue;
            }
            let Some(texture) = self.textures[handle.index()].as_ref() else {
                continue;
            };
            let format = texture.format.unwrap_or(TextureFormat::Rgba8);
            if format.is_depth() {
                self.texture_state(
                    handle,
                    if readonly_ds {
                        ResourceState::DepthRead
                    } else {
                        ResourceState::DepthWrite
                    },
                );
                self.dsv_ring.alloc(1);
            } else {
                assert!(
                    self.current_framebuffer.color_formats.len() < MAX_COLOR_ATTACHMENTS,
                    "too many color attachments"
                );
                self.texture_state(handle, ResourceState::RenderTarget);
                self.rtv_ring.alloc(1);
                self.current_framebuffer.color_formats.push(format);
            }
        }
    }

    fn clear(&mut self, _flags: ClearFlags, _color: &[f32; 4], _depth: f32) {}

    fn draw_arrays(&mut self, _offset: u32, _count: u32, _primitive: PrimitiveType) {
        self.resolve_draw();
    }

    fn draw_elements(
        &mut self,
        offset_bytes: u32,
        _count: u32,
        _primitive: PrimitiveType,
        index_type: IndexType,
    ) {
        assert!(self.current_index_buffer.is_valid(), "no index buffer bound");
        assert_eq!(
            offset_bytes & ((1 << index_type.offset_shift()) - 1),
            0,
            "index offset not aligned to the index size"
        );
        self.resolve_draw();
    }

    fn draw_triangles(&mut self, indices_count: u32, index_type: IndexType) {
        self.draw_triangles_instanced(indices_count, 1, index_type);
    }

    fn draw_triangles_instanced(
        &mut self,
        _indices_count: u32,
        _instances_count: u32,
        _index_type: IndexType,
    ) {
        assert!(self.current_index_buffer.is_valid(), "no index buffer bound");
        self.resolve_draw();
    }

    fn dispatch(&mut self, _groups_x: u32, _groups_y: u32, _groups_z: u32) {
        assert!(self.current_program.is_valid(), "no program bound");
        let program = self.programs[self.current_program.index()]
            .as_ref()
            .expect("dispatch with a dead program");
        debug_assert!(program.stages.contains(&shader_compiler::Stage::Compute));
        self.alloc_samplers();
        self.alloc_srv_table(false);
        self.alloc_srv_table(true);
    }

    fn map(&mut self, buffer: BufferHandle, size: usize) -> GfxResult<*mut u8> {
        let b = self.buffers[buffer.index()]
            .as_mut()
            .ok_or_else(|| GfxError::from("map of a dead buffer"))?;
        assert!(!b.mapped, "buffer already mapped");
        debug_assert!(b.flags.intersects(BufferFlags::MAPPABLE | BufferFlags::PERSISTENT));
        assert!(size <= b.data.len());
        b.mapped = true;
        if let Some(persistent) = b.persistent.as_mut() {
            return Ok(persistent.as_mut_ptr());
        }
        Ok(b.data.as_mut_ptr())
    }

    fn unmap(&mut self, buffer: BufferHandle) {
        let b = self.buffers[buffer.index()].as_mut().expect("live buffer");
        assert!(b.mapped, "unmap of an unmapped buffer");
        b.mapped = false;
        if let Some(persistent) = &b.persistent {
            b.data.copy_from_slice(persistent);
        }
    }

    fn update(&mut self, buffer: BufferHandle, data: &[u8]) {
        let frame = &mut self.frames[self.frame_index];
        assert!(
            frame.scratch_used + data.len() <= SCRATCH_BUFFER_SIZE,
            "frame scratch arena overflow"
        );
        frame.scratch_used += data.len();

        let b = self.buffers[buffer.index()].as_mut().expect("live buffer");
        let old = b.state;
        b.state = ResourceState::CopyDest;
        b.data[..data.len()].copy_from_slice(data);
        b.state = old;
    }

    fn copy(&mut self, dst: BufferHandle, src: BufferHandle, dst_offset: u32, size: u32) {
        assert_ne!(dst, src);
        let src_data = {
            let s = self.buffers[src.index()].as_ref().expect("live buffer");
            assert!(!s.mapped);
            s.data[..size as usize].to_vec()
        };
        let d = self.buffers[dst.index()].as_mut().expect("live buffer");
        assert!(!d.mapped);
        let old = d.state;
        d.state = ResourceState::CopyDest;
        d.data[dst_offset as usize..dst_offset as usize + size as usize]
            .copy_from_slice(&src_data);
        d.state = old;
    }

    fn flush_buffer(&mut self, buffer: BufferHandle, offset: usize, len: usize) {
        let b = self.buffers[buffer.index()].as_mut().expect("live buffer");
        let persistent = b
            .persistent
            .as_ref()
            .expect("flush_buffer needs a persistent buffer");
        let range = offset..offset + len;
        let bytes = persistent[range.clone()].to_vec();
        b.data[range].copy_from_slice(&bytes);
        // the mapping does not survive a flush
        b.mapped = false;
    }

    fn swap_buffers(&mut self) -> GfxResult<u32> {
        assert_eq!(self.debug_group_depth, 0, "unbalanced debug groups");
        let submitted = self.frame_index as u32;

        self.frame_index = (self.frame_index + 1) % NUM_FRAMES as usize;
        self.srv_ring.next_frame();
        self.rtv_ring.next_frame();
        self.dsv_ring.next_frame();

        // begin() of the reused slot: the simulated fence is already
        // signaled, so only the release drain remains.
        let frame = self.frame();
        frame.to_release.clear();
        frame.scratch_used = 0;

        Ok(submitted)
    }

    fn set_current_window(&mut self, _window: Option<&dyn HasRawWindowHandle>) {}

    fn wait_frame(&mut self, _frame: u32) {}

    fn push_debug_group(&mut self, _name: &str) {
        self.debug_group_depth += 1;
    }

    fn pop_debug_group(&mut self) {
        assert!(self.debug_group_depth > 0);
        self.debug_group_depth -= 1;
    }

    fn start_capture(&mut self) {}

    fn stop_capture(&mut self) {}
}
