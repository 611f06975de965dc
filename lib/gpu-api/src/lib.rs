//! Graphics-backend abstraction over an explicit command-list driver.
//!
//! The crate exposes a small, handle-based rendering API to a host engine
//! and implements it over the native GPU driver. Resources are referred to
//! by opaque 32-bit handles allocated from fixed-capacity slabs; everything
//! else lives behind a backend context value returned by `new`.
//!
//! # Main objects
//!
//! * [`GpuBackend`] - the public contract; one implementation per backend.
//! * [`backends::dx12::Dx12Backend`] - explicit command-list backend over
//!   D3D12 (windows only).
//! * [`backends::null::NullBackend`] - headless backend honoring the same
//!   contract with host-side bookkeeping; drives the portable test suite.
//! * [`HandleAllocator`] - the only piece callable from foreign threads:
//!   O(1) handle allocation serialized by a mutex per slab.
//!
//! # Threading model
//!
//! One dedicated renderer thread owns the context and records all work; the
//! recording path never blocks. The single blocking call is the frame-fence
//! wait at the top of a frame, which also bounds the amount of outstanding
//! work to the frame-ring depth.
//!
//! # Frame flow
//!
//! ```text
//! begin-frame -> wait(frame fence) -> release pending -> reset recorder
//! record: bind state -> emit transitions -> resolve pipeline -> draw
//! end-frame -> submit -> signal(fence) -> advance frame ring -> present
//! ```

// crate lints
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::await_holding_lock,
    clippy::dbg_macro,
    clippy::explicit_into_iter_loop,
    clippy::filter_map_next,
    clippy::inefficient_to_string,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_flatten,
    clippy::needless_continue,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    rust_2018_idioms
)]

pub mod backends;
pub mod dds;
pub mod descriptors;
pub mod error;
pub mod handle;
pub mod mip;
pub mod types;

pub use error::*;
pub use handle::*;
pub use types::*;

use raw_window_handle::HasRawWindowHandle;

//
// Constants
//

/// Depth of the frame ring; equals the swap-chain back-buffer count.
pub const NUM_FRAMES: u32 = 3;
/// Per-frame staging arena; sized for the worst frame by design.
pub const SCRATCH_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Shader-visible SRV/CBV/UAV window size per frame.
pub const MAX_DESCRIPTORS: u32 = 64 * 1024;
/// Persistent (non-shader-visible) view store size.
pub const BACKING_DESCRIPTORS: u32 = 4096;
/// Sampler heap size; samplers are deduplicated and never reset.
pub const MAX_SAMPLER_DESCRIPTORS: u32 = 2048;
/// Render-target view ring window size per frame.
pub const RTV_DESCRIPTORS: u32 = 1024;
/// Depth-stencil view ring window size per frame.
pub const DSV_DESCRIPTORS: u32 = 256;

pub const MAX_PROGRAMS: u32 = 256;
pub const MAX_BUFFERS: u32 = 8192;
pub const MAX_TEXTURES: u32 = 4096;

/// Vertex attributes per program.
pub const MAX_ATTRIBUTES: usize = 16;
/// Color attachments per framebuffer.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;
/// SRV/UAV slots tracked for the next draw or dispatch.
pub const MAX_SHADER_RESOURCES: usize = 10;
/// Swap chains the backend will manage.
pub const MAX_WINDOWS: usize = 64;

//
// The public contract, one implementation per backend. Backend selection is
// a build-time concern; see [`DefaultBackend`].
//
pub trait GpuBackend: Sized {
    /// One-time initialization: device, root signature, queue, heaps, frame
    /// ring and the initial swap chain for `window`. Nothing survives a
    /// failure.
    fn new(window: &dyn HasRawWindowHandle, flags: InitFlags) -> GfxResult<Self>;

    /// Drains all in-flight frames, then releases device objects.
    fn shutdown(&mut self) -> GfxResult<()>;

    /// The thread-safe handle plane. Allocation/deallocation may happen on
    /// any thread; every other operation belongs to the renderer thread.
    fn handles(&self) -> &HandleAllocator;

    // -- creation (renderer thread) --

    fn create_buffer(
        &mut self,
        handle: BufferHandle,
        flags: BufferFlags,
        size: usize,
        data: Option<&[u8]>,
    ) -> GfxResult<()>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> GfxResult<()>;

    /// Create a texture from a DDS container blob.
    fn load_texture(
        &mut self,
        handle: TextureHandle,
        blob: &[u8],
        flags: TextureFlags,
        name: &str,
    ) -> GfxResult<()>;

    fn create_program(
        &mut self,
        handle: ProgramHandle,
        decl: &VertexDecl,
        sources: &[ShaderSource<'_>],
        prefixes: &[&str],
        name: &str,
    ) -> GfxResult<()>;

    /// Queue the native object on the current frame's release list and free
    /// the handle slot. The native object survives until that frame is
    /// retired.
    fn destroy_buffer(&mut self, handle: BufferHandle);
    fn destroy_texture(&mut self, handle: TextureHandle);
    fn destroy_program(&mut self, handle: ProgramHandle);

    // -- binding (recorded, fire-and-forget) --

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u32, stride: u32);
    fn bind_index_buffer(&mut self, buffer: BufferHandle);
    /// Bind a constant buffer by GPU address at root parameter `slot`. An
    /// invalid handle binds a null address.
    fn bind_uniform_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: usize, size: usize);
    /// Record the SRV set for the next draw/dispatch starting at `offset`,
    /// transitioning each resource to a shader-readable state.
    fn bind_textures(&mut self, handles: &[TextureHandle], offset: u32);
    fn bind_image_texture(&mut self, handle: TextureHandle, slot: u32);
    fn bind_shader_buffer(&mut self, buffer: BufferHandle, slot: u32, flags: BufferFlags);

    // -- state --

    fn set_state(&mut self, state: RenderState);
    fn viewport(&mut self, x: u32, y: u32, width: u32, height: u32);
    fn scissor(&mut self, x: u32, y: u32, width: u32, height: u32);
    fn use_program(&mut self, program: ProgramHandle);
    /// `None` binds the current window's back buffer.
    fn set_framebuffer(&mut self, attachments: Option<&[TextureHandle]>, flags: FramebufferFlags);
    fn clear(&mut self, flags: ClearFlags, color: &[f32; 4], depth: f32);

    // -- draw / dispatch --

    fn draw_arrays(&mut self, offset: u32, count: u32, primitive: PrimitiveType);
    fn draw_elements(
        &mut self,
        offset_bytes: u32,
        count: u32,
        primitive: PrimitiveType,
        index_type: IndexType,
    );
    fn draw_triangles(&mut self, indices_count: u32, index_type: IndexType);
    fn draw_triangles_instanced(
        &mut self,
        indices_count: u32,
        instances_count: u32,
        index_type: IndexType,
    );
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);

    // -- data --

    /// Acquire an exclusive mapping of `buffer`. Released by [`Self::unmap`].
    fn map(&mut self, buffer: BufferHandle, size: usize) -> GfxResult<*mut u8>;
    fn unmap(&mut self, buffer: BufferHandle);
    /// Copy `data` into the buffer through the frame scratch arena.
    fn update(&mut self, buffer: BufferHandle, data: &[u8]);
    fn copy(&mut self, dst: BufferHandle, src: BufferHandle, dst_offset: u32, size: u32);
    /// Flush `len` bytes of a persistent buffer's shadow at `offset` to the
    /// native buffer; the mapping is released immediately.
    fn flush_buffer(&mut self, buffer: BufferHandle, offset: usize, len: usize);

    // -- frame --

    /// Submit the frame, present every live window, advance the ring.
    /// Returns the index of the frame slot that was just submitted.
    fn swap_buffers(&mut self) -> GfxResult<u32>;
    /// `None` selects the primary window. Unknown handles get a swap chain
    /// on first use.
    fn set_current_window(&mut self, window: Option<&dyn HasRawWindowHandle>);
    /// Block until the given frame slot is retired.
    fn wait_frame(&mut self, frame: u32);

    // -- debug --

    fn push_debug_group(&mut self, name: &str);
    fn pop_debug_group(&mut self);
    fn start_capture(&mut self);
    fn stop_capture(&mut self);
}

/// Parse container metadata from an image blob without creating anything.
pub fn texture_info(blob: &[u8]) -> GfxResult<TextureInfo> {
    dds::texture_info(blob)
}

#[cfg(windows)]
pub type DefaultBackend = backends::dx12::Dx12Backend;

#[cfg(not(windows))]
pub type DefaultBackend = backends::null::NullBackend;
