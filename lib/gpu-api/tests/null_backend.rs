//! Contract tests driven through the headless backend.

use gpu_api::backends::null::NullBackend;
use gpu_api::{
    AttributeFlags, AttributeType, BufferFlags, GpuBackend, PrimitiveType, ShaderSource,
    ShaderStage, TextureFlags, TextureFormat, VertexDecl, MAX_BUFFERS, NUM_FRAMES,
};
use raw_window_handle::{HasRawWindowHandle, RawWindowHandle, Win32WindowHandle};

struct Headless;

unsafe impl HasRawWindowHandle for Headless {
    fn raw_window_handle(&self) -> RawWindowHandle {
        RawWindowHandle::Win32(Win32WindowHandle::empty())
    }
}

fn backend() -> NullBackend {
    NullBackend::new(&Headless, gpu_api::InitFlags::empty()).unwrap()
}

const VS: &str = "
    layout(location = 0) in vec3 a_position;
    void main() {
        gl_Position = vec4(a_position, 1.0);
    }";

const FS: &str = "
    layout(location = 0) out vec4 o_color;
    void main() {
        o_color = vec4(1.0);
    }";

fn trivial_program(gpu: &mut NullBackend) -> gpu_api::ProgramHandle {
    let handle = gpu.handles().alloc_program_handle();
    let mut decl = VertexDecl::new();
    decl.add_attribute(0, 0, 3, AttributeType::Float, AttributeFlags::empty());
    gpu.create_program(
        handle,
        &decl,
        &[
            ShaderSource {
                stage: ShaderStage::Vertex,
                code: VS,
            },
            ShaderSource {
                stage: ShaderStage::Fragment,
                code: FS,
            },
        ],
        &[],
        "trivial",
    )
    .unwrap();
    handle
}

#[test]
fn handle_exhaustion_returns_invalid_and_recovers() {
    let mut gpu = backend();
    let mut handles = Vec::new();
    for _ in 0..MAX_BUFFERS {
        let h = gpu.handles().alloc_buffer_handle();
        assert!(h.is_valid());
        handles.push(h);
    }
    // one past capacity fails without disturbing the free list
    assert!(!gpu.handles().alloc_buffer_handle().is_valid());
    assert!(!gpu.handles().alloc_buffer_handle().is_valid());

    let freed = handles[100];
    gpu.destroy_buffer(freed);
    let reused = gpu.handles().alloc_buffer_handle();
    assert_eq!(reused, freed);
}

#[test]
fn map_unmap_roundtrip_preserves_bytes() {
    let mut gpu = backend();
    let buffer = gpu.handles().alloc_buffer_handle();
    gpu.create_buffer(buffer, BufferFlags::MAPPABLE, 64, None)
        .unwrap();

    let ptr = gpu.map(buffer, 64).unwrap();
    unsafe {
        std::ptr::copy_nonoverlapping([1_u8, 2, 3, 4].as_ptr(), ptr, 4);
    }
    gpu.unmap(buffer);

    // second mapping has the same size and observes the earlier writes
    let ptr = gpu.map(buffer, 64).unwrap();
    let mut read = [0_u8; 4];
    unsafe {
        std::ptr::copy_nonoverlapping(ptr, read.as_mut_ptr(), 4);
    }
    gpu.unmap(buffer);
    assert_eq!(read, [1, 2, 3, 4]);
}

#[test]
fn update_then_copy_propagates_contents() {
    let mut gpu = backend();
    let src = gpu.handles().alloc_buffer_handle();
    let dst = gpu.handles().alloc_buffer_handle();
    gpu.create_buffer(src, BufferFlags::empty(), 16, None).unwrap();
    gpu.create_buffer(dst, BufferFlags::MAPPABLE, 16, None).unwrap();

    let payload: Vec<u8> = (0..16).collect();
    gpu.update(src, &payload);
    gpu.copy(dst, src, 0, 16);

    let ptr = gpu.map(dst, 16).unwrap();
    let mut read = vec![0_u8; 16];
    unsafe {
        std::ptr::copy_nonoverlapping(ptr, read.as_mut_ptr(), 16);
    }
    gpu.unmap(dst);
    assert_eq!(read, payload);
}

#[test]
fn shader_buffer_sizes_round_up_to_16() {
    let mut gpu = backend();
    let buffer = gpu.handles().alloc_buffer_handle();
    gpu.create_buffer(
        buffer,
        BufferFlags::SHADER_BUFFER | BufferFlags::MAPPABLE,
        20,
        None,
    )
    .unwrap();
    // the rounded-up tail is mappable storage
    let ptr = gpu.map(buffer, 32).unwrap();
    assert!(!ptr.is_null());
    gpu.unmap(buffer);
}

#[test]
fn persistent_flush_unmaps_immediately() {
    let mut gpu = backend();
    let buffer = gpu.handles().alloc_buffer_handle();
    gpu.create_buffer(
        buffer,
        BufferFlags::PERSISTENT | BufferFlags::MAPPABLE,
        32,
        None,
    )
    .unwrap();

    let ptr = gpu.map(buffer, 32).unwrap();
    unsafe {
        std::ptr::write_bytes(ptr, 0xab, 32);
    }
    gpu.flush_buffer(buffer, 0, 32);
    // the flush released the mapping; a fresh map must succeed
    let ptr = gpu.map(buffer, 32).unwrap();
    let mut read = [0_u8; 1];
    unsafe {
        std::ptr::copy_nonoverlapping(ptr, read.as_mut_ptr(), 1);
    }
    gpu.unmap(buffer);
    assert_eq!(read[0], 0xab);
}

#[test]
fn destroyed_objects_release_on_slot_reuse() {
    let mut gpu = backend();
    let texture = gpu.handles().alloc_texture_handle();
    gpu.create_texture(
        texture,
        16,
        16,
        1,
        TextureFormat::Rgba8,
        TextureFlags::NO_MIPS,
        None,
        "doomed",
    )
    .unwrap();

    gpu.destroy_texture(texture);
    // not released synchronously
    assert_eq!(gpu.pending_release_count(), 1);

    // the object survives until the frame that queued it is begun again
    for _ in 0..NUM_FRAMES - 1 {
        gpu.swap_buffers().unwrap();
        assert_eq!(gpu.pending_release_count(), 1);
    }
    gpu.swap_buffers().unwrap();
    assert_eq!(gpu.pending_release_count(), 0);
}

#[test]
fn swap_buffers_reports_retired_slots_in_ring_order() {
    let mut gpu = backend();
    let mut order = Vec::new();
    for _ in 0..7 {
        order.push(gpu.swap_buffers().unwrap());
    }
    assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn sampler_allocations_track_distinct_flag_sets() {
    let mut gpu = backend();
    let program = trivial_program(&mut gpu);
    gpu.use_program(program);

    let plain = gpu.handles().alloc_texture_handle();
    gpu.create_texture(
        plain,
        4,
        4,
        1,
        TextureFormat::Rgba8,
        TextureFlags::NO_MIPS,
        None,
        "plain",
    )
    .unwrap();
    let clamped = gpu.handles().alloc_texture_handle();
    gpu.create_texture(
        clamped,
        4,
        4,
        1,
        TextureFormat::Rgba8,
        TextureFlags::NO_MIPS | TextureFlags::CLAMP_U | TextureFlags::POINT_FILTER,
        None,
        "clamped",
    )
    .unwrap();

    gpu.bind_textures(&[plain], 0);
    gpu.draw_arrays(0, 3, PrimitiveType::Triangles);
    assert_eq!(gpu.sampler_count(), 1);

    // an identical bind set reuses the cached block
    gpu.bind_textures(&[plain], 0);
    gpu.draw_arrays(0, 3, PrimitiveType::Triangles);
    assert_eq!(gpu.sampler_count(), 1);

    gpu.bind_textures(&[clamped], 0);
    gpu.draw_arrays(0, 3, PrimitiveType::Triangles);
    assert_eq!(gpu.sampler_count(), 2);
}

#[test]
fn program_build_failures_surface() {
    let mut gpu = backend();
    let broken = gpu.handles().alloc_program_handle();
    let mut decl = VertexDecl::new();
    decl.add_attribute(0, 0, 3, AttributeType::Float, AttributeFlags::empty());
    let result = gpu.create_program(
        broken,
        &decl,
        &[ShaderSource {
            stage: ShaderStage::Vertex,
            code: "void main() { nonsense }",
        }],
        &[],
        "broken",
    );
    assert!(result.is_err());
}

#[test]
fn compute_workgroup_builtin_is_rejected() {
    let mut gpu = backend();
    let handle = gpu.handles().alloc_program_handle();
    let result = gpu.create_program(
        handle,
        &VertexDecl::new(),
        &[ShaderSource {
            stage: ShaderStage::Compute,
            code: "
                layout(local_size_x = 1) in;
                layout(std430, binding = 0) buffer Out { uvec3 counts; };
                void main() { counts = gl_NumWorkGroups; }",
        }],
        &[],
        "bad_compute",
    );
    assert!(result.is_err());
}

#[test]
fn mip_counts_match_texture_dimensions() {
    let mut gpu = backend();
    let no_mips = gpu.handles().alloc_texture_handle();
    gpu.create_texture(
        no_mips,
        256,
        128,
        1,
        TextureFormat::Rgba16F,
        TextureFlags::NO_MIPS,
        None,
        "no_mips",
    )
    .unwrap();
    assert_eq!(gpu.texture_mip_count(no_mips), Some(1));

    let full_chain = gpu.handles().alloc_texture_handle();
    gpu.create_texture(
        full_chain,
        256,
        128,
        1,
        TextureFormat::Rgba8,
        TextureFlags::empty(),
        None,
        "full_chain",
    )
    .unwrap();
    assert_eq!(gpu.texture_mip_count(full_chain), Some(9));
    assert_eq!(gpu.texture_extent(full_chain), Some((256, 128, 1)));

    // a format without CPU mip support must be created NO_MIPS
    let bad = gpu.handles().alloc_texture_handle();
    let result = gpu.create_texture(
        bad,
        256,
        128,
        1,
        TextureFormat::Rgba16F,
        TextureFlags::empty(),
        None,
        "bad",
    );
    assert!(result.is_err());
}

#[test]
fn render_state_is_tracked() {
    let mut gpu = backend();
    let state = gpu_api::RenderState::from_flags(
        gpu_api::StateFlags::DEPTH_TEST | gpu_api::StateFlags::CULL_BACK,
    )
    .with_blend(
        gpu_api::BlendFactor::SrcAlpha,
        gpu_api::BlendFactor::InvSrcAlpha,
        gpu_api::BlendFactor::One,
        gpu_api::BlendFactor::Zero,
    );
    gpu.set_state(state);
    assert_eq!(gpu.render_state(), state);
}

#[test]
#[should_panic(expected = "frame scratch arena overflow")]
fn scratch_overflow_is_a_caller_bug() {
    let mut gpu = backend();
    let buffer = gpu.handles().alloc_buffer_handle();
    let size = gpu_api::SCRATCH_BUFFER_SIZE + 1;
    gpu.create_buffer(buffer, BufferFlags::empty(), size, None)
        .unwrap();
    let data = vec![0_u8; size];
    gpu.update(buffer, &data);
}

mod dds_blobs {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn dxt1_blob(width: u32, height: u32, mips: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(gpu_api::dds::MAGIC).unwrap();
        out.write_u32::<LittleEndian>(124).unwrap();
        let mut flags = gpu_api::dds::DDSD_CAPS | gpu_api::dds::DDSD_PIXELFORMAT;
        if mips > 1 {
            flags |= gpu_api::dds::DDSD_MIPMAPCOUNT;
        }
        out.write_u32::<LittleEndian>(flags).unwrap();
        out.write_u32::<LittleEndian>(height).unwrap();
        out.write_u32::<LittleEndian>(width).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(mips).unwrap();
        for _ in 0..11 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        out.write_u32::<LittleEndian>(32).unwrap();
        out.write_u32::<LittleEndian>(gpu_api::dds::DDPF_FOURCC).unwrap();
        out.extend_from_slice(b"DXT1");
        for _ in 0..5 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        for _ in 0..5 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        // payload: whole mip chain of zero blocks
        for level in 0..mips {
            let w = (width >> level).max(1);
            let h = (height >> level).max(1);
            let size = ((w + 3) / 4) * ((h + 3) / 4) * 8;
            out.extend(std::iter::repeat(0_u8).take(size as usize));
        }
        out
    }

    #[test]
    fn load_texture_accepts_compressed_container() {
        let mut gpu = backend();
        let texture = gpu.handles().alloc_texture_handle();
        let blob = dxt1_blob(16, 16, 5);
        gpu.load_texture(texture, &blob, TextureFlags::empty(), "checker")
            .unwrap();

        let info = gpu_api::texture_info(&blob).unwrap();
        assert_eq!(info.width, 16);
        assert_eq!(info.mips, 5);
    }

    #[test]
    fn load_texture_rejects_truncated_payload() {
        let mut gpu = backend();
        let texture = gpu.handles().alloc_texture_handle();
        let mut blob = dxt1_blob(16, 16, 5);
        blob.truncate(blob.len() - 16);
        assert!(gpu
            .load_texture(texture, &blob, TextureFlags::empty(), "broken")
            .is_err());
    }
}
