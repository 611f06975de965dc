//! Image-container adapter for the DDS family.
//!
//! Recognizes just enough of the header to drive resource creation: the
//! classic 124-byte header, the optional DX10 extension header, and the
//! block-compressed / legacy uncompressed pixel formats the renderer
//! consumes. Anything else is an unsupported-format error.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{GfxError, GfxResult, TextureInfo};

pub const MAGIC: u32 = 0x2053_4444; // "DDS "

const HEADER_SIZE: u32 = 124;

pub const DDSD_CAPS: u32 = 0x1;
pub const DDSD_PIXELFORMAT: u32 = 0x1000;
pub const DDSD_MIPMAPCOUNT: u32 = 0x2_0000;
pub const DDSD_DEPTH: u32 = 0x80_0000;

pub const DDPF_ALPHAPIXELS: u32 = 0x1;
pub const DDPF_FOURCC: u32 = 0x4;
pub const DDPF_INDEXED: u32 = 0x20;
pub const DDPF_RGB: u32 = 0x40;

pub const DDSCAPS2_CUBEMAP: u32 = 0x200;

const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

const FOURCC_DXT1: u32 = fourcc(b"DXT1");
const FOURCC_DXT3: u32 = fourcc(b"DXT3");
const FOURCC_DXT5: u32 = fourcc(b"DXT5");
const FOURCC_ATI1: u32 = fourcc(b"ATI1");
const FOURCC_ATI2: u32 = fourcc(b"ATI2");
const FOURCC_DX10: u32 = fourcc(b"DX10");

/// Data formats the container can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DdsFormat {
    Bc1,
    Bc2,
    Bc3,
    Bc4,
    Bc5,
    Bgra8,
    Rgba8,
    Bgr8,
    Bgr5A1,
    Bgr565,
    Index8,
}

/// How to interpret and upload the payload of a recognized format.
#[derive(Clone, Copy, Debug)]
pub struct LoadInfo {
    pub compressed: bool,
    pub block_bytes: u32,
    pub block_width: u32,
    pub format: DdsFormat,
    /// Whether an sRGB view of the storage format exists.
    pub has_srgb: bool,
}

const LOAD_DXT1: LoadInfo = LoadInfo {
    compressed: true,
    block_bytes: 8,
    block_width: 4,
    format: DdsFormat::Bc1,
    has_srgb: true,
};
const LOAD_DXT3: LoadInfo = LoadInfo {
    compressed: true,
    block_bytes: 16,
    block_width: 4,
    format: DdsFormat::Bc2,
    has_srgb: true,
};
const LOAD_DXT5: LoadInfo = LoadInfo {
    compressed: true,
    block_bytes: 16,
    block_width: 4,
    format: DdsFormat::Bc3,
    has_srgb: true,
};
const LOAD_ATI1: LoadInfo = LoadInfo {
    compressed: true,
    block_bytes: 8,
    block_width: 4,
    format: DdsFormat::Bc4,
    has_srgb: false,
};
const LOAD_ATI2: LoadInfo = LoadInfo {
    compressed: true,
    block_bytes: 16,
    block_width: 4,
    format: DdsFormat::Bc5,
    has_srgb: false,
};
const LOAD_BGRA8: LoadInfo = LoadInfo {
    compressed: false,
    block_bytes: 4,
    block_width: 1,
    format: DdsFormat::Bgra8,
    has_srgb: true,
};
const LOAD_RGBA8: LoadInfo = LoadInfo {
    compressed: false,
    block_bytes: 4,
    block_width: 1,
    format: DdsFormat::Rgba8,
    has_srgb: true,
};
const LOAD_BGR8: LoadInfo = LoadInfo {
    compressed: false,
    block_bytes: 3,
    block_width: 1,
    format: DdsFormat::Bgr8,
    has_srgb: false,
};
const LOAD_BGR5A1: LoadInfo = LoadInfo {
    compressed: false,
    block_bytes: 2,
    block_width: 1,
    format: DdsFormat::Bgr5A1,
    has_srgb: false,
};
const LOAD_BGR565: LoadInfo = LoadInfo {
    compressed: false,
    block_bytes: 2,
    block_width: 1,
    format: DdsFormat::Bgr565,
    has_srgb: false,
};
const LOAD_INDEX8: LoadInfo = LoadInfo {
    compressed: false,
    block_bytes: 1,
    block_width: 1,
    format: DdsFormat::Index8,
    has_srgb: false,
};

/// Byte size of one compressed mip level.
pub fn size_dxtc(width: u32, height: u32, format: DdsFormat) -> u32 {
    let block_bytes = match format {
        DdsFormat::Bc1 | DdsFormat::Bc4 => 8,
        _ => 16,
    };
    ((width + 3) / 4) * ((height + 3) / 4) * block_bytes
}

#[derive(Clone, Copy, Debug, Default)]
struct PixelFormat {
    flags: u32,
    four_cc: u32,
    rgb_bit_count: u32,
    r_mask: u32,
    g_mask: u32,
    b_mask: u32,
    a_mask: u32,
}

impl PixelFormat {
    fn is_fourcc(&self, tag: u32) -> bool {
        self.flags & DDPF_FOURCC != 0 && self.four_cc == tag
    }

    fn is_bgra8(&self) -> bool {
        self.flags & DDPF_RGB != 0
            && self.flags & DDPF_ALPHAPIXELS != 0
            && self.rgb_bit_count == 32
            && self.r_mask == 0x00ff_0000
            && self.g_mask == 0x0000_ff00
            && self.b_mask == 0x0000_00ff
            && self.a_mask == 0xff00_0000
    }

    fn is_rgba8(&self) -> bool {
        self.flags & DDPF_RGB != 0
            && self.flags & DDPF_ALPHAPIXELS != 0
            && self.rgb_bit_count == 32
            && self.r_mask == 0x0000_00ff
            && self.g_mask == 0x0000_ff00
            && self.b_mask == 0x00ff_0000
            && self.a_mask == 0xff00_0000
    }

    fn is_bgr8(&self) -> bool {
        self.flags & DDPF_RGB != 0
            && self.flags & DDPF_ALPHAPIXELS == 0
            && self.rgb_bit_count == 24
            && self.r_mask == 0xff_0000
            && self.g_mask == 0x00_ff00
            && self.b_mask == 0x00_00ff
    }

    fn is_bgr5a1(&self) -> bool {
        self.rgb_bit_count == 16
            && self.r_mask == 0x7c00
            && self.g_mask == 0x03e0
            && self.b_mask == 0x001f
            && self.a_mask == 0x8000
    }

    fn is_bgr565(&self) -> bool {
        self.rgb_bit_count == 16
            && self.r_mask == 0xf800
            && self.g_mask == 0x07e0
            && self.b_mask == 0x001f
    }

    fn is_index8(&self) -> bool {
        self.flags & DDPF_INDEXED != 0 && self.rgb_bit_count == 8
    }
}

#[derive(Clone, Copy, Debug)]
struct Header {
    flags: u32,
    height: u32,
    width: u32,
    depth: u32,
    mip_map_count: u32,
    pixel_format: PixelFormat,
    caps2: u32,
}

fn read_header(r: &mut Cursor<&[u8]>) -> GfxResult<Header> {
    let magic = r.read_u32::<LittleEndian>()?;
    let size = r.read_u32::<LittleEndian>()?;
    let flags = r.read_u32::<LittleEndian>()?;
    let height = r.read_u32::<LittleEndian>()?;
    let width = r.read_u32::<LittleEndian>()?;
    let _pitch_or_linear_size = r.read_u32::<LittleEndian>()?;
    let depth = r.read_u32::<LittleEndian>()?;
    let mip_map_count = r.read_u32::<LittleEndian>()?;
    for _ in 0..11 {
        r.read_u32::<LittleEndian>()?;
    }
    let _pf_size = r.read_u32::<LittleEndian>()?;
    let pixel_format = PixelFormat {
        flags: r.read_u32::<LittleEndian>()?,
        four_cc: r.read_u32::<LittleEndian>()?,
        rgb_bit_count: r.read_u32::<LittleEndian>()?,
        r_mask: r.read_u32::<LittleEndian>()?,
        g_mask: r.read_u32::<LittleEndian>()?,
        b_mask: r.read_u32::<LittleEndian>()?,
        a_mask: r.read_u32::<LittleEndian>()?,
    };
    let _caps = r.read_u32::<LittleEndian>()?;
    let caps2 = r.read_u32::<LittleEndian>()?;
    let _caps3 = r.read_u32::<LittleEndian>()?;
    let _caps4 = r.read_u32::<LittleEndian>()?;
    let _reserved2 = r.read_u32::<LittleEndian>()?;

    if magic != MAGIC
        || size != HEADER_SIZE
        || flags & DDSD_PIXELFORMAT == 0
        || flags & DDSD_CAPS == 0
    {
        return Err(GfxError::String(
            "wrong dds format or corrupted dds".to_string(),
        ));
    }

    Ok(Header {
        flags,
        height,
        width,
        depth,
        mip_map_count,
        pixel_format,
        caps2,
    })
}

#[derive(Clone, Copy, Debug)]
struct Dxt10Header {
    dxgi_format: u32,
    array_size: u32,
}

fn read_dxt10_header(r: &mut Cursor<&[u8]>) -> GfxResult<Dxt10Header> {
    let dxgi_format = r.read_u32::<LittleEndian>()?;
    let _resource_dimension = r.read_u32::<LittleEndian>()?;
    let _misc_flag = r.read_u32::<LittleEndian>()?;
    let array_size = r.read_u32::<LittleEndian>()?;
    let _misc_flags2 = r.read_u32::<LittleEndian>()?;
    Ok(Dxt10Header {
        dxgi_format,
        array_size,
    })
}

// DXGI format codes the DX10 extension header dispatches on.
const DXGI_R8G8B8A8_UNORM: u32 = 28;
const DXGI_BC1_UNORM: u32 = 71;
const DXGI_BC1_UNORM_SRGB: u32 = 72;
const DXGI_BC2_UNORM: u32 = 74;
const DXGI_BC2_UNORM_SRGB: u32 = 75;
const DXGI_BC3_UNORM: u32 = 77;
const DXGI_BC3_UNORM_SRGB: u32 = 78;
const DXGI_B8G8R8A8_UNORM: u32 = 87;
const DXGI_B8G8R8A8_UNORM_SRGB: u32 = 91;

fn dxt10_load_info(dxgi_format: u32) -> GfxResult<&'static LoadInfo> {
    match dxgi_format {
        DXGI_B8G8R8A8_UNORM | DXGI_B8G8R8A8_UNORM_SRGB => Ok(&LOAD_BGRA8),
        DXGI_R8G8B8A8_UNORM => Ok(&LOAD_RGBA8),
        DXGI_BC1_UNORM | DXGI_BC1_UNORM_SRGB => Ok(&LOAD_DXT1),
        DXGI_BC2_UNORM | DXGI_BC2_UNORM_SRGB => Ok(&LOAD_DXT3),
        DXGI_BC3_UNORM | DXGI_BC3_UNORM_SRGB => Ok(&LOAD_DXT5),
        other => Err(GfxError::String(format!(
            "unsupported dxgi format {other} in DX10 dds header"
        ))),
    }
}

/// Parsed container ready for upload: metadata, layout recipe, and the
/// payload bytes that follow the headers.
pub struct ParsedDds<'a> {
    pub info: TextureInfo,
    pub load: &'static LoadInfo,
    pub data: &'a [u8],
}

pub fn parse(blob: &[u8]) -> GfxResult<ParsedDds<'_>> {
    let mut r = Cursor::new(blob);
    let hdr = read_header(&mut r)?;

    let pf = &hdr.pixel_format;
    let mut layers = 1;
    let load: &'static LoadInfo = if pf.is_fourcc(FOURCC_DXT1) {
        &LOAD_DXT1
    } else if pf.is_fourcc(FOURCC_DXT3) {
        &LOAD_DXT3
    } else if pf.is_fourcc(FOURCC_DXT5) {
        &LOAD_DXT5
    } else if pf.is_fourcc(FOURCC_ATI1) {
        &LOAD_ATI1
    } else if pf.is_fourcc(FOURCC_ATI2) {
        &LOAD_ATI2
    } else if pf.is_fourcc(FOURCC_DX10) {
        let dxt10 = read_dxt10_header(&mut r)?;
        layers = dxt10.array_size.max(1);
        dxt10_load_info(dxt10.dxgi_format)?
    } else if pf.is_bgra8() {
        &LOAD_BGRA8
    } else if pf.is_rgba8() {
        &LOAD_RGBA8
    } else if pf.is_bgr8() {
        &LOAD_BGR8
    } else if pf.is_bgr5a1() {
        &LOAD_BGR5A1
    } else if pf.is_bgr565() {
        &LOAD_BGR565
    } else if pf.is_index8() {
        &LOAD_INDEX8
    } else {
        return Err(GfxError::String("unsupported dds pixel format".to_string()));
    };

    let info = TextureInfo {
        width: hdr.width,
        height: hdr.height,
        depth: if hdr.flags & DDSD_DEPTH != 0 {
            hdr.depth.max(1)
        } else {
            1
        },
        mips: if hdr.flags & DDSD_MIPMAPCOUNT != 0 {
            hdr.mip_map_count.max(1)
        } else {
            1
        },
        layers,
        is_cubemap: hdr.caps2 & DDSCAPS2_CUBEMAP != 0,
    };

    let data_offset = r.position() as usize;
    Ok(ParsedDds {
        info,
        load,
        data: &blob[data_offset..],
    })
}

/// Header-only metadata query; no payload validation.
pub fn texture_info(blob: &[u8]) -> GfxResult<TextureInfo> {
    parse(blob).map(|parsed| parsed.info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn write_header(
        four_cc: Option<u32>,
        width: u32,
        height: u32,
        mips: u32,
        caps2: u32,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(MAGIC).unwrap();
        out.write_u32::<LittleEndian>(124).unwrap();
        let mut flags = DDSD_CAPS | DDSD_PIXELFORMAT;
        if mips > 1 {
            flags |= DDSD_MIPMAPCOUNT;
        }
        out.write_u32::<LittleEndian>(flags).unwrap();
        out.write_u32::<LittleEndian>(height).unwrap();
        out.write_u32::<LittleEndian>(width).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // pitch
        out.write_u32::<LittleEndian>(0).unwrap(); // depth
        out.write_u32::<LittleEndian>(mips).unwrap();
        for _ in 0..11 {
            out.write_u32::<LittleEndian>(0).unwrap();
        }
        out.write_u32::<LittleEndian>(32).unwrap(); // pf size
        if let Some(cc) = four_cc {
            out.write_u32::<LittleEndian>(DDPF_FOURCC).unwrap();
            out.write_u32::<LittleEndian>(cc).unwrap();
            for _ in 0..5 {
                out.write_u32::<LittleEndian>(0).unwrap();
            }
        } else {
            out.write_u32::<LittleEndian>(DDPF_RGB | DDPF_ALPHAPIXELS).unwrap();
            out.write_u32::<LittleEndian>(0).unwrap();
            out.write_u32::<LittleEndian>(32).unwrap();
            out.write_u32::<LittleEndian>(0x00ff_0000).unwrap();
            out.write_u32::<LittleEndian>(0x0000_ff00).unwrap();
            out.write_u32::<LittleEndian>(0x0000_00ff).unwrap();
            out.write_u32::<LittleEndian>(0xff00_0000).unwrap();
        }
        out.write_u32::<LittleEndian>(0).unwrap(); // caps
        out.write_u32::<LittleEndian>(caps2).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out
    }

    #[test]
    fn recognizes_dxt1() {
        let blob = write_header(Some(FOURCC_DXT1), 64, 32, 4, 0);
        let parsed = parse(&blob).unwrap();
        assert_eq!(parsed.load.format, DdsFormat::Bc1);
        assert!(parsed.load.compressed);
        assert_eq!(parsed.load.block_bytes, 8);
        assert_eq!(parsed.info.width, 64);
        assert_eq!(parsed.info.height, 32);
        assert_eq!(parsed.info.mips, 4);
        assert_eq!(parsed.info.layers, 1);
        assert!(!parsed.info.is_cubemap);
    }

    #[test]
    fn recognizes_bgra8_masks() {
        let blob = write_header(None, 16, 16, 1, 0);
        let parsed = parse(&blob).unwrap();
        assert_eq!(parsed.load.format, DdsFormat::Bgra8);
        assert!(!parsed.load.compressed);
    }

    #[test]
    fn cubemap_detected_from_caps2() {
        let blob = write_header(Some(FOURCC_DXT5), 128, 128, 8, DDSCAPS2_CUBEMAP);
        let info = texture_info(&blob).unwrap();
        assert!(info.is_cubemap);
        assert_eq!(info.mips, 8);
    }

    #[test]
    fn dx10_header_supplies_array_size() {
        let mut blob = write_header(Some(FOURCC_DX10), 8, 8, 1, 0);
        blob.write_u32::<LittleEndian>(DXGI_BC3_UNORM).unwrap();
        blob.write_u32::<LittleEndian>(3).unwrap(); // dimension
        blob.write_u32::<LittleEndian>(0).unwrap(); // misc
        blob.write_u32::<LittleEndian>(6).unwrap(); // array size
        blob.write_u32::<LittleEndian>(0).unwrap(); // misc2
        let parsed = parse(&blob).unwrap();
        assert_eq!(parsed.info.layers, 6);
        assert_eq!(parsed.load.format, DdsFormat::Bc3);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut blob = write_header(Some(FOURCC_DXT1), 4, 4, 1, 0);
        blob[0] = b'X';
        assert!(parse(&blob).is_err());
    }

    #[test]
    fn unknown_fourcc_is_unsupported() {
        let blob = write_header(Some(fourcc(b"WHAT")), 4, 4, 1, 0);
        assert!(parse(&blob).is_err());
    }

    #[test]
    fn dxtc_sizes() {
        // whole blocks
        assert_eq!(size_dxtc(4, 4, DdsFormat::Bc1), 8);
        assert_eq!(size_dxtc(4, 4, DdsFormat::Bc3), 16);
        assert_eq!(size_dxtc(8, 8, DdsFormat::Bc1), 32);
        // partial blocks round up
        assert_eq!(size_dxtc(1, 1, DdsFormat::Bc1), 8);
        assert_eq!(size_dxtc(5, 4, DdsFormat::Bc4), 16);
        assert_eq!(size_dxtc(5, 5, DdsFormat::Bc5), 64);
    }
}
