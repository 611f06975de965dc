bitflags::bitflags! {
    pub struct InitFlags: u32 {
        /// Enable the driver debug layer and info-queue filtering. Forced on
        /// in debug builds.
        const DEBUG_OUTPUT = 0x0001;
        /// Probe the frame-capture DLL at startup; absence is silent.
        const LOAD_CAPTURE_TOOL = 0x0002;
    }
}

bitflags::bitflags! {
    pub struct BufferFlags: u32 {
        const UNIFORM_BUFFER = 0x0001;
        const MAPPABLE = 0x0002;
        const PERSISTENT = 0x0004;
        const SHADER_BUFFER = 0x0008;
    }
}

bitflags::bitflags! {
    pub struct TextureFlags: u32 {
        const SRGB = 0x0001;
        const NO_MIPS = 0x0002;
        const READBACK = 0x0004;
        const IS_3D = 0x0008;
        const IS_CUBE = 0x0010;
        const COMPUTE_WRITE = 0x0020;
        const RENDER_TARGET = 0x0040;
        const CLAMP_U = 0x0080;
        const CLAMP_V = 0x0100;
        const CLAMP_W = 0x0200;
        const POINT_FILTER = 0x0400;
    }
}

bitflags::bitflags! {
    pub struct ClearFlags: u32 {
        const COLOR = 0x0001;
        const DEPTH = 0x0002;
        const STENCIL = 0x0004;
    }
}

bitflags::bitflags! {
    pub struct FramebufferFlags: u32 {
        const READONLY_DEPTH_STENCIL = 0x0001;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    D32,
    D24,
    D24S8,
    Srgb,
    Srgba,
    Rgba8,
    Rgba16,
    Rgba16F,
    Rgba32F,
    R16,
    R16F,
    R32F,
    Rg32F,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32 | Self::D24 | Self::D24S8)
    }

    /// Bytes per pixel of the storage format the backend allocates. Srgb
    /// has no native 3-channel storage; it lands in a 4-byte format.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::R16 | Self::R16F => 2,
            Self::D32 | Self::D24 | Self::D24S8 => 4,
            Self::Srgba | Self::Rgba8 | Self::R32F | Self::Srgb => 4,
            Self::Rgba16 | Self::Rgba16F | Self::Rg32F => 8,
            Self::Rgba32F => 16,
        }
    }

    /// Bytes per pixel of caller-supplied upload data, for the formats the
    /// CPU upload path accepts. Srgb uploads are tightly packed 3-channel
    /// data and get expanded on upload.
    pub fn source_pixel_size(self) -> Option<u32> {
        match self {
            Self::R8 => Some(1),
            Self::Srgb => Some(3),
            Self::Rgba8 | Self::Srgba | Self::R32F => Some(4),
            Self::Rgba32F => Some(16),
            _ => None,
        }
    }

    /// Formats the CPU mip generator can downsample; everything else must be
    /// created with `NO_MIPS`.
    pub fn supports_cpu_mips(self) -> bool {
        matches!(
            self,
            Self::R8 | Self::Rgba8 | Self::Srgba | Self::Srgb | Self::R32F | Self::Rgba32F
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Float,
    U8,
    I8,
    I16,
}

impl AttributeType {
    pub fn size(self) -> u32 {
        match self {
            Self::Float => 4,
            Self::U8 | Self::I8 => 1,
            Self::I16 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

/// Index element type of an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    /// log2 of the element size; index byte offsets shift by this.
    pub fn offset_shift(self) -> u32 {
        match self {
            Self::U16 => 1,
            Self::U32 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

impl ShaderStage {
    pub(crate) fn to_compiler(self) -> shader_compiler::Stage {
        match self {
            Self::Vertex => shader_compiler::Stage::Vertex,
            Self::Fragment => shader_compiler::Stage::Fragment,
            Self::Geometry => shader_compiler::Stage::Geometry,
            Self::Compute => shader_compiler::Stage::Compute,
        }
    }
}

/// Usage state a resource occupies on the GPU timeline. Changing states
/// records a transition barrier; each backend maps these onto the native
/// state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Common,
    GenericRead,
    RenderTarget,
    DepthWrite,
    DepthRead,
    UnorderedAccess,
    CopyDest,
    CopySource,
    Present,
}

/// One stage's GLSL source fragment for program creation.
#[derive(Clone, Copy)]
pub struct ShaderSource<'a> {
    pub stage: ShaderStage,
    pub code: &'a str,
}

/// Container metadata parsed from an image blob without creating a resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mips: u32,
    pub layers: u32,
    pub is_cubemap: bool,
}
