//! The packed 64-bit render-state tuple.
//!
//! Bit layout, low to high:
//!
//! ```text
//!  0.. 5  flag bits (cull back/front, wireframe, depth test/write, scissor)
//!  6..21  blend factors, 4 x 4 bits {src-rgb, dst-rgb, src-a, dst-a};
//!         all-zero means blending disabled
//! 22..29  stencil write mask
//! 30..33  stencil func (0 disables stencil entirely)
//! 34..41  stencil reference
//! 42..49  stencil read mask
//! 50..61  stencil ops, 4 bits each: sfail, zfail, zpass
//! ```

bitflags::bitflags! {
    pub struct StateFlags: u64 {
        const CULL_BACK = 1 << 0;
        const CULL_FRONT = 1 << 1;
        const WIREFRAME = 1 << 2;
        const DEPTH_TEST = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const SCISSOR_TEST = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlendFactor {
    Zero = 0,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstColor,
    InvDstColor,
    DstAlpha,
    InvDstAlpha,
    Src1Color,
    InvSrc1Color,
    Src1Alpha,
    InvSrc1Alpha,
}

impl BlendFactor {
    const TABLE: [Self; 14] = [
        Self::Zero,
        Self::One,
        Self::SrcColor,
        Self::InvSrcColor,
        Self::SrcAlpha,
        Self::InvSrcAlpha,
        Self::DstColor,
        Self::InvDstColor,
        Self::DstAlpha,
        Self::InvDstAlpha,
        Self::Src1Color,
        Self::InvSrc1Color,
        Self::Src1Alpha,
        Self::InvSrc1Alpha,
    ];

    pub fn from_bits(bits: u8) -> Self {
        Self::TABLE[bits as usize]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StencilFunc {
    Disable = 0,
    Always,
    Equal,
    NotEqual,
}

impl StencilFunc {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Disable,
            1 => Self::Always,
            2 => Self::Equal,
            3 => Self::NotEqual,
            _ => {
                debug_assert!(false, "invalid stencil func bits {bits}");
                Self::Disable
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StencilOp {
    Keep = 0,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

impl StencilOp {
    const TABLE: [Self; 8] = [
        Self::Keep,
        Self::Zero,
        Self::Replace,
        Self::IncrSat,
        Self::DecrSat,
        Self::Invert,
        Self::Incr,
        Self::Decr,
    ];

    pub fn from_bits(bits: u8) -> Self {
        Self::TABLE[bits as usize & 7]
    }
}

const BLEND_SHIFT: u64 = 6;
const STENCIL_WRITE_MASK_SHIFT: u64 = 22;
const STENCIL_FUNC_SHIFT: u64 = 30;
const STENCIL_REF_SHIFT: u64 = 34;
const STENCIL_READ_MASK_SHIFT: u64 = 42;
const STENCIL_SFAIL_SHIFT: u64 = 50;
const STENCIL_ZFAIL_SHIFT: u64 = 54;
const STENCIL_ZPASS_SHIFT: u64 = 58;

/// Packed render state; one value of this keys the fixed-function half of a
/// pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderState(pub u64);

impl RenderState {
    pub fn from_flags(flags: StateFlags) -> Self {
        Self(flags.bits())
    }

    pub fn with_blend(
        self,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_a: BlendFactor,
        dst_a: BlendFactor,
    ) -> Self {
        let bits = (src_rgb as u64)
            | (dst_rgb as u64) << 4
            | (src_a as u64) << 8
            | (dst_a as u64) << 12;
        Self(self.0 & !(0xffff << BLEND_SHIFT) | bits << BLEND_SHIFT)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_stencil(
        self,
        func: StencilFunc,
        reference: u8,
        read_mask: u8,
        write_mask: u8,
        sfail: StencilOp,
        zfail: StencilOp,
        zpass: StencilOp,
    ) -> Self {
        Self(
            self.0
                | (write_mask as u64) << STENCIL_WRITE_MASK_SHIFT
                | (func as u64) << STENCIL_FUNC_SHIFT
                | (reference as u64) << STENCIL_REF_SHIFT
                | (read_mask as u64) << STENCIL_READ_MASK_SHIFT
                | (sfail as u64) << STENCIL_SFAIL_SHIFT
                | (zfail as u64) << STENCIL_ZFAIL_SHIFT
                | (zpass as u64) << STENCIL_ZPASS_SHIFT,
        )
    }

    pub fn flags(self) -> StateFlags {
        StateFlags::from_bits_truncate(self.0)
    }

    pub fn blend_bits(self) -> u16 {
        (self.0 >> BLEND_SHIFT) as u16
    }

    /// Decoded blend factors, `None` when blending is disabled.
    pub fn blend(self) -> Option<(BlendFactor, BlendFactor, BlendFactor, BlendFactor)> {
        let bits = self.blend_bits();
        if bits == 0 {
            return None;
        }
        Some((
            BlendFactor::from_bits((bits & 0xf) as u8),
            BlendFactor::from_bits((bits >> 4 & 0xf) as u8),
            BlendFactor::from_bits((bits >> 8 & 0xf) as u8),
            BlendFactor::from_bits((bits >> 12 & 0xf) as u8),
        ))
    }

    pub fn stencil_func(self) -> StencilFunc {
        StencilFunc::from_bits((self.0 >> STENCIL_FUNC_SHIFT & 0xf) as u8)
    }

    pub fn stencil_ref(self) -> u8 {
        (self.0 >> STENCIL_REF_SHIFT) as u8
    }

    pub fn stencil_read_mask(self) -> u8 {
        (self.0 >> STENCIL_READ_MASK_SHIFT) as u8
    }

    pub fn stencil_write_mask(self) -> u8 {
        (self.0 >> STENCIL_WRITE_MASK_SHIFT) as u8
    }

    pub fn stencil_ops(self) -> (StencilOp, StencilOp, StencilOp) {
        (
            StencilOp::from_bits((self.0 >> STENCIL_SFAIL_SHIFT & 0xf) as u8),
            StencilOp::from_bits((self.0 >> STENCIL_ZFAIL_SHIFT & 0xf) as u8),
            StencilOp::from_bits((self.0 >> STENCIL_ZPASS_SHIFT & 0xf) as u8),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_has_nothing_enabled() {
        let s = RenderState::default();
        assert!(s.flags().is_empty());
        assert_eq!(s.blend(), None);
        assert_eq!(s.stencil_func(), StencilFunc::Disable);
    }

    #[test]
    fn blend_roundtrip() {
        let s = RenderState::default().with_blend(
            BlendFactor::SrcAlpha,
            BlendFactor::InvSrcAlpha,
            BlendFactor::One,
            BlendFactor::Zero,
        );
        let (src_rgb, dst_rgb, src_a, dst_a) = s.blend().unwrap();
        assert_eq!(src_rgb, BlendFactor::SrcAlpha);
        assert_eq!(dst_rgb, BlendFactor::InvSrcAlpha);
        assert_eq!(src_a, BlendFactor::One);
        assert_eq!(dst_a, BlendFactor::Zero);
        // blend bits live at 6..22
        assert_eq!(s.0 >> 6 & 0xffff, s.blend_bits() as u64);
    }

    #[test]
    fn stencil_roundtrip() {
        let s = RenderState::from_flags(StateFlags::DEPTH_TEST).with_stencil(
            StencilFunc::Equal,
            0xab,
            0xf0,
            0x0f,
            StencilOp::Keep,
            StencilOp::IncrSat,
            StencilOp::Replace,
        );
        assert_eq!(s.stencil_func(), StencilFunc::Equal);
        assert_eq!(s.stencil_ref(), 0xab);
        assert_eq!(s.stencil_read_mask(), 0xf0);
        assert_eq!(s.stencil_write_mask(), 0x0f);
        assert_eq!(
            s.stencil_ops(),
            (StencilOp::Keep, StencilOp::IncrSat, StencilOp::Replace)
        );
        assert!(s.flags().contains(StateFlags::DEPTH_TEST));
    }

    #[test]
    fn stencil_fields_do_not_clobber_blend() {
        let s = RenderState::from_flags(StateFlags::CULL_BACK)
            .with_blend(
                BlendFactor::One,
                BlendFactor::One,
                BlendFactor::One,
                BlendFactor::One,
            )
            .with_stencil(
                StencilFunc::Always,
                0xff,
                0xff,
                0xff,
                StencilOp::Decr,
                StencilOp::Decr,
                StencilOp::Decr,
            );
        assert_eq!(
            s.blend(),
            Some((
                BlendFactor::One,
                BlendFactor::One,
                BlendFactor::One,
                BlendFactor::One
            ))
        );
        assert_eq!(s.stencil_ref(), 0xff);
    }
}
