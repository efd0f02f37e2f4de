/// Set for linear (non-swizzled) textures
pub const LINEAR_FORMAT_BIT: u8 = 0x20;
/// Set for textures sampled with unnormalized coordinates
pub const UNNORMALIZED_FORMAT_BIT: u8 = 0x40;
/// Storage-layout bits that are not part of the logical pixel format
pub const LAYOUT_BITS: u8 = LINEAR_FORMAT_BIT | UNNORMALIZED_FORMAT_BIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GcmFormat {
    B8,
    A1R5G5B5,
    A4R4G4B4,
    R5G6B5,
    A8R8G8B8,
    Dxt1,
    Dxt23,
    Dxt45,
    G8B8,
    R6G5B5,
    Depth24D8,
    Depth24D8Float,
    Depth16,
    Depth16Float,
    X16,
    Y16X16,
    R5G5B5A1,
    Hilo8,
    HiloS8,
    W16Z16Y16X16Float,
    W32Z32Y32X32Float,
    X32Float,
    D1R5G5B5,
    D8R8G8B8,
    Y16X16Float,
    B8R8G8R8,
    R8B8R8G8,
}

impl GcmFormat {
    pub const ALL: [Self; 27] = [
        Self::B8,
        Self::A1R5G5B5,
        Self::A4R4G4B4,
        Self::R5G6B5,
        Self::A8R8G8B8,
        Self::Dxt1,
        Self::Dxt23,
        Self::Dxt45,
        Self::G8B8,
        Self::R6G5B5,
        Self::Depth24D8,
        Self::Depth24D8Float,
        Self::Depth16,
        Self::Depth16Float,
        Self::X16,
        Self::Y16X16,
        Self::R5G5B5A1,
        Self::Hilo8,
        Self::HiloS8,
        Self::W16Z16Y16X16Float,
        Self::W32Z32Y32X32Float,
        Self::X32Float,
        Self::D1R5G5B5,
        Self::D8R8G8B8,
        Self::Y16X16Float,
        Self::B8R8G8R8,
        Self::R8B8R8G8,
    ];

    /// Look up a logical format id. The id must already have [`LAYOUT_BITS`] stripped.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        let format = match id {
            0x81 => Self::B8,
            0x82 => Self::A1R5G5B5,
            0x83 => Self::A4R4G4B4,
            0x84 => Self::R5G6B5,
            0x85 => Self::A8R8G8B8,
            0x86 => Self::Dxt1,
            0x87 => Self::Dxt23,
            0x88 => Self::Dxt45,
            0x8B => Self::G8B8,
            // The two compressed 4:2:2 formats have the LN bit set in their canonical ids
            0x8D => Self::B8R8G8R8,
            0x8E => Self::R8B8R8G8,
            0x8F => Self::R6G5B5,
            0x90 => Self::Depth24D8,
            0x91 => Self::Depth24D8Float,
            0x92 => Self::Depth16,
            0x93 => Self::Depth16Float,
            0x94 => Self::X16,
            0x95 => Self::Y16X16,
            0x97 => Self::R5G5B5A1,
            0x98 => Self::Hilo8,
            0x99 => Self::HiloS8,
            0x9A => Self::W16Z16Y16X16Float,
            0x9B => Self::W32Z32Y32X32Float,
            0x9C => Self::X32Float,
            0x9D => Self::D1R5G5B5,
            0x9E => Self::D8R8G8B8,
            0x9F => Self::Y16X16Float,
            _ => return None,
        };
        Some(format)
    }

    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::B8 => 0x81,
            Self::A1R5G5B5 => 0x82,
            Self::A4R4G4B4 => 0x83,
            Self::R5G6B5 => 0x84,
            Self::A8R8G8B8 => 0x85,
            Self::Dxt1 => 0x86,
            Self::Dxt23 => 0x87,
            Self::Dxt45 => 0x88,
            Self::G8B8 => 0x8B,
            Self::B8R8G8R8 => 0x8D,
            Self::R8B8R8G8 => 0x8E,
            Self::R6G5B5 => 0x8F,
            Self::Depth24D8 => 0x90,
            Self::Depth24D8Float => 0x91,
            Self::Depth16 => 0x92,
            Self::Depth16Float => 0x93,
            Self::X16 => 0x94,
            Self::Y16X16 => 0x95,
            Self::R5G5B5A1 => 0x97,
            Self::Hilo8 => 0x98,
            Self::HiloS8 => 0x99,
            Self::W16Z16Y16X16Float => 0x9A,
            Self::W32Z32Y32X32Float => 0x9B,
            Self::X32Float => 0x9C,
            Self::D1R5G5B5 => 0x9D,
            Self::D8R8G8B8 => 0x9E,
            Self::Y16X16Float => 0x9F,
        }
    }

    #[must_use]
    pub fn info(self) -> FormatInfo {
        use HostFormat as H;
        use RemapKind as R;
        use TexelConversion as C;

        match self {
            Self::B8 => FormatInfo::texel(1, H::R8Unorm, C::Copy, R::Replicate),
            Self::A1R5G5B5 => FormatInfo::texel(2, H::B5G5R5A1Unorm, C::Swap16, R::Default),
            Self::A4R4G4B4 => FormatInfo::texel(2, H::B4G4R4A4Unorm, C::Swap16, R::Default),
            Self::R5G6B5 => FormatInfo::texel(2, H::B5G6R5Unorm, C::Swap16, R::Default),
            Self::A8R8G8B8 => FormatInfo::texel(4, H::Rgba8Unorm, C::Copy, R::Argb),
            Self::Dxt1 => FormatInfo::block(4, 4, 8, H::Bc1Unorm, R::Default),
            Self::Dxt23 => FormatInfo::block(4, 4, 16, H::Bc2Unorm, R::Default),
            Self::Dxt45 => FormatInfo::block(4, 4, 16, H::Bc3Unorm, R::Default),
            Self::G8B8 => FormatInfo::texel(2, H::Rg8Unorm, C::Copy, R::Default),
            Self::R6G5B5 => FormatInfo::texel(2, H::Rgba8Unorm, C::R6G5B5ToRgba8, R::Default),
            Self::Depth24D8 => FormatInfo::texel(4, H::R32Uint, C::Swap32, R::Default),
            Self::Depth24D8Float => FormatInfo::texel(4, H::R32Float, C::Swap32, R::Default),
            Self::Depth16 => FormatInfo::texel(2, H::R16Unorm, C::Swap16, R::Default),
            Self::Depth16Float => FormatInfo::texel(2, H::R16Float, C::Swap16, R::Default),
            Self::X16 => FormatInfo::texel(2, H::R16Unorm, C::Swap16, R::Default),
            Self::Y16X16 => FormatInfo::texel(4, H::Rg16Unorm, C::Swap16, R::Default),
            Self::R5G5B5A1 => FormatInfo::texel(2, H::B5G5R5A1Unorm, C::Swap16, R::Default),
            Self::Hilo8 => FormatInfo::texel(2, H::Rg8Unorm, C::Copy, R::Unimplemented),
            Self::HiloS8 => FormatInfo::texel(2, H::Rg8Snorm, C::Copy, R::Unimplemented),
            Self::W16Z16Y16X16Float => {
                FormatInfo::texel(8, H::Rgba16Float, C::Swap16, R::Default)
            }
            Self::W32Z32Y32X32Float => {
                FormatInfo::texel(16, H::Rgba32Float, C::Swap32, R::Default)
            }
            Self::X32Float => FormatInfo::texel(4, H::R32Float, C::Swap32, R::Default),
            Self::D1R5G5B5 => FormatInfo::texel(2, H::B5G5R5A1Unorm, C::Swap16, R::Default),
            Self::D8R8G8B8 => FormatInfo::texel(4, H::Rgba8Unorm, C::Copy, R::Drgb),
            Self::Y16X16Float => FormatInfo::texel(4, H::Rg16Float, C::Swap16, R::Default),
            Self::B8R8G8R8 => FormatInfo::block(2, 1, 4, H::G8R8G8B8Unorm, R::Unimplemented),
            Self::R8B8R8G8 => FormatInfo::block(2, 1, 4, H::R8G8B8G8Unorm, R::Unimplemented),
        }
    }
}

/// Formats as they exist on the host GPU after conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HostFormat {
    R8Unorm,
    B5G5R5A1Unorm,
    B4G4R4A4Unorm,
    B5G6R5Unorm,
    Rgba8Unorm,
    Bc1Unorm,
    Bc2Unorm,
    Bc3Unorm,
    Rg8Unorm,
    Rg8Snorm,
    R16Unorm,
    R16Float,
    Rg16Unorm,
    Rg16Float,
    R32Uint,
    R32Float,
    Rgba16Float,
    Rgba32Float,
    G8R8G8B8Unorm,
    R8G8B8G8Unorm,
}

impl HostFormat {
    /// Returns (block width, block height, bytes per block)
    #[must_use]
    pub fn block_size(self) -> (u32, u32, u32) {
        match self {
            Self::R8Unorm => (1, 1, 1),
            Self::B5G5R5A1Unorm
            | Self::B4G4R4A4Unorm
            | Self::B5G6R5Unorm
            | Self::Rg8Unorm
            | Self::Rg8Snorm
            | Self::R16Unorm
            | Self::R16Float => (1, 1, 2),
            Self::Rgba8Unorm
            | Self::Rg16Unorm
            | Self::Rg16Float
            | Self::R32Uint
            | Self::R32Float => (1, 1, 4),
            Self::Rgba16Float => (1, 1, 8),
            Self::Rgba32Float => (1, 1, 16),
            Self::Bc1Unorm => (4, 4, 8),
            Self::Bc2Unorm | Self::Bc3Unorm => (4, 4, 16),
            Self::G8R8G8B8Unorm | Self::R8G8B8G8Unorm => (2, 1, 4),
        }
    }

    #[must_use]
    pub fn is_block_compressed(self) -> bool {
        matches!(self, Self::Bc1Unorm | Self::Bc2Unorm | Self::Bc3Unorm)
    }
}

/// How guest texel bytes become host texel bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexelConversion {
    Copy,
    // Guest memory is big-endian
    Swap16,
    Swap32,
    R6G5B5ToRgba8,
}

/// Which channel remap rule applies to a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapKind {
    Replicate,
    Default,
    Argb,
    Drgb,
    Unimplemented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub block_width: u32,
    pub block_height: u32,
    /// Bytes per block in guest memory
    pub block_bytes: u32,
    pub host_format: HostFormat,
    pub conversion: TexelConversion,
    pub remap: RemapKind,
}

impl FormatInfo {
    const fn texel(
        bytes: u32,
        host_format: HostFormat,
        conversion: TexelConversion,
        remap: RemapKind,
    ) -> Self {
        Self { block_width: 1, block_height: 1, block_bytes: bytes, host_format, conversion, remap }
    }

    const fn block(
        width: u32,
        height: u32,
        bytes: u32,
        host_format: HostFormat,
        remap: RemapKind,
    ) -> Self {
        Self {
            block_width: width,
            block_height: height,
            block_bytes: bytes,
            host_format,
            conversion: TexelConversion::Copy,
            remap,
        }
    }

    #[must_use]
    pub fn is_block_format(&self) -> bool {
        self.block_width != 1 || self.block_height != 1
    }

    /// Number of blocks needed to cover a (width, height) image
    #[must_use]
    pub fn blocks(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.block_width), height.div_ceil(self.block_height))
    }

    /// Size of one mip level as it is packed in guest memory
    #[must_use]
    pub fn guest_level_size(&self, width: u32, height: u32) -> u64 {
        let (blocks_x, blocks_y) = self.blocks(width, height);
        u64::from(blocks_x) * u64::from(blocks_y) * u64::from(self.block_bytes)
    }

    /// Size of a whole tightly packed mip chain in guest memory
    #[must_use]
    pub fn guest_texture_size(&self, width: u32, height: u32, mip_levels: u32) -> u64 {
        (0..mip_levels)
            .map(|level| {
                self.guest_level_size(mip_dimension(width, level), mip_dimension(height, level))
            })
            .sum()
    }
}

#[must_use]
pub fn mip_dimension(size: u32, level: u32) -> u32 {
    size.checked_shr(level).unwrap_or(0).max(1)
}

/// Longest mip chain a (width, height) texture can have
#[must_use]
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    (u32::BITS - width.max(height).leading_zeros()).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ids_round_trip() {
        for format in GcmFormat::ALL {
            assert_eq!(GcmFormat::from_id(format.id()), Some(format));
            assert_eq!(format.id() & LAYOUT_BITS, 0, "{format:?}");
        }
    }

    #[test]
    fn unknown_ids() {
        for id in [0x00, 0x80, 0x89, 0x8A, 0x8C, 0x96, 0xA1, 0xFF] {
            assert_eq!(GcmFormat::from_id(id), None, "{id:02X}");
        }
    }

    #[test]
    fn uncompressed_texture_size() {
        let info = GcmFormat::A8R8G8B8.info();
        assert_eq!(info.guest_texture_size(64, 64, 1), 64 * 64 * 4);

        // 16x8 + 8x4 + 4x2 + 2x1 + 1x1
        let info = GcmFormat::R5G6B5.info();
        assert_eq!(info.guest_texture_size(16, 8, 5), 2 * (128 + 32 + 8 + 2 + 1));
    }

    #[test]
    fn huge_textures_do_not_overflow() {
        let info = GcmFormat::W32Z32Y32X32Float.info();
        assert_eq!(info.guest_texture_size(0xFFFF, 0xFFFF, 1), 0xFFFF * 0xFFFF * 16);
        assert!(info.guest_texture_size(0xFFFF, 0xFFFF, 16) > u64::from(u32::MAX));
    }

    #[test]
    fn mip_dimensions_past_the_chain() {
        assert_eq!(mip_dimension(16, 4), 1);
        assert_eq!(mip_dimension(16, 40), 1);
        assert_eq!(mip_dimension(u32::MAX, 32), 1);
        assert_eq!(max_mip_levels(16, 16), 5);
        assert_eq!(max_mip_levels(640, 480), 10);
        assert_eq!(max_mip_levels(0, 0), 1);
    }

    #[test]
    fn compressed_texture_size() {
        let info = GcmFormat::Dxt1.info();
        assert_eq!(info.guest_texture_size(64, 64, 1), 16 * 16 * 8);

        // Mips smaller than a block still occupy a whole block
        assert_eq!(info.guest_texture_size(8, 8, 4), 4 * 8 + 8 + 8 + 8);

        let info = GcmFormat::Dxt45.info();
        assert_eq!(info.guest_texture_size(6, 6, 1), 2 * 2 * 16);
    }

    #[test]
    fn host_block_sizes_match_guest_layout() {
        for format in GcmFormat::ALL {
            let info = format.info();
            let (block_width, block_height, bytes) = info.host_format.block_size();
            assert_eq!((block_width, block_height), (info.block_width, info.block_height));

            let expected_bytes = match info.conversion {
                TexelConversion::R6G5B5ToRgba8 => info.block_bytes * 2,
                _ => info.block_bytes,
            };
            assert_eq!(bytes, expected_bytes, "{format:?}");
        }
    }
}
