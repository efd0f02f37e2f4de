use crate::api::{TextureError, TextureResult};
use crate::format::{
    max_mip_levels, GcmFormat, LAYOUT_BITS, LINEAR_FORMAT_BIT, UNNORMALIZED_FORMAT_BIT,
};
use crate::remap::RemapSelector;
use bytemuck::{Pod, Zeroable};
use proc_bitfield::bitfield;

pub const LOCAL_MEMORY_BASE: u32 = 0xC000_0000;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatRegister(pub u32): Debug, FromStorage, IntoStorage {
        pub location: u8 @ 0..=1,
        pub cubemap: bool @ 2,
        pub border_type: bool @ 3,
        pub dimension: u8 @ 4..=7,
        pub format: u8 @ 8..=15,
        pub mipmap: u16 @ 16..=31,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct AddressRegister(pub u32): Debug, FromStorage, IntoStorage {
        pub wrap_s: u8 @ 0..=3,
        pub aniso_bias: u8 @ 4..=7,
        pub wrap_t: u8 @ 8..=11,
        pub unsigned_remap: u8 @ 12..=15,
        pub wrap_r: u8 @ 16..=19,
        pub gamma: u8 @ 20..=23,
        pub signed_remap: u8 @ 24..=27,
        pub zfunc: u8 @ 28..=31,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct Control0Register(pub u32): Debug, FromStorage, IntoStorage {
        pub alpha_kill: u8 @ 2..=3,
        pub max_aniso: u8 @ 4..=6,
        pub max_lod: u16 @ 7..=18,
        pub min_lod: u16 @ 19..=30,
        pub enabled: bool @ 31,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct FilterRegister(pub u32): Debug, FromStorage, IntoStorage {
        pub bias: u16 @ 0..=12,
        pub convolution: u8 @ 13..=15,
        pub min_filter: u8 @ 16..=18,
        pub mag_filter: u8 @ 24..=26,
        pub a_signed: bool @ 28,
        pub r_signed: bool @ 29,
        pub g_signed: bool @ 30,
        pub b_signed: bool @ 31,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageRectRegister(pub u32): Debug, FromStorage, IntoStorage {
        pub height: u16 @ 0..=15,
        pub width: u16 @ 16..=31,
    }
}

/// Raw register block for one texture unit, in hardware order. A whole register file can be
/// viewed as `&[TextureUnitRegisters]` with `bytemuck::cast_slice`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct TextureUnitRegisters {
    pub offset: u32,
    pub format: u32,
    pub address: u32,
    pub control0: u32,
    pub control1: u32,
    pub filter: u32,
    pub image_rect: u32,
    pub border_color: u32,
}

impl TextureUnitRegisters {
    #[must_use]
    pub fn enabled(&self) -> bool {
        TextureLocation::from_bits(FormatRegister(self.format).location()).is_some()
            && Control0Register(self.control0).enabled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureLocation {
    Local,
    Main,
}

impl TextureLocation {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits & 3 {
            1 => Some(Self::Local),
            2 => Some(Self::Main),
            _ => None,
        }
    }

    #[must_use]
    pub fn guest_address(self, offset: u32) -> u32 {
        match self {
            Self::Local => LOCAL_MEMORY_BASE.wrapping_add(offset),
            // IO-mapped main memory is treated as identity mapped
            Self::Main => offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Point,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
    MirrorOnce,
}

impl AddressMode {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Wrap,
            2 => Self::Mirror,
            3 | 5 => Self::Clamp,
            4 => Self::Border,
            6..=8 => Self::MirrorOnce,
            _ => {
                log::warn!("Unknown texture wrap mode {bits}, using wrap");
                Self::Wrap
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareFunction {
    #[default]
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    const TABLE: [Self; 8] = [
        Self::Never,
        Self::Less,
        Self::Equal,
        Self::LessEqual,
        Self::Greater,
        Self::NotEqual,
        Self::GreaterEqual,
        Self::Always,
    ];

    #[must_use]
    pub fn from_zfunc(zfunc: u8) -> Self {
        Self::TABLE[(zfunc & 7) as usize]
    }
}

const MAX_ANISOTROPY_TABLE: [u8; 8] = [1, 2, 4, 6, 8, 10, 12, 16];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub comparison: CompareFunction,
    pub max_anisotropy: u8,
    pub lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: [f32; 4],
}

impl SamplerDesc {
    /// Sampler bound to texture slots the draw does not use
    pub const POINT_WRAP: Self = Self {
        min_filter: FilterMode::Point,
        mag_filter: FilterMode::Point,
        mip_filter: FilterMode::Point,
        address_u: AddressMode::Wrap,
        address_v: AddressMode::Wrap,
        address_w: AddressMode::Wrap,
        comparison: CompareFunction::Never,
        max_anisotropy: 1,
        lod_bias: 0.0,
        min_lod: 0.0,
        max_lod: 0.0,
        border_color: [0.0; 4],
    };

    fn decode(registers: &TextureUnitRegisters) -> Self {
        let address = AddressRegister(registers.address);
        let control0 = Control0Register(registers.control0);
        let filter = FilterRegister(registers.filter);

        let (min_filter, mip_filter) = decode_min_filter(filter.min_filter());
        let mag_filter = decode_mag_filter(filter.mag_filter());

        Self {
            min_filter,
            mag_filter,
            mip_filter,
            address_u: AddressMode::from_bits(address.wrap_s()),
            address_v: AddressMode::from_bits(address.wrap_t()),
            address_w: AddressMode::from_bits(address.wrap_r()),
            comparison: CompareFunction::from_zfunc(address.zfunc()),
            max_anisotropy: MAX_ANISOTROPY_TABLE[control0.max_aniso() as usize],
            lod_bias: decode_lod_bias(filter.bias()),
            // LOD clamps are 4.8 fixed point; only the integer part is used
            min_lod: f32::from(control0.min_lod() >> 8),
            max_lod: f32::from(control0.max_lod() >> 8),
            border_color: decode_border_color(registers.border_color),
        }
    }
}

// Returns (min filter, mip filter)
fn decode_min_filter(bits: u8) -> (FilterMode, FilterMode) {
    use FilterMode::{Linear, Point};

    match bits {
        1 | 3 => (Point, Point),
        2 | 4 => (Linear, Point),
        5 => (Point, Linear),
        6 | 7 => (Linear, Linear),
        _ => {
            log::warn!("Unknown texture min filter {bits}, using linear");
            (Linear, Linear)
        }
    }
}

fn decode_mag_filter(bits: u8) -> FilterMode {
    match bits {
        1 => FilterMode::Point,
        2 | 4 => FilterMode::Linear,
        _ => {
            log::warn!("Unknown texture mag filter {bits}, using linear");
            FilterMode::Linear
        }
    }
}

// Signed 13-bit fixed point with 8 fractional bits
fn decode_lod_bias(bits: u16) -> f32 {
    let signed = ((bits << 3) as i16) >> 3;
    f32::from(signed) / 256.0
}

// ARGB8 to normalized RGBA
fn decode_border_color(argb: u32) -> [f32; 4] {
    let [a, r, g, b] = argb.to_be_bytes();
    [r, g, b, a].map(|component| f32::from(component) / 255.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDescriptor {
    pub format: GcmFormat,
    pub swizzled: bool,
    pub unnormalized: bool,
    pub width: u16,
    pub height: u16,
    pub mipmap: u16,
    pub location: TextureLocation,
    pub offset: u32,
    pub address: u32,
    pub dimension: u8,
    pub cubemap: bool,
    pub remap: RemapSelector,
    pub sampler: SamplerDesc,
}

impl TextureDescriptor {
    /// Number of bytes the texture's full mip chain occupies in guest memory
    #[must_use]
    pub fn guest_size(&self) -> u64 {
        self.format.info().guest_texture_size(
            self.width.into(),
            self.height.into(),
            self.mipmap.into(),
        )
    }
}

/// Decodes a texture unit's registers. The unit's enable bit is not checked here; see
/// [`TextureUnitRegisters::enabled`].
///
/// # Errors
///
/// Returns [`TextureError::UnrecognizedFormat`] if the format byte does not name a known format
/// once the layout bits are removed.
pub fn decode(registers: &TextureUnitRegisters) -> TextureResult<TextureDescriptor> {
    let format_register = FormatRegister(registers.format);
    let raw_format = format_register.format();
    let format_id = raw_format & !LAYOUT_BITS;
    let format = GcmFormat::from_id(format_id)
        .ok_or(TextureError::UnrecognizedFormat { format: format_id, raw: raw_format })?;

    // Disabled units can carry any location value; default to local so decoding stays total
    let location = TextureLocation::from_bits(format_register.location())
        .unwrap_or(TextureLocation::Local);

    let image_rect = ImageRectRegister(registers.image_rect);
    let (width, height) = (image_rect.width(), image_rect.height());

    let max_mipmap = max_mip_levels(width.into(), height.into()) as u16;
    let mipmap = format_register.mipmap().max(1);
    if mipmap > max_mipmap {
        log::warn!(
            "{width}x{height} texture requests {mipmap} mip levels, clamping to {max_mipmap}"
        );
    }

    Ok(TextureDescriptor {
        format,
        swizzled: raw_format & LINEAR_FORMAT_BIT == 0,
        unnormalized: raw_format & UNNORMALIZED_FORMAT_BIT != 0,
        width,
        height,
        mipmap: mipmap.min(max_mipmap),
        location,
        offset: registers.offset,
        address: location.guest_address(registers.offset),
        dimension: format_register.dimension(),
        cubemap: format_register.cubemap(),
        remap: RemapSelector(registers.control1 as u8),
        sampler: SamplerDesc::decode(registers),
    })
}
