use std::ops::Range;
use thiserror::Error;

use crate::format::HostFormat;

pub const DEFAULT_STAGING_HEAP_SIZE: u64 = 256 * 1024 * 1024;
pub const DEFAULT_ROW_PITCH_ALIGNMENT: u32 = 256;
pub const DEFAULT_PLACEMENT_ALIGNMENT: u64 = 512;
pub const DEFAULT_SRV_HEAP_CAPACITY: u32 = 65536;
pub const DEFAULT_SAMPLER_HEAP_CAPACITY: u32 = 2048;
pub const DEFAULT_SAMPLER_HEAP_PAGES: u32 = 2;
pub const MAX_TEXTURE_UNITS: u32 = 16;

#[derive(Debug, Error)]
pub enum TextureError {
    #[error("Unrecognized texture format {format:02X} (raw format byte {raw:02X})")]
    UnrecognizedFormat { format: u8, raw: u8 },
    #[error("Texture data at {address:08X} (length {len}) is outside of guest memory")]
    GuestMemoryOutOfRange { address: u32, len: u64 },
    #[error("Host format {0:?} is not supported by this backend")]
    UnsupportedHostFormat(HostFormat),
    #[error(
        "Staging heap exhausted: requested {requested} bytes, heap size is {capacity} bytes with \
         {live:?} still in flight"
    )]
    StagingHeapExhausted { requested: u64, capacity: u64, live: Range<u64> },
    #[error("{heap} descriptor heap exhausted (capacity {capacity})")]
    DescriptorHeapExhausted { heap: &'static str, capacity: u32 },
    #[error("GPU backend error while creating {what}: {message}")]
    Backend { what: &'static str, message: String },
}

impl TextureError {
    /// Fatal errors indicate a capacity-planning bug or device-level failure; everything else only
    /// affects the texture unit that produced it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnrecognizedFormat { .. }
            | Self::GuestMemoryOutOfRange { .. }
            | Self::UnsupportedHostFormat(_) => false,
            Self::StagingHeapExhausted { .. }
            | Self::DescriptorHeapExhausted { .. }
            | Self::Backend { .. } => true,
        }
    }
}

pub type TextureResult<T> = Result<T, TextureError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TextureCacheConfig {
    pub staging_heap_size: u64,
    pub row_pitch_alignment: u32,
    pub placement_alignment: u64,
    pub srv_heap_capacity: u32,
    pub sampler_heap_capacity: u32,
    pub sampler_heap_pages: u32,
    pub max_texture_units: u32,
}

impl Default for TextureCacheConfig {
    fn default() -> Self {
        Self {
            staging_heap_size: DEFAULT_STAGING_HEAP_SIZE,
            row_pitch_alignment: DEFAULT_ROW_PITCH_ALIGNMENT,
            placement_alignment: DEFAULT_PLACEMENT_ALIGNMENT,
            srv_heap_capacity: DEFAULT_SRV_HEAP_CAPACITY,
            sampler_heap_capacity: DEFAULT_SAMPLER_HEAP_CAPACITY,
            sampler_heap_pages: DEFAULT_SAMPLER_HEAP_PAGES,
            max_texture_units: MAX_TEXTURE_UNITS,
        }
    }
}
