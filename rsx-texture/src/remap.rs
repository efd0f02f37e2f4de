use crate::format::{GcmFormat, RemapKind};
use proc_bitfield::bitfield;

bitfield! {
    /// Low byte of the texture control1 register: one 2-bit source selector per output channel
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct RemapSelector(pub u8): Debug, FromStorage, IntoStorage {
        pub a: u8 @ 0..=1,
        pub r: u8 @ 2..=3,
        pub g: u8 @ 4..=5,
        pub b: u8 @ 6..=7,
    }
}

impl RemapSelector {
    /// Value games write for an untouched ARGB texture
    pub const HARDWARE_DEFAULT: Self = Self(0xE4);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentSource {
    Memory0,
    Memory1,
    Memory2,
    Memory3,
    Zero,
    One,
}

impl ComponentSource {
    // Same numbering as D3D12_SHADER_COMPONENT_MAPPING
    fn encoding(self) -> u32 {
        match self {
            Self::Memory0 => 0,
            Self::Memory1 => 1,
            Self::Memory2 => 2,
            Self::Memory3 => 3,
            Self::Zero => 4,
            Self::One => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMapping {
    pub r: ComponentSource,
    pub g: ComponentSource,
    pub b: ComponentSource,
    pub a: ComponentSource,
}

impl ChannelMapping {
    pub const IDENTITY: Self = Self::new(
        ComponentSource::Memory0,
        ComponentSource::Memory1,
        ComponentSource::Memory2,
        ComponentSource::Memory3,
    );

    pub const ZERO: Self = Self::replicate(ComponentSource::Zero);

    #[must_use]
    pub const fn new(
        r: ComponentSource,
        g: ComponentSource,
        b: ComponentSource,
        a: ComponentSource,
    ) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub const fn replicate(source: ComponentSource) -> Self {
        Self::new(source, source, source, source)
    }

    /// Packs the mapping into 3 bits per channel plus an "always set" bit 12, matching the layout
    /// of D3D12 shader component mappings. Backends without native swizzle support pass this to
    /// the sampling shader.
    #[must_use]
    pub fn encode(self) -> u32 {
        self.r.encoding()
            | (self.g.encoding() << 3)
            | (self.b.encoding() << 6)
            | (self.a.encoding() << 9)
            | (1 << 12)
    }
}

/// Where the data bound to a texture unit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSource {
    /// Uploaded from guest memory; components are in native A,R,G,B storage order
    Uploaded,
    /// Aliased render target; components are already stored R,G,B,A
    RenderTarget,
}

const UPLOADED_ARGB_TABLE: [ComponentSource; 4] = [
    ComponentSource::Memory0,
    ComponentSource::Memory1,
    ComponentSource::Memory2,
    ComponentSource::Memory3,
];

const RENDER_TARGET_ARGB_TABLE: [ComponentSource; 4] = [
    ComponentSource::Memory3,
    ComponentSource::Memory0,
    ComponentSource::Memory1,
    ComponentSource::Memory2,
];

const DRGB_TABLE: [ComponentSource; 4] = [
    ComponentSource::Memory1,
    ComponentSource::Memory2,
    ComponentSource::Memory3,
    ComponentSource::One,
];

#[must_use]
pub fn channel_mapping(
    format: GcmFormat,
    remap: RemapSelector,
    source: TextureSource,
) -> ChannelMapping {
    match format.info().remap {
        RemapKind::Replicate => ChannelMapping::replicate(ComponentSource::Memory0),
        RemapKind::Default => ChannelMapping::IDENTITY,
        RemapKind::Argb => {
            let table = match source {
                TextureSource::Uploaded => &UPLOADED_ARGB_TABLE,
                TextureSource::RenderTarget => &RENDER_TARGET_ARGB_TABLE,
            };
            ChannelMapping::new(
                table[remap.r() as usize],
                table[remap.g() as usize],
                table[remap.b() as usize],
                table[remap.a() as usize],
            )
        }
        RemapKind::Drgb => {
            // The X8 channel occupies selector slot A, which shifts every output down by one
            ChannelMapping::new(
                DRGB_TABLE[remap.a() as usize],
                DRGB_TABLE[remap.r() as usize],
                DRGB_TABLE[remap.g() as usize],
                DRGB_TABLE[remap.b() as usize],
            )
        }
        RemapKind::Unimplemented => {
            log::error!("Unimplemented texture format {:02X} ({format:?})", format.id());
            ChannelMapping::IDENTITY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ComponentSource::{Memory0, Memory1, Memory2, Memory3, One};

    #[test]
    fn selector_fields() {
        let selector = RemapSelector(0b10_01_00_11);
        assert_eq!(selector.a(), 3);
        assert_eq!(selector.r(), 0);
        assert_eq!(selector.g(), 1);
        assert_eq!(selector.b(), 2);
    }

    #[test]
    fn argb_zero_selector_uploaded() {
        let mapping =
            channel_mapping(GcmFormat::A8R8G8B8, RemapSelector(0), TextureSource::Uploaded);
        assert_eq!(mapping, ChannelMapping::new(Memory0, Memory0, Memory0, Memory0));
    }

    #[test]
    fn argb_zero_selector_render_target() {
        let mapping =
            channel_mapping(GcmFormat::A8R8G8B8, RemapSelector(0), TextureSource::RenderTarget);
        assert_eq!(mapping, ChannelMapping::new(Memory3, Memory3, Memory3, Memory3));
    }

    #[test]
    fn argb_default_selector() {
        // Uploaded data is stored A,R,G,B so the default selector reads R from component 1
        let uploaded = channel_mapping(
            GcmFormat::A8R8G8B8,
            RemapSelector::HARDWARE_DEFAULT,
            TextureSource::Uploaded,
        );
        assert_eq!(uploaded, ChannelMapping::new(Memory1, Memory2, Memory3, Memory0));

        // Render targets are stored R,G,B,A so the same selector is the identity
        let render_target = channel_mapping(
            GcmFormat::A8R8G8B8,
            RemapSelector::HARDWARE_DEFAULT,
            TextureSource::RenderTarget,
        );
        assert_eq!(render_target, ChannelMapping::IDENTITY);
    }

    #[test]
    fn argb_identity_against_storage_order() {
        // a=3, r=0, g=1, b=2
        let selector = RemapSelector(0b10_01_00_11);
        let mapping = channel_mapping(GcmFormat::A8R8G8B8, selector, TextureSource::Uploaded);
        assert_eq!(mapping, ChannelMapping::IDENTITY);

        let mapping = channel_mapping(GcmFormat::A8R8G8B8, selector, TextureSource::RenderTarget);
        assert_eq!(mapping, ChannelMapping::new(Memory3, Memory0, Memory1, Memory2));
    }

    #[test]
    fn drgb_default_selector_forces_alpha() {
        for source in [TextureSource::Uploaded, TextureSource::RenderTarget] {
            let mapping =
                channel_mapping(GcmFormat::D8R8G8B8, RemapSelector::HARDWARE_DEFAULT, source);
            assert_eq!(mapping, ChannelMapping::new(Memory1, Memory2, Memory3, One));
        }
    }

    #[test]
    fn single_channel_replicates() {
        let mapping = channel_mapping(GcmFormat::B8, RemapSelector(0x1B), TextureSource::Uploaded);
        assert_eq!(mapping, ChannelMapping::replicate(Memory0));
    }

    #[test]
    fn fixed_order_formats_ignore_selector() {
        let formats =
            [GcmFormat::R5G6B5, GcmFormat::Dxt1, GcmFormat::Depth24D8, GcmFormat::X32Float];
        for format in formats {
            let selector = RemapSelector(rand::random());
            assert_eq!(
                channel_mapping(format, selector, TextureSource::Uploaded),
                ChannelMapping::IDENTITY
            );
        }
    }

    #[test]
    fn unimplemented_formats_fall_back_to_identity() {
        for format in [GcmFormat::Hilo8, GcmFormat::HiloS8, GcmFormat::B8R8G8R8] {
            let mapping =
                channel_mapping(format, RemapSelector::HARDWARE_DEFAULT, TextureSource::Uploaded);
            assert_eq!(mapping, ChannelMapping::IDENTITY);
        }
    }

    #[test]
    fn encoding() {
        assert_eq!(ChannelMapping::IDENTITY.encode(), 0x1688);
        assert_eq!(ChannelMapping::ZERO.encode(), 0x1924);
    }
}
