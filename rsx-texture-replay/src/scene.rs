//! TOML scene description: guest memory, per-draw texture units, scheduled guest writes and
//! render target aliases

use anyhow::Context;
use rsx_texture::descriptor::{
    AddressRegister, Control0Register, FilterRegister, FormatRegister, ImageRectRegister,
    TextureLocation,
};
use rsx_texture::format::LINEAR_FORMAT_BIT;
use rsx_texture::remap::RemapSelector;
use rsx_texture::TextureUnitRegisters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SceneLocation {
    Local,
    #[default]
    Main,
}

impl SceneLocation {
    fn register_bits(self) -> u8 {
        match self {
            Self::Local => 1,
            Self::Main => 2,
        }
    }

    #[must_use]
    pub fn to_location(self) -> TextureLocation {
        match self {
            Self::Local => TextureLocation::Local,
            Self::Main => TextureLocation::Main,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneTexture {
    /// GCM format id without layout bits
    pub format: u8,
    pub width: u16,
    pub height: u16,
    #[serde(default = "default_mip_levels")]
    pub mip_levels: u16,
    pub offset: u32,
    #[serde(default)]
    pub location: SceneLocation,
    #[serde(default)]
    pub swizzled: bool,
    #[serde(default = "default_remap")]
    pub remap: u8,
    #[serde(default = "true_fn")]
    pub enabled: bool,
}

fn default_mip_levels() -> u16 {
    1
}

fn default_remap() -> u8 {
    RemapSelector::HARDWARE_DEFAULT.0
}

fn true_fn() -> bool {
    true
}

impl SceneTexture {
    #[must_use]
    pub fn to_registers(&self) -> TextureUnitRegisters {
        let layout = if self.swizzled { 0 } else { LINEAR_FORMAT_BIT };

        let format = FormatRegister(0)
            .with_location(self.location.register_bits())
            .with_dimension(2)
            .with_format(self.format | layout)
            .with_mipmap(self.mip_levels);
        let address = AddressRegister(0).with_wrap_s(1).with_wrap_t(1).with_wrap_r(1);
        let control0 = Control0Register(0).with_max_aniso(0).with_enabled(self.enabled);
        let filter = FilterRegister(0).with_min_filter(6).with_mag_filter(2);
        let image_rect = ImageRectRegister(0).with_width(self.width).with_height(self.height);

        TextureUnitRegisters {
            offset: self.offset,
            format: format.0,
            address: address.0,
            control0: control0.0,
            control1: self.remap.into(),
            filter: filter.0,
            image_rect: image_rect.0,
            border_color: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDraw {
    #[serde(default)]
    pub units: Vec<SceneTexture>,
    /// Texture slots the draw's shader declares; unfilled slots get dummy descriptors
    #[serde(default)]
    pub texture_count: u32,
}

impl SceneDraw {
    #[must_use]
    pub fn registers(&self) -> Vec<TextureUnitRegisters> {
        self.units.iter().map(SceneTexture::to_registers).collect()
    }

    #[must_use]
    pub fn srv_slots(&self) -> u32 {
        (self.units.len() as u32).max(self.texture_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledWrite {
    pub frame: u32,
    pub address: u32,
    pub len: u32,
    #[serde(default)]
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRenderTarget {
    pub offset: u32,
    #[serde(default)]
    pub location: SceneLocation,
    pub width: u32,
    pub height: u32,
}

impl SceneRenderTarget {
    #[must_use]
    pub fn address(&self) -> u32 {
        self.location.to_location().guest_address(self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub memory_base: u32,
    #[serde(default = "default_memory_size")]
    pub memory_size: u32,
    #[serde(default)]
    pub draws: Vec<SceneDraw>,
    #[serde(default)]
    pub writes: Vec<ScheduledWrite>,
    #[serde(default)]
    pub render_targets: Vec<SceneRenderTarget>,
}

fn default_memory_size() -> u32 {
    16 * 1024 * 1024
}

impl Scene {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid scene.
    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let scene_str = fs::read_to_string(path)
            .with_context(|| format!("Error reading scene from '{}'", path.display()))?;
        let scene: Scene = toml::from_str(&scene_str)
            .with_context(|| format!("Error parsing scene '{}'", path.display()))?;

        Ok(scene)
    }

    pub fn writes_for_frame(&self, frame: u32) -> impl Iterator<Item = &ScheduledWrite> {
        self.writes.iter().filter(move |write| write.frame == frame)
    }
}
