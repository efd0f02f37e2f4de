use rsx_texture::TextureCacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum ReplayBackend {
    #[default]
    Headless,
    Wgpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WgpuBackend {
    #[default]
    Auto,
    Vulkan,
    DirectX12,
    Metal,
}

impl WgpuBackend {
    #[must_use]
    pub fn to_wgpu(self) -> wgpu::Backends {
        match self {
            Self::Auto => wgpu::Backends::VULKAN | wgpu::Backends::DX12 | wgpu::Backends::METAL,
            Self::Vulkan => wgpu::Backends::VULKAN,
            Self::DirectX12 => wgpu::Backends::DX12,
            Self::Metal => wgpu::Backends::METAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub backend: ReplayBackend,
    #[serde(default)]
    pub wgpu_backend: WgpuBackend,
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default)]
    pub texture_cache: TextureCacheConfig,
}

fn default_frames() -> u32 {
    60
}

fn default_frames_in_flight() -> usize {
    2
}

impl Default for ReplayConfig {
    fn default() -> Self {
        toml::from_str("").unwrap()
    }
}

/// Reads the config file, falling back to defaults if it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_config<P: AsRef<Path>>(path: P) -> anyhow::Result<ReplayConfig> {
    let path = path.as_ref();
    if !path.exists() {
        log::info!("Config file '{}' not found, using default config", path.display());
        return Ok(ReplayConfig::default());
    }

    let config_str = fs::read_to_string(path)?;
    let config: ReplayConfig = toml::from_str(&config_str)?;

    log::debug!("Loaded config from '{}': {config:?}", path.display());

    Ok(config)
}
