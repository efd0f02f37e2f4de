use crate::api::TextureResult;
use crate::descriptor::SamplerDesc;
use crate::format::HostFormat;
use crate::remap::ChannelMapping;
use std::fmt::Debug;

pub mod headless;
pub mod wgpuhardware;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    CopyDestination,
    ShaderRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureAllocation {
    pub format: HostFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

/// Location and shape of one mip level's data inside the staging buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedSubresource {
    pub offset: u64,
    pub format: HostFormat,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
    /// Rows of blocks, not texels
    pub rows: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderResourceViewDesc {
    pub format: HostFormat,
    pub mip_levels: u32,
    pub mapping: ChannelMapping,
}

pub trait GpuBackend {
    type Texture: Debug;
    type Buffer: Debug;
    type View: Debug;
    type Sampler: Debug;

    fn create_staging_buffer(&mut self, size: u64) -> TextureResult<Self::Buffer>;

    fn write_staging(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> TextureResult<()>;

    fn create_texture(
        &mut self,
        allocation: &TextureAllocation,
        initial_state: ResourceState,
    ) -> TextureResult<Self::Texture>;

    fn transition(&mut self, texture: &Self::Texture, before: ResourceState, after: ResourceState);

    fn copy_to_subresource(
        &mut self,
        source: &Self::Buffer,
        placement: &PlacedSubresource,
        texture: &Self::Texture,
        mip_level: u32,
    );

    fn create_shader_resource_view(
        &mut self,
        texture: &Self::Texture,
        desc: &ShaderResourceViewDesc,
    ) -> TextureResult<Self::View>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> TextureResult<Self::Sampler>;
}
