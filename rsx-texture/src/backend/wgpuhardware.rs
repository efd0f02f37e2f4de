//! wgpu implementation of [`GpuBackend`]
//!
//! wgpu has no component swizzle in texture views and no packed 16-bit color formats. Views carry
//! the encoded [`ChannelMapping`] for the sampling shader to apply, and packed 16-bit texels are
//! stored as `R16Uint` for the shader to unpack. Samplers are always created without a depth
//! comparison, since that needs a comparison binding in the pipeline layout; the decoded compare
//! function travels with the sampler for pipelines that want one.

use crate::api::{TextureError, TextureResult};
use crate::backend::{
    GpuBackend, PlacedSubresource, ResourceState, ShaderResourceViewDesc, TextureAllocation,
};
use crate::descriptor::{self, SamplerDesc};
use crate::format::HostFormat;
use crate::remap::ChannelMapping;
use std::rc::Rc;
use wgpu::{
    AddressMode, Buffer, BufferDescriptor, BufferUsages, CommandBuffer, CommandEncoder,
    CommandEncoderDescriptor, CompareFunction, Device, ErrorFilter, Extent3d, FilterMode,
    ImageCopyBuffer, ImageCopyTexture, ImageDataLayout, Origin3d, Queue, Sampler,
    SamplerBorderColor, SamplerDescriptor, Texture, TextureAspect, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
    TextureViewDimension,
};

#[must_use]
pub fn required_wgpu_features() -> wgpu::Features {
    wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER
        | wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
        | wgpu::Features::TEXTURE_COMPRESSION_BC
}

/// Returns `None` for formats wgpu cannot represent
#[must_use]
pub fn to_wgpu_format(format: HostFormat) -> Option<TextureFormat> {
    let format = match format {
        HostFormat::R8Unorm => TextureFormat::R8Unorm,
        // Packed 16-bit texels, unpacked in the shader
        HostFormat::B5G5R5A1Unorm | HostFormat::B4G4R4A4Unorm | HostFormat::B5G6R5Unorm => {
            TextureFormat::R16Uint
        }
        HostFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        HostFormat::Bc1Unorm => TextureFormat::Bc1RgbaUnorm,
        HostFormat::Bc2Unorm => TextureFormat::Bc2RgbaUnorm,
        HostFormat::Bc3Unorm => TextureFormat::Bc3RgbaUnorm,
        HostFormat::Rg8Unorm => TextureFormat::Rg8Unorm,
        HostFormat::Rg8Snorm => TextureFormat::Rg8Snorm,
        HostFormat::R16Unorm => TextureFormat::R16Unorm,
        HostFormat::R16Float => TextureFormat::R16Float,
        HostFormat::Rg16Unorm => TextureFormat::Rg16Unorm,
        HostFormat::Rg16Float => TextureFormat::Rg16Float,
        HostFormat::R32Uint => TextureFormat::R32Uint,
        HostFormat::R32Float => TextureFormat::R32Float,
        HostFormat::Rgba16Float => TextureFormat::Rgba16Float,
        HostFormat::Rgba32Float => TextureFormat::Rgba32Float,
        HostFormat::G8R8G8B8Unorm | HostFormat::R8G8B8G8Unorm => return None,
    };
    Some(format)
}

fn to_filter_mode(filter: descriptor::FilterMode) -> FilterMode {
    match filter {
        descriptor::FilterMode::Point => FilterMode::Nearest,
        descriptor::FilterMode::Linear => FilterMode::Linear,
    }
}

/// `Never` is the register reset value and means no comparison
fn to_compare_function(function: descriptor::CompareFunction) -> Option<CompareFunction> {
    let function = match function {
        descriptor::CompareFunction::Never => return None,
        descriptor::CompareFunction::Less => CompareFunction::Less,
        descriptor::CompareFunction::Equal => CompareFunction::Equal,
        descriptor::CompareFunction::LessEqual => CompareFunction::LessEqual,
        descriptor::CompareFunction::Greater => CompareFunction::Greater,
        descriptor::CompareFunction::NotEqual => CompareFunction::NotEqual,
        descriptor::CompareFunction::GreaterEqual => CompareFunction::GreaterEqual,
        descriptor::CompareFunction::Always => CompareFunction::Always,
    };
    Some(function)
}

fn to_address_mode(mode: descriptor::AddressMode) -> AddressMode {
    match mode {
        descriptor::AddressMode::Wrap => AddressMode::Repeat,
        // No mirror-once mode in wgpu
        descriptor::AddressMode::Mirror | descriptor::AddressMode::MirrorOnce => {
            AddressMode::MirrorRepeat
        }
        descriptor::AddressMode::Clamp => AddressMode::ClampToEdge,
        descriptor::AddressMode::Border => AddressMode::ClampToBorder,
    }
}

// wgpu only supports three fixed border colors
fn to_border_color([r, g, b, a]: [f32; 4]) -> SamplerBorderColor {
    if a < 0.5 {
        SamplerBorderColor::TransparentBlack
    } else if (r + g + b) / 3.0 < 0.5 {
        SamplerBorderColor::OpaqueBlack
    } else {
        SamplerBorderColor::OpaqueWhite
    }
}

/// Shader-visible view plus the channel mapping the sampling shader must apply
#[derive(Debug)]
pub struct WgpuShaderView {
    pub view: TextureView,
    pub format: HostFormat,
    pub mapping: ChannelMapping,
}

impl WgpuShaderView {
    #[must_use]
    pub fn channel_mapping_bits(&self) -> u32 {
        self.mapping.encode()
    }

    /// Whether texels are packed 16-bit values stored as `R16Uint`
    #[must_use]
    pub fn is_packed(&self) -> bool {
        matches!(
            self.format,
            HostFormat::B5G5R5A1Unorm | HostFormat::B4G4R4A4Unorm | HostFormat::B5G6R5Unorm
        )
    }
}

#[derive(Debug)]
pub struct WgpuSampler {
    pub sampler: Sampler,
    /// Depth comparison decoded from the texture unit; not applied to `sampler`
    pub compare: Option<CompareFunction>,
}

#[derive(Debug)]
pub struct WgpuBackend {
    device: Rc<Device>,
    queue: Rc<Queue>,
    encoder: Option<CommandEncoder>,
}

impl WgpuBackend {
    #[must_use]
    pub fn new(device: Rc<Device>, queue: Rc<Queue>) -> Self {
        log::info!("Creating wgpu texture backend");

        Self { device, queue, encoder: None }
    }

    fn encoder(&mut self) -> &mut CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device.create_command_encoder(&CommandEncoderDescriptor {
                label: "texture_upload_encoder".into(),
            })
        })
    }

    /// Takes the copies recorded since the last call. The caller submits the command buffer
    /// before any draw that samples the uploaded textures.
    pub fn finish(&mut self) -> Option<CommandBuffer> {
        self.encoder.take().map(CommandEncoder::finish)
    }

    fn check_errors<T>(&self, what: &'static str, value: T) -> TextureResult<T> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(TextureError::Backend { what, message: err.to_string() }),
            None => Ok(value),
        }
    }
}

impl GpuBackend for WgpuBackend {
    type Texture = Texture;
    type Buffer = Buffer;
    type View = WgpuShaderView;
    type Sampler = WgpuSampler;

    fn create_staging_buffer(&mut self, size: u64) -> TextureResult<Self::Buffer> {
        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: "texture_staging_buffer".into(),
            size,
            usage: BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.check_errors("staging buffer", buffer)
    }

    fn write_staging(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> TextureResult<()> {
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn create_texture(
        &mut self,
        allocation: &TextureAllocation,
        _initial_state: ResourceState,
    ) -> TextureResult<Self::Texture> {
        let format = to_wgpu_format(allocation.format)
            .ok_or(TextureError::UnsupportedHostFormat(allocation.format))?;

        // wgpu rejects mip chains longer than the texture can hold
        let max_mip_levels = 32 - allocation.width.max(allocation.height).leading_zeros();
        let mip_level_count = allocation.mip_levels.clamp(1, max_mip_levels);

        self.device.push_error_scope(ErrorFilter::Validation);
        let texture = self.device.create_texture(&TextureDescriptor {
            label: "rsx_texture".into(),
            size: Extent3d {
                width: allocation.width,
                height: allocation.height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage: TextureUsages::COPY_DST | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        self.check_errors("texture", texture)
    }

    fn transition(
        &mut self,
        _texture: &Self::Texture,
        before: ResourceState,
        after: ResourceState,
    ) {
        // wgpu tracks resource state itself
        log::trace!("Texture transition {before:?} -> {after:?}");
    }

    fn copy_to_subresource(
        &mut self,
        source: &Self::Buffer,
        placement: &PlacedSubresource,
        texture: &Self::Texture,
        mip_level: u32,
    ) {
        if mip_level >= texture.mip_level_count() {
            log::warn!(
                "Dropping copy to mip {mip_level}; texture only has {} levels",
                texture.mip_level_count()
            );
            return;
        }

        self.encoder().copy_buffer_to_texture(
            ImageCopyBuffer {
                buffer: source,
                layout: ImageDataLayout {
                    offset: placement.offset,
                    bytes_per_row: Some(placement.row_pitch),
                    rows_per_image: Some(placement.rows),
                },
            },
            ImageCopyTexture {
                texture,
                mip_level,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            Extent3d { width: placement.width, height: placement.height, depth_or_array_layers: 1 },
        );
    }

    fn create_shader_resource_view(
        &mut self,
        texture: &Self::Texture,
        desc: &ShaderResourceViewDesc,
    ) -> TextureResult<Self::View> {
        let view = texture.create_view(&TextureViewDescriptor {
            label: "rsx_texture_view".into(),
            dimension: Some(TextureViewDimension::D2),
            mip_level_count: Some(desc.mip_levels.min(texture.mip_level_count())),
            ..TextureViewDescriptor::default()
        });

        Ok(WgpuShaderView { view, format: desc.format, mapping: desc.mapping })
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> TextureResult<Self::Sampler> {
        let mag_filter = to_filter_mode(desc.mag_filter);
        let min_filter = to_filter_mode(desc.min_filter);
        let mipmap_filter = to_filter_mode(desc.mip_filter);

        // Anisotropic filtering requires every filter to be linear
        let all_linear = [mag_filter, min_filter, mipmap_filter]
            .into_iter()
            .all(|filter| filter == FilterMode::Linear);
        let anisotropy_clamp = if all_linear { u16::from(desc.max_anisotropy).max(1) } else { 1 };

        let uses_border = [desc.address_u, desc.address_v, desc.address_w]
            .contains(&descriptor::AddressMode::Border);

        let sampler = self.device.create_sampler(&SamplerDescriptor {
            label: "rsx_texture_sampler".into(),
            address_mode_u: to_address_mode(desc.address_u),
            address_mode_v: to_address_mode(desc.address_v),
            address_mode_w: to_address_mode(desc.address_w),
            mag_filter,
            min_filter,
            mipmap_filter,
            lod_min_clamp: desc.min_lod,
            lod_max_clamp: desc.max_lod.max(desc.min_lod),
            compare: None,
            anisotropy_clamp,
            border_color: uses_border.then(|| to_border_color(desc.border_color)),
        });

        Ok(WgpuSampler { sampler, compare: to_compare_function(desc.comparison) })
    }
}
