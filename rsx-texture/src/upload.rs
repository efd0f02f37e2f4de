//! Texel conversion and upload
//!
//! Guest mip chains are tightly packed, big-endian and (for uncompressed power-of-two textures)
//! Morton ordered. Each mip is converted into the staging heap with its rows padded to the row
//! pitch alignment and its start padded to the placement alignment, then copied into the texture.

use crate::api::TextureResult;
use crate::backend::{GpuBackend, PlacedSubresource, ResourceState, TextureAllocation};
use crate::descriptor::TextureDescriptor;
use crate::format::{mip_dimension, FormatInfo, TexelConversion};
use crate::staging::StagingHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipmapLevelInfo {
    /// Relative to the start of the texture's staging allocation
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
    /// Rows of blocks
    pub rows: u32,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn round_to_block(size: u32, block_size: u32) -> u32 {
    size.div_ceil(block_size) * block_size
}

/// Host allocation for a texture. Cubemaps and volume textures are allocated as their first 2D
/// face/slice.
#[must_use]
pub fn texture_allocation(desc: &TextureDescriptor) -> TextureAllocation {
    let info = desc.format.info();
    TextureAllocation {
        format: info.host_format,
        width: round_to_block(desc.width.into(), info.block_width),
        height: round_to_block(desc.height.into(), info.block_height),
        mip_levels: desc.mipmap.into(),
    }
}

#[must_use]
pub fn mipmap_layout(
    desc: &TextureDescriptor,
    row_pitch_alignment: u32,
    placement_alignment: u64,
) -> Vec<MipmapLevelInfo> {
    let info = desc.format.info();
    let (_, _, host_block_bytes) = info.host_format.block_size();

    let mut offset = 0;
    (0..u32::from(desc.mipmap))
        .map(|level| {
            let width = mip_dimension(desc.width.into(), level);
            let height = mip_dimension(desc.height.into(), level);
            let (blocks_x, blocks_y) = info.blocks(width, height);

            let row_pitch = round_to_block(blocks_x * host_block_bytes, row_pitch_alignment);
            let level_info = MipmapLevelInfo {
                offset,
                width: blocks_x * info.block_width,
                height: blocks_y * info.block_height,
                row_pitch,
                rows: blocks_y,
            };

            let level_size = u64::from(row_pitch) * u64::from(blocks_y);
            offset = align_up(offset + level_size, placement_alignment);

            level_info
        })
        .collect()
}

/// Staging bytes needed for a texture's whole mip chain
#[must_use]
pub fn placed_texture_storage_size(
    desc: &TextureDescriptor,
    row_pitch_alignment: u32,
    placement_alignment: u64,
) -> u64 {
    mipmap_layout(desc, row_pitch_alignment, placement_alignment)
        .last()
        .map_or(0, |last| {
            let last_size = u64::from(last.row_pitch) * u64::from(last.rows);
            align_up(last.offset + last_size, placement_alignment)
        })
}

/// Index of texel (x, y) in a Morton-ordered image. Bits of x and y interleave starting with x,
/// and once the smaller dimension runs out of bits the larger one continues alone.
#[must_use]
pub fn swizzled_index(x: u32, y: u32, log2_width: u32, log2_height: u32) -> u32 {
    let mut index = 0;
    let mut bit = 0;
    for i in 0..log2_width.max(log2_height) {
        if i < log2_width {
            index |= ((x >> i) & 1) << bit;
            bit += 1;
        }
        if i < log2_height {
            index |= ((y >> i) & 1) << bit;
            bit += 1;
        }
    }
    index
}

fn convert_block(conversion: TexelConversion, src: &[u8], dest: &mut [u8]) {
    match conversion {
        TexelConversion::Copy => dest.copy_from_slice(src),
        TexelConversion::Swap16 => {
            for (src, dest) in src.chunks_exact(2).zip(dest.chunks_exact_mut(2)) {
                dest.copy_from_slice(&[src[1], src[0]]);
            }
        }
        TexelConversion::Swap32 => {
            for (src, dest) in src.chunks_exact(4).zip(dest.chunks_exact_mut(4)) {
                dest.copy_from_slice(&[src[3], src[2], src[1], src[0]]);
            }
        }
        TexelConversion::R6G5B5ToRgba8 => {
            let texel = u16::from_be_bytes([src[0], src[1]]);
            let r = ((texel >> 10) & 0x3F) as u8;
            let g = ((texel >> 5) & 0x1F) as u8;
            let b = (texel & 0x1F) as u8;
            dest.copy_from_slice(&[
                (r << 2) | (r >> 4),
                (g << 3) | (g >> 2),
                (b << 3) | (b >> 2),
                0xFF,
            ]);
        }
    }
}

fn convert_level(
    info: &FormatInfo,
    swizzled: bool,
    width: u32,
    height: u32,
    src: &[u8],
    level: &MipmapLevelInfo,
    out: &mut [u8],
) {
    let (blocks_x, blocks_y) = info.blocks(width, height);
    let guest_bytes = info.block_bytes as usize;
    let (_, _, host_bytes) = info.host_format.block_size();
    let host_bytes = host_bytes as usize;

    // Only uncompressed power-of-two textures can be swizzled; anything else is read linearly
    let swizzled = swizzled
        && !info.is_block_format()
        && width.is_power_of_two()
        && height.is_power_of_two();
    let (log2_width, log2_height) = (width.trailing_zeros(), height.trailing_zeros());

    for y in 0..blocks_y {
        let row_start = level.offset as usize + (y * level.row_pitch) as usize;
        let dest_row = &mut out[row_start..row_start + blocks_x as usize * host_bytes];

        if !swizzled && info.conversion == TexelConversion::Copy {
            let src_start = (y * blocks_x) as usize * guest_bytes;
            dest_row.copy_from_slice(&src[src_start..src_start + dest_row.len()]);
            continue;
        }

        for (x, dest) in (0..blocks_x).zip(dest_row.chunks_exact_mut(host_bytes)) {
            let index = if swizzled {
                swizzled_index(x, y, log2_width, log2_height)
            } else {
                y * blocks_x + x
            };
            let src_start = index as usize * guest_bytes;
            convert_block(info.conversion, &src[src_start..src_start + guest_bytes], dest);
        }
    }
}

/// Converts a guest mip chain into `out` using the given staging layout. `guest` must hold at
/// least [`TextureDescriptor::guest_size`] bytes.
pub fn write_placed_texture(
    desc: &TextureDescriptor,
    guest: &[u8],
    layout: &[MipmapLevelInfo],
    out: &mut [u8],
) {
    let info = desc.format.info();

    let mut src_offset = 0;
    for (level, level_info) in (0..).zip(layout) {
        let width = mip_dimension(desc.width.into(), level);
        let height = mip_dimension(desc.height.into(), level);
        let level_size = info.guest_level_size(width, height) as usize;

        let src = &guest[src_offset..src_offset + level_size];
        convert_level(&info, desc.swizzled, width, height, src, level_info, out);

        src_offset += level_size;
    }
}

// Returns the staging offset of the texture's data and its per-mip layout
fn stage_texture<B: GpuBackend>(
    backend: &mut B,
    staging: &mut StagingHeap<B>,
    desc: &TextureDescriptor,
    guest: &[u8],
) -> TextureResult<(u64, Vec<MipmapLevelInfo>)> {
    let row_pitch_alignment = staging.row_pitch_alignment();
    let placement_alignment = staging.placement_alignment();
    let layout = mipmap_layout(desc, row_pitch_alignment, placement_alignment);
    let size = placed_texture_storage_size(desc, row_pitch_alignment, placement_alignment);

    let allocation = staging.alloc(size)?;

    let mut placed = vec![0; size as usize];
    write_placed_texture(desc, guest, &layout, &mut placed);
    staging.write(backend, &allocation, &placed)?;

    Ok((allocation.offset, layout))
}

fn copy_levels<B: GpuBackend>(
    backend: &mut B,
    staging: &StagingHeap<B>,
    texture: &B::Texture,
    desc: &TextureDescriptor,
    base_offset: u64,
    layout: &[MipmapLevelInfo],
) {
    let format = desc.format.info().host_format;
    for (mip_level, level) in (0..).zip(layout) {
        let placement = PlacedSubresource {
            offset: base_offset + level.offset,
            format,
            width: level.width,
            height: level.height,
            row_pitch: level.row_pitch,
            rows: level.rows,
        };

        log::trace!(
            "Copying mip {mip_level} ({}x{}) from staging offset {}",
            level.width,
            level.height,
            placement.offset
        );

        backend.copy_to_subresource(staging.buffer(), &placement, texture, mip_level);
    }
}

/// Creates a texture and fills it from guest memory. The texture is left in shader-read state.
///
/// # Errors
///
/// Propagates texture creation and staging errors.
pub fn upload_new_texture<B: GpuBackend>(
    backend: &mut B,
    staging: &mut StagingHeap<B>,
    desc: &TextureDescriptor,
    guest: &[u8],
) -> TextureResult<B::Texture> {
    let texture =
        backend.create_texture(&texture_allocation(desc), ResourceState::CopyDestination)?;

    let (base_offset, layout) = stage_texture(backend, staging, desc, guest)?;
    copy_levels(backend, staging, &texture, desc, base_offset, &layout);

    backend.transition(&texture, ResourceState::CopyDestination, ResourceState::ShaderRead);

    Ok(texture)
}

/// Re-uploads every mip of an existing texture in place. The texture must be in shader-read state
/// and is returned to it.
///
/// # Errors
///
/// Propagates staging errors.
pub fn update_existing_texture<B: GpuBackend>(
    backend: &mut B,
    staging: &mut StagingHeap<B>,
    desc: &TextureDescriptor,
    guest: &[u8],
    texture: &B::Texture,
) -> TextureResult<()> {
    let (base_offset, layout) = stage_texture(backend, staging, desc, guest)?;

    backend.transition(texture, ResourceState::ShaderRead, ResourceState::CopyDestination);
    copy_levels(backend, staging, texture, desc, base_offset, &layout);
    backend.transition(texture, ResourceState::CopyDestination, ResourceState::ShaderRead);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, RecordedCommand};
    use crate::descriptor::{SamplerDesc, TextureLocation};
    use crate::format::GcmFormat;
    use crate::remap::RemapSelector;

    fn descriptor(format: GcmFormat, width: u16, height: u16, mipmap: u16) -> TextureDescriptor {
        TextureDescriptor {
            format,
            swizzled: false,
            unnormalized: false,
            width,
            height,
            mipmap,
            location: TextureLocation::Main,
            offset: 0,
            address: 0,
            dimension: 2,
            cubemap: false,
            remap: RemapSelector::HARDWARE_DEFAULT,
            sampler: SamplerDesc::POINT_WRAP,
        }
    }

    fn level(offset: u64, width: u32, height: u32, row_pitch: u32, rows: u32) -> MipmapLevelInfo {
        MipmapLevelInfo { offset, width, height, row_pitch, rows }
    }

    #[test]
    fn single_mip_layout() {
        let desc = descriptor(GcmFormat::B8, 64, 64, 1);
        assert_eq!(mipmap_layout(&desc, 256, 512), vec![level(0, 64, 64, 256, 64)]);
        assert_eq!(placed_texture_storage_size(&desc, 256, 512), 64 * 256);
    }

    #[test]
    fn mip_chain_layout() {
        let desc = descriptor(GcmFormat::A8R8G8B8, 16, 8, 3);
        assert_eq!(
            mipmap_layout(&desc, 256, 512),
            vec![level(0, 16, 8, 256, 8), level(2048, 8, 4, 256, 4), level(3072, 4, 2, 256, 2)]
        );
        assert_eq!(placed_texture_storage_size(&desc, 256, 512), 3584);
    }

    #[test]
    fn mip_offsets_use_placement_alignment() {
        let desc = descriptor(GcmFormat::B8, 4, 1, 2);
        assert_eq!(
            mipmap_layout(&desc, 256, 512),
            vec![level(0, 4, 1, 256, 1), level(512, 2, 1, 256, 1)]
        );
        assert_eq!(placed_texture_storage_size(&desc, 256, 512), 1024);
    }

    #[test]
    fn compressed_layout() {
        let desc = descriptor(GcmFormat::Dxt1, 8, 8, 3);
        assert_eq!(
            mipmap_layout(&desc, 256, 512),
            vec![level(0, 8, 8, 256, 2), level(512, 4, 4, 256, 1), level(1024, 4, 4, 256, 1)]
        );

        let allocation = texture_allocation(&descriptor(GcmFormat::Dxt45, 6, 10, 1));
        assert_eq!((allocation.width, allocation.height), (8, 12));
    }

    #[test]
    fn swizzle_order() {
        assert_eq!(swizzled_index(1, 0, 2, 2), 1);
        assert_eq!(swizzled_index(0, 1, 2, 2), 2);
        assert_eq!(swizzled_index(1, 1, 2, 2), 3);
        assert_eq!(swizzled_index(2, 0, 2, 2), 4);
        assert_eq!(swizzled_index(3, 3, 2, 2), 15);

        // 8x2: after the first y bit the remaining x bits continue alone
        assert_eq!(swizzled_index(4, 1, 3, 1), 10);
        assert_eq!(swizzled_index(7, 0, 3, 1), 13);
    }

    #[test]
    fn unswizzles_power_of_two_textures() {
        let mut desc = descriptor(GcmFormat::B8, 4, 4, 1);
        desc.swizzled = true;
        let guest: Vec<u8> = (0..16).collect();

        let layout = mipmap_layout(&desc, 256, 512);
        let mut out = vec![0; 1024];
        write_placed_texture(&desc, &guest, &layout, &mut out);

        for y in 0..4 {
            for x in 0..4 {
                let texel = out[(y * 256 + x) as usize];
                assert_eq!(u32::from(texel), swizzled_index(x, y, 2, 2), "({x}, {y})");
            }
        }
    }

    #[test]
    fn non_power_of_two_is_read_linearly() {
        let mut desc = descriptor(GcmFormat::B8, 3, 2, 1);
        desc.swizzled = true;
        let guest = [1, 2, 3, 4, 5, 6];

        let layout = mipmap_layout(&desc, 256, 512);
        let mut out = vec![0; 512];
        write_placed_texture(&desc, &guest, &layout, &mut out);

        assert_eq!(&out[0..3], &[1, 2, 3]);
        assert_eq!(&out[256..259], &[4, 5, 6]);
    }

    #[test]
    fn byte_order_conversions() {
        let mut out = [0; 4];
        convert_block(TexelConversion::Swap16, &[0x12, 0x34, 0x56, 0x78], &mut out);
        assert_eq!(out, [0x34, 0x12, 0x78, 0x56]);

        convert_block(TexelConversion::Swap32, &[0x12, 0x34, 0x56, 0x78], &mut out);
        assert_eq!(out, [0x78, 0x56, 0x34, 0x12]);

        convert_block(TexelConversion::R6G5B5ToRgba8, &[0xFF, 0xFF], &mut out);
        assert_eq!(out, [0xFF; 4]);

        convert_block(TexelConversion::R6G5B5ToRgba8, &0x0421_u16.to_be_bytes(), &mut out);
        assert_eq!(out, [4, 8, 8, 0xFF]);
    }

    #[test]
    fn random_linear_copy_matches_guest_rows() {
        let desc = descriptor(GcmFormat::A8R8G8B8, 24, 5, 1);
        let guest: Vec<u8> = (0..desc.guest_size()).map(|_| rand::random()).collect();

        let layout = mipmap_layout(&desc, 256, 512);
        let mut out = vec![0; placed_texture_storage_size(&desc, 256, 512) as usize];
        write_placed_texture(&desc, &guest, &layout, &mut out);

        for (guest_row, placed_row) in guest.chunks_exact(96).zip(out.chunks_exact(256)) {
            assert_eq!(guest_row, &placed_row[..96]);
        }
    }

    #[test]
    fn new_texture_commands() {
        let mut backend = HeadlessBackend::new();
        let mut staging = StagingHeap::new(&mut backend, 1 << 20, 256, 512).unwrap();

        let desc = descriptor(GcmFormat::X16, 2, 2, 2);
        let guest = [0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0xAB, 0xCD];
        let texture = upload_new_texture(&mut backend, &mut staging, &desc, &guest).unwrap();

        assert_eq!(texture.state(), ResourceState::ShaderRead);
        assert_eq!(&*texture.mip_data(0), &[0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00]);
        assert_eq!(&*texture.mip_data(1), &[0xCD, 0xAB]);

        let commands = backend.take_commands();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], RecordedCommand::CopyRegion { mip_level: 0, .. }));
        assert!(matches!(commands[1], RecordedCommand::CopyRegion { mip_level: 1, .. }));
        assert_eq!(
            commands[2],
            RecordedCommand::Transition {
                texture_id: texture.id(),
                before: ResourceState::CopyDestination,
                after: ResourceState::ShaderRead,
            }
        );
    }

    #[test]
    fn partial_update_round_trips_state() {
        let mut backend = HeadlessBackend::new();
        let mut staging = StagingHeap::new(&mut backend, 1 << 20, 256, 512).unwrap();

        let desc = descriptor(GcmFormat::B8, 4, 4, 1);
        let texture = upload_new_texture(&mut backend, &mut staging, &desc, &[0; 16]).unwrap();
        backend.take_commands();

        update_existing_texture(&mut backend, &mut staging, &desc, &[7; 16], &texture).unwrap();

        let commands = backend.take_commands();
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            commands[0],
            RecordedCommand::Transition { after: ResourceState::CopyDestination, .. }
        ));
        assert!(matches!(commands[1], RecordedCommand::CopyRegion { .. }));
        assert!(matches!(
            commands[2],
            RecordedCommand::Transition { after: ResourceState::ShaderRead, .. }
        ));
        assert_eq!(&*texture.mip_data(0), &[7; 16]);
        assert_eq!(backend.textures_created(), 1);
    }
}
