//! Per-draw texture binding
//!
//! [`TextureBinder::upload_and_bind_textures`] is called once per draw. It walks the enabled
//! texture units, resolves each one to a GPU texture (render target alias, cache hit, in-place
//! update or fresh upload), and writes one view and one sampler per unit into the frame's
//! descriptor heaps. Slots the shader declares but no unit fills get dummy descriptors.


use crate::api::{TextureCacheConfig, TextureError, TextureResult};
use crate::backend::{GpuBackend, ResourceState, ShaderResourceViewDesc, TextureAllocation};
use crate::cache::{TextureCache, TextureSignature, Validation};
use crate::descriptor::{self, SamplerDesc, TextureDescriptor, TextureUnitRegisters};
use crate::format::HostFormat;
use crate::heap::{FrameResources, SamplerSlot};
use crate::memory::{GuestMemory, MemoryWatch};
use crate::remap::{self, ChannelMapping, TextureSource};
use crate::staging::StagingHeap;
use crate::upload;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

/// Render targets that textures can alias, keyed by guest address
pub trait RenderTargetPool<T> {
    fn render_target(&self, address: u32) -> Option<Rc<T>>;
}

impl<T> RenderTargetPool<T> for HashMap<u32, Rc<T>> {
    fn render_target(&self, address: u32) -> Option<Rc<T>> {
        self.get(&address).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadStats {
    pub cache_hits: u64,
    pub new_uploads: u64,
    pub partial_updates: u64,
    pub evictions: u64,
    pub render_target_hits: u64,
    pub skipped_units: u64,
    pub dummy_slots: u64,
}

/// Where a draw's descriptors were written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBindings {
    pub srv_base: u32,
    pub sampler_page: u32,
    pub sampler_base: u32,
    /// Slots written, including dummy slots
    pub texture_count: u32,
    /// Slots backed by a real texture
    pub bound_units: u32,
}

struct ResolvedTexture<T> {
    texture: Rc<T>,
    source: TextureSource,
    mip_levels: u32,
}

pub struct TextureBinder<B: GpuBackend> {
    config: TextureCacheConfig,
    cache: TextureCache<B::Texture>,
    staging: StagingHeap<B>,
    dummy_texture: B::Texture,
    stats: UploadStats,
}

impl<B: GpuBackend> Debug for TextureBinder<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureBinder")
            .field("config", &self.config)
            .field("resident_textures", &self.cache.len())
            .field("staging", &self.staging)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<B: GpuBackend> TextureBinder<B> {
    /// # Errors
    ///
    /// Propagates backend errors from creating the staging heap or the dummy texture.
    pub fn new(backend: &mut B, config: TextureCacheConfig) -> TextureResult<Self> {
        let staging = StagingHeap::new(
            backend,
            config.staging_heap_size,
            config.row_pitch_alignment,
            config.placement_alignment,
        )?;

        // Never written; its view forces every channel to zero
        let dummy_allocation = TextureAllocation {
            format: HostFormat::Rgba8Unorm,
            width: 1,
            height: 1,
            mip_levels: 1,
        };
        let dummy_texture = backend.create_texture(&dummy_allocation, ResourceState::ShaderRead)?;

        Ok(Self {
            config,
            cache: TextureCache::new(),
            staging,
            dummy_texture,
            stats: UploadStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &TextureCacheConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &TextureCache<B::Texture> {
        &self.cache
    }

    #[must_use]
    pub fn staging(&self) -> &StagingHeap<B> {
        &self.staging
    }

    #[must_use]
    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    pub fn take_stats(&mut self) -> UploadStats {
        std::mem::take(&mut self.stats)
    }

    #[must_use]
    pub fn new_frame_resources(&self) -> FrameResources<B> {
        FrameResources::new(&self.config)
    }

    /// Applies pending guest write events to the cache. Returns the number of textures newly
    /// marked dirty. [`Self::upload_and_bind_textures`] does this itself before any lookup.
    pub fn invalidate(&mut self, watch: &mut impl MemoryWatch) -> usize {
        self.cache.apply_dirty_events(watch)
    }

    /// Resolves every enabled texture unit and writes its view and sampler descriptors.
    ///
    /// Views are written starting at `srv_base` and samplers at the returned sampler slot. Units
    /// that fail with a non-fatal error are logged and skipped; the remaining units are compacted
    /// so slot N always holds the Nth bound unit. Slots up to `texture_count` that no unit filled
    /// receive dummy descriptors.
    ///
    /// # Errors
    ///
    /// Returns fatal errors (staging or descriptor heap exhaustion, backend failures).
    #[allow(clippy::too_many_arguments)]
    pub fn upload_and_bind_textures<M: GuestMemory + MemoryWatch>(
        &mut self,
        backend: &mut B,
        frame: &mut FrameResources<B>,
        units: &[TextureUnitRegisters],
        render_targets: &impl RenderTargetPool<B::Texture>,
        memory: &mut M,
        srv_base: u32,
        texture_count: u32,
    ) -> TextureResult<TextureBindings> {
        let sampler_base = frame.begin_sampler_range(texture_count)?;

        self.cache.apply_dirty_events(memory);

        let mut bound_units = 0;
        let max_units = self.config.max_texture_units as usize;
        for (unit, registers) in units.iter().take(max_units).enumerate() {
            if !registers.enabled() {
                continue;
            }

            let desc = match descriptor::decode(registers) {
                Ok(desc) => desc,
                Err(err) => {
                    log::error!("Skipping texture unit {unit}: {err}");
                    self.stats.skipped_units += 1;
                    continue;
                }
            };

            if desc.width == 0 || desc.height == 0 {
                log::warn!("Skipping empty {}x{} texture in unit {unit}", desc.width, desc.height);
                self.stats.skipped_units += 1;
                continue;
            }

            let resolved = self.resolve_texture(backend, frame, &desc, render_targets, memory);
            let resolved = match resolved {
                Ok(resolved) => resolved,
                Err(err) if !err.is_fatal() => {
                    log::error!("Skipping texture unit {unit}: {err}");
                    self.stats.skipped_units += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let view_desc = ShaderResourceViewDesc {
                format: desc.format.info().host_format,
                mip_levels: resolved.mip_levels,
                mapping: remap::channel_mapping(desc.format, desc.remap, resolved.source),
            };
            let view = backend.create_shader_resource_view(&resolved.texture, &view_desc)?;
            frame.write_srv(srv_base + bound_units, view)?;

            let sampler = backend.create_sampler(&desc.sampler)?;
            frame.write_sampler(
                SamplerSlot { page: sampler_base.page, index: sampler_base.index + bound_units },
                sampler,
            )?;

            bound_units += 1;
        }

        for slot in bound_units..texture_count {
            let sampler_slot =
                SamplerSlot { page: sampler_base.page, index: sampler_base.index + slot };
            self.write_dummy_descriptors(backend, frame, srv_base + slot, sampler_slot)?;
        }

        let written = bound_units.max(texture_count);
        frame.advance_sampler_cursor(written);

        Ok(TextureBindings {
            srv_base,
            sampler_page: sampler_base.page,
            sampler_base: sampler_base.index,
            texture_count: written,
            bound_units,
        })
    }

    fn resolve_texture<M: GuestMemory + MemoryWatch>(
        &mut self,
        backend: &mut B,
        frame: &mut FrameResources<B>,
        desc: &TextureDescriptor,
        render_targets: &impl RenderTargetPool<B::Texture>,
        memory: &mut M,
    ) -> TextureResult<ResolvedTexture<B::Texture>> {
        // Render targets take precedence and never touch the cache
        if let Some(texture) = render_targets.render_target(desc.address) {
            log::trace!("Texture at {:08X} aliases a render target", desc.address);
            self.stats.render_target_hits += 1;
            return Ok(ResolvedTexture {
                texture,
                source: TextureSource::RenderTarget,
                mip_levels: 1,
            });
        }

        let signature = TextureSignature::of(desc);
        let cached = self
            .cache
            .lookup(desc.address)
            .map(|entry| (entry.validate(signature), Rc::clone(entry.texture())));

        let texture = match cached {
            Some((Validation::Reuse, texture)) => {
                self.stats.cache_hits += 1;
                texture
            }
            Some((Validation::Stale, texture)) => {
                log::debug!("Updating texture at {:08X} in place ({signature:?})", desc.address);

                let guest = read_guest(memory, desc)?;
                upload::update_existing_texture(backend, &mut self.staging, desc, guest, &texture)?;
                self.cache.mark_clean(desc, memory);

                self.stats.partial_updates += 1;
                texture
            }
            Some((Validation::Mismatched, _)) | None => {
                if let Some(evicted) = self.cache.evict(desc.address, memory) {
                    frame.retire(evicted);
                    self.stats.evictions += 1;
                }

                log::debug!("Uploading new texture at {:08X} ({signature:?})", desc.address);

                let guest = read_guest(memory, desc)?;
                let texture =
                    Rc::new(upload::upload_new_texture(backend, &mut self.staging, desc, guest)?);
                self.cache.store(desc, Rc::clone(&texture), memory);

                self.stats.new_uploads += 1;
                texture
            }
        };

        Ok(ResolvedTexture {
            texture,
            source: TextureSource::Uploaded,
            mip_levels: desc.mipmap.into(),
        })
    }

    fn write_dummy_descriptors(
        &mut self,
        backend: &mut B,
        frame: &mut FrameResources<B>,
        srv_index: u32,
        sampler_slot: SamplerSlot,
    ) -> TextureResult<()> {
        let view = backend.create_shader_resource_view(
            &self.dummy_texture,
            &ShaderResourceViewDesc {
                format: HostFormat::Rgba8Unorm,
                mip_levels: 1,
                mapping: ChannelMapping::ZERO,
            },
        )?;
        frame.write_srv(srv_index, view)?;

        let sampler = backend.create_sampler(&SamplerDesc::POINT_WRAP)?;
        frame.write_sampler(sampler_slot, sampler)?;

        self.stats.dummy_slots += 1;

        Ok(())
    }

    /// Records how far the staging heap was used by the frame that was just submitted.
    pub fn end_frame(&self, frame: &mut FrameResources<B>) {
        frame.set_staging_mark(self.staging.mark());
    }

    /// Returns a frame slot's staging space and retired textures. Only call this once the GPU has
    /// finished the work submitted with the slot; slots must be recycled in submission order.
    pub fn recycle_frame(&mut self, frame: &mut FrameResources<B>) {
        if let Some(mark) = frame.take_staging_mark() {
            self.staging.release_to(mark);
        }
        frame.reset();
    }
}

fn read_guest<'a>(
    memory: &'a impl GuestMemory,
    desc: &TextureDescriptor,
) -> TextureResult<&'a [u8]> {
    let len = desc.guest_size();
    u32::try_from(len)
        .ok()
        .and_then(|read_len| memory.read(desc.address, read_len))
        .ok_or(TextureError::GuestMemoryOutOfRange { address: desc.address, len })
}
