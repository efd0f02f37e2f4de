use crate::api::{TextureCacheConfig, TextureError, TextureResult};
use crate::backend::GpuBackend;
use crate::staging::StagingMark;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

#[derive(Debug)]
pub struct DescriptorHeap<T> {
    name: &'static str,
    slots: Vec<Option<T>>,
}

impl<T> DescriptorHeap<T> {
    #[must_use]
    pub fn new(name: &'static str, capacity: u32) -> Self {
        Self { name, slots: (0..capacity).map(|_| None).collect() }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[must_use]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    fn exhausted(&self) -> TextureError {
        TextureError::DescriptorHeapExhausted { heap: self.name, capacity: self.capacity() }
    }

    /// # Errors
    ///
    /// Returns [`TextureError::DescriptorHeapExhausted`] if `index` is past the end of the heap.
    pub fn write(&mut self, index: u32, descriptor: T) -> TextureResult<()> {
        let err = self.exhausted();
        let slot = self.slots.get_mut(index as usize).ok_or(err)?;
        *slot = Some(descriptor);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSlot {
    pub page: u32,
    pub index: u32,
}

/// Descriptor heaps, cursors and deferred destruction for one frame slot
pub struct FrameResources<B: GpuBackend> {
    srv_heap: DescriptorHeap<B::View>,
    srv_cursor: u32,
    sampler_pages: Vec<DescriptorHeap<B::Sampler>>,
    sampler_page: u32,
    sampler_cursor: u32,
    // Bit N set if page N was bound from since the last reset
    pages_used: u64,
    max_texture_units: u32,
    retired: Vec<Rc<B::Texture>>,
    staging_mark: Option<StagingMark>,
}

impl<B: GpuBackend> Debug for FrameResources<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameResources")
            .field("srv_cursor", &self.srv_cursor)
            .field("sampler_page", &self.sampler_page)
            .field("sampler_cursor", &self.sampler_cursor)
            .field("retired", &self.retired.len())
            .field("staging_mark", &self.staging_mark)
            .finish_non_exhaustive()
    }
}

impl<B: GpuBackend> FrameResources<B> {
    #[must_use]
    pub fn new(config: &TextureCacheConfig) -> Self {
        assert!(
            (1..=64).contains(&config.sampler_heap_pages),
            "sampler heap page count must be between 1 and 64"
        );
        assert!(
            config.max_texture_units <= config.sampler_heap_capacity,
            "sampler heap page cannot hold a full set of texture units"
        );

        Self {
            srv_heap: DescriptorHeap::new("shader resource view", config.srv_heap_capacity),
            srv_cursor: 0,
            sampler_pages: (0..config.sampler_heap_pages)
                .map(|_| DescriptorHeap::new("sampler", config.sampler_heap_capacity))
                .collect(),
            sampler_page: 0,
            sampler_cursor: 0,
            pages_used: 1,
            max_texture_units: config.max_texture_units,
            retired: Vec::new(),
            staging_mark: None,
        }
    }

    /// Reserves `count` consecutive view slots and returns the first.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::DescriptorHeapExhausted`] if the heap has fewer than `count` free
    /// slots left this frame.
    pub fn allocate_srv_range(&mut self, count: u32) -> TextureResult<u32> {
        let base = self.srv_cursor;
        match base.checked_add(count) {
            Some(end) if end <= self.srv_heap.capacity() => {
                self.srv_cursor = end;
                Ok(base)
            }
            _ => Err(self.srv_heap.exhausted()),
        }
    }

    /// Returns where the next draw's samplers start, switching to the next page first if the
    /// current page cannot hold `count` samplers or a full set of texture units, whichever is
    /// larger.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::DescriptorHeapExhausted`] if no page can hold the range or the
    /// switch would land on a page that is already in use this frame.
    pub fn begin_sampler_range(&mut self, count: u32) -> TextureResult<SamplerSlot> {
        let page = &self.sampler_pages[self.sampler_page as usize];
        let capacity = page.capacity();
        let needed = count.max(self.max_texture_units);
        if needed > capacity {
            return Err(page.exhausted());
        }

        if self.sampler_cursor + needed > capacity {
            let next_page = (self.sampler_page + 1) % self.sampler_pages.len() as u32;
            if self.pages_used & (1 << next_page) != 0 {
                return Err(self.sampler_pages[next_page as usize].exhausted());
            }

            log::debug!(
                "Sampler heap page {} is full, switching to page {next_page}",
                self.sampler_page
            );

            self.sampler_page = next_page;
            self.sampler_cursor = 0;
            self.pages_used |= 1 << next_page;
        }

        Ok(SamplerSlot { page: self.sampler_page, index: self.sampler_cursor })
    }

    pub fn advance_sampler_cursor(&mut self, count: u32) {
        self.sampler_cursor += count;
    }

    /// # Errors
    ///
    /// Returns [`TextureError::DescriptorHeapExhausted`] if `index` is out of range.
    pub fn write_srv(&mut self, index: u32, view: B::View) -> TextureResult<()> {
        self.srv_heap.write(index, view)
    }

    /// # Errors
    ///
    /// Returns [`TextureError::DescriptorHeapExhausted`] if the slot is out of range.
    pub fn write_sampler(&mut self, slot: SamplerSlot, sampler: B::Sampler) -> TextureResult<()> {
        self.sampler_pages[slot.page as usize].write(slot.index, sampler)
    }

    #[must_use]
    pub fn srv(&self, index: u32) -> Option<&B::View> {
        self.srv_heap.get(index)
    }

    #[must_use]
    pub fn sampler(&self, slot: SamplerSlot) -> Option<&B::Sampler> {
        self.sampler_pages.get(slot.page as usize)?.get(slot.index)
    }

    #[must_use]
    pub fn sampler_page(&self) -> u32 {
        self.sampler_page
    }

    #[must_use]
    pub fn sampler_cursor(&self) -> u32 {
        self.sampler_cursor
    }

    /// Keeps an evicted texture alive until this frame slot is recycled.
    pub fn retire(&mut self, texture: Rc<B::Texture>) {
        self.retired.push(texture);
    }

    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub(crate) fn set_staging_mark(&mut self, mark: StagingMark) {
        self.staging_mark = Some(mark);
    }

    pub(crate) fn take_staging_mark(&mut self) -> Option<StagingMark> {
        self.staging_mark.take()
    }

    /// Drops retired textures and rewinds every cursor. Only valid once the GPU has finished the
    /// work recorded against this frame slot.
    pub fn reset(&mut self) {
        self.retired.clear();
        self.srv_cursor = 0;
        self.sampler_cursor = 0;
        self.pages_used = 1 << self.sampler_page;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessTexture};
    use crate::backend::{ResourceState, TextureAllocation};
    use crate::descriptor::SamplerDesc;
    use crate::format::HostFormat;

    fn config(sampler_heap_capacity: u32) -> TextureCacheConfig {
        TextureCacheConfig {
            srv_heap_capacity: 64,
            sampler_heap_capacity,
            sampler_heap_pages: 2,
            max_texture_units: 16,
            ..TextureCacheConfig::default()
        }
    }

    #[test]
    fn srv_ranges() {
        let mut frame = FrameResources::<HeadlessBackend>::new(&config(32));

        assert_eq!(frame.allocate_srv_range(16).unwrap(), 0);
        assert_eq!(frame.allocate_srv_range(48).unwrap(), 16);

        let err = frame.allocate_srv_range(1).unwrap_err();
        assert!(matches!(err, TextureError::DescriptorHeapExhausted { capacity: 64, .. }));
        assert!(err.is_fatal());

        frame.reset();
        assert_eq!(frame.allocate_srv_range(64).unwrap(), 0);
    }

    #[test]
    fn sampler_page_switches_exactly_at_boundary() {
        let mut frame = FrameResources::<HeadlessBackend>::new(&config(32));

        assert_eq!(frame.begin_sampler_range(16).unwrap(), SamplerSlot { page: 0, index: 0 });
        frame.advance_sampler_cursor(16);

        // 16 + 16 == 32 still fits
        assert_eq!(frame.begin_sampler_range(16).unwrap(), SamplerSlot { page: 0, index: 16 });
        frame.advance_sampler_cursor(16);

        assert_eq!(frame.begin_sampler_range(16).unwrap(), SamplerSlot { page: 1, index: 0 });
        frame.advance_sampler_cursor(3);
        assert_eq!(frame.begin_sampler_range(16).unwrap(), SamplerSlot { page: 1, index: 3 });
        frame.advance_sampler_cursor(16);

        // Page 1 cannot hold another 16 and page 0 was already used this frame
        assert!(matches!(
            frame.begin_sampler_range(16),
            Err(TextureError::DescriptorHeapExhausted { heap: "sampler", capacity: 32 })
        ));

        frame.reset();
        assert_eq!(frame.begin_sampler_range(16).unwrap(), SamplerSlot { page: 1, index: 0 });
        frame.advance_sampler_cursor(32);
        assert_eq!(frame.begin_sampler_range(16).unwrap(), SamplerSlot { page: 0, index: 0 });
    }

    #[test]
    fn sampler_page_switch_accounts_for_declared_slots() {
        let mut frame = FrameResources::<HeadlessBackend>::new(&config(32));

        assert_eq!(frame.begin_sampler_range(16).unwrap(), SamplerSlot { page: 0, index: 0 });
        frame.advance_sampler_cursor(16);

        // 16 + 20 overflows page 0 even though 16 + 16 would not
        assert_eq!(frame.begin_sampler_range(20).unwrap(), SamplerSlot { page: 1, index: 0 });
        frame.advance_sampler_cursor(20);

        assert!(matches!(
            frame.begin_sampler_range(33),
            Err(TextureError::DescriptorHeapExhausted { heap: "sampler", capacity: 32 })
        ));
        assert_eq!(frame.sampler_page(), 1);
    }

    #[test]
    fn descriptor_writes() {
        let mut frame = FrameResources::<HeadlessBackend>::new(&config(32));

        let slot = SamplerSlot { page: 1, index: 31 };
        frame.write_sampler(slot, SamplerDesc::POINT_WRAP).unwrap();
        assert_eq!(frame.sampler(slot), Some(&SamplerDesc::POINT_WRAP));
        assert_eq!(frame.sampler(SamplerSlot { page: 0, index: 31 }), None);

        let past_end = SamplerSlot { page: 1, index: 32 };
        assert!(frame.write_sampler(past_end, SamplerDesc::POINT_WRAP).is_err());
        assert!(frame.srv(0).is_none());
    }

    #[test]
    fn retired_textures_live_until_reset() {
        let mut backend = HeadlessBackend::new();
        let allocation =
            TextureAllocation { format: HostFormat::R8Unorm, width: 1, height: 1, mip_levels: 1 };
        let texture: Rc<HeadlessTexture> =
            Rc::new(backend.create_texture(&allocation, ResourceState::ShaderRead).unwrap());
        let weak = Rc::downgrade(&texture);

        let mut frame = FrameResources::<HeadlessBackend>::new(&config(32));
        frame.retire(texture);
        assert_eq!(frame.retired_count(), 1);
        assert!(weak.upgrade().is_some());

        frame.reset();
        assert!(weak.upgrade().is_none());
    }
}
