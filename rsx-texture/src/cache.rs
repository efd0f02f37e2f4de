use crate::descriptor::TextureDescriptor;
use crate::format::GcmFormat;
use crate::memory::{ranges_overlap, MemoryWatch, WatchHandle};
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

/// The parts of a texture that determine its host allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSignature {
    pub format: GcmFormat,
    pub width: u16,
    pub height: u16,
    pub mipmap: u16,
}

impl TextureSignature {
    #[must_use]
    pub fn of(desc: &TextureDescriptor) -> Self {
        Self { format: desc.format, width: desc.width, height: desc.height, mipmap: desc.mipmap }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Signature matches and no guest write was seen since the last upload
    Reuse,
    /// Signature matches but the backing memory was written
    Stale,
    Mismatched,
}

#[must_use]
pub fn protected_range(desc: &TextureDescriptor) -> Range<u32> {
    let end = u64::from(desc.address) + desc.guest_size();
    desc.address..u32::try_from(end).unwrap_or(u32::MAX)
}

#[derive(Debug)]
pub struct CacheEntry<T> {
    signature: TextureSignature,
    texture: Rc<T>,
    dirty: bool,
    protected: Range<u32>,
    watch: WatchHandle,
}

impl<T> CacheEntry<T> {
    #[must_use]
    pub fn signature(&self) -> TextureSignature {
        self.signature
    }

    #[must_use]
    pub fn texture(&self) -> &Rc<T> {
        &self.texture
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn protected_range(&self) -> Range<u32> {
        self.protected.clone()
    }

    #[must_use]
    pub fn validate(&self, signature: TextureSignature) -> Validation {
        if self.signature != signature {
            Validation::Mismatched
        } else if self.dirty {
            Validation::Stale
        } else {
            Validation::Reuse
        }
    }
}

#[derive(Debug)]
pub struct TextureCache<T> {
    entries: HashMap<u32, CacheEntry<T>>,
    dirty_events: Vec<Range<u32>>,
}

impl<T> Default for TextureCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TextureCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: HashMap::new(), dirty_events: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn lookup(&self, address: u32) -> Option<&CacheEntry<T>> {
        self.entries.get(&address)
    }

    /// Removes an entry and stops watching its range. The caller is responsible for keeping the
    /// returned texture alive until the GPU is done with it.
    pub fn evict(&mut self, address: u32, watch: &mut impl MemoryWatch) -> Option<Rc<T>> {
        let entry = self.entries.remove(&address)?;
        watch.unwatch(entry.watch);

        log::debug!("Evicted texture at {address:08X} ({:?})", entry.signature);

        Some(entry.texture)
    }

    /// Inserts a clean entry and starts watching its guest range.
    ///
    /// # Panics
    ///
    /// Panics if an entry already exists at the descriptor's address; callers must evict first.
    pub fn store(
        &mut self,
        desc: &TextureDescriptor,
        texture: Rc<T>,
        watch: &mut impl MemoryWatch,
    ) {
        assert!(
            !self.entries.contains_key(&desc.address),
            "texture cache already holds an entry at {:08X}",
            desc.address
        );

        let protected = protected_range(desc);
        let handle = watch.watch(protected.clone());
        self.entries.insert(
            desc.address,
            CacheEntry {
                signature: TextureSignature::of(desc),
                texture,
                dirty: false,
                protected,
                watch: handle,
            },
        );
    }

    /// Marks every entry whose protected range intersects `range` as dirty. Returns how many
    /// entries were clean before the call.
    pub fn mark_dirty(&mut self, range: &Range<u32>) -> usize {
        let mut newly_dirty = 0;
        for (address, entry) in &mut self.entries {
            if !entry.dirty && ranges_overlap(&entry.protected, range) {
                log::debug!("Texture at {address:08X} invalidated by write to {range:08X?}");
                entry.dirty = true;
                newly_dirty += 1;
            }
        }
        newly_dirty
    }

    /// Clears the dirty flag after an in-place re-upload and re-protects the range.
    pub fn mark_clean(&mut self, desc: &TextureDescriptor, watch: &mut impl MemoryWatch) {
        let Some(entry) = self.entries.get_mut(&desc.address) else { return };

        watch.unwatch(entry.watch);
        entry.protected = protected_range(desc);
        entry.watch = watch.watch(entry.protected.clone());
        entry.dirty = false;
    }

    /// Applies every write event the memory watch has queued. Returns the number of entries newly
    /// marked dirty.
    pub fn apply_dirty_events(&mut self, watch: &mut impl MemoryWatch) -> usize {
        let mut events = std::mem::take(&mut self.dirty_events);
        watch.drain_dirty(&mut events);

        let newly_dirty = events.iter().map(|range| self.mark_dirty(range)).sum();

        events.clear();
        self.dirty_events = events;

        newly_dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{SamplerDesc, TextureLocation};
    use crate::memory::LinearGuestMemory;
    use crate::remap::RemapSelector;

    fn descriptor(address: u32, width: u16, height: u16) -> TextureDescriptor {
        TextureDescriptor {
            format: GcmFormat::B8,
            swizzled: false,
            unnormalized: false,
            width,
            height,
            mipmap: 1,
            location: TextureLocation::Main,
            offset: address,
            address,
            dimension: 2,
            cubemap: false,
            remap: RemapSelector::HARDWARE_DEFAULT,
            sampler: SamplerDesc::POINT_WRAP,
        }
    }

    #[test]
    fn validation() {
        let mut memory = LinearGuestMemory::new(0, 0x10000);
        let mut cache = TextureCache::new();

        let desc = descriptor(0x1000, 64, 64);
        cache.store(&desc, Rc::new("texture"), &mut memory);

        let entry = cache.lookup(0x1000).unwrap();
        assert_eq!(entry.validate(TextureSignature::of(&desc)), Validation::Reuse);
        assert_eq!(entry.protected_range(), 0x1000..0x2000);

        let resized = descriptor(0x1000, 64, 32);
        assert_eq!(entry.validate(TextureSignature::of(&resized)), Validation::Mismatched);

        assert_eq!(cache.mark_dirty(&(0x1FFF..0x2000)), 1);
        let entry = cache.lookup(0x1000).unwrap();
        assert_eq!(entry.validate(TextureSignature::of(&desc)), Validation::Stale);
        assert_eq!(entry.validate(TextureSignature::of(&resized)), Validation::Mismatched);
    }

    #[test]
    fn mark_dirty_counts_new_intersections() {
        let mut memory = LinearGuestMemory::new(0, 0x10000);
        let mut cache = TextureCache::new();

        cache.store(&descriptor(0x1000, 64, 64), Rc::new(0), &mut memory);
        cache.store(&descriptor(0x2000, 64, 64), Rc::new(1), &mut memory);
        cache.store(&descriptor(0x4000, 64, 64), Rc::new(2), &mut memory);

        assert_eq!(cache.mark_dirty(&(0x3000..0x4000)), 0);
        assert_eq!(cache.mark_dirty(&(0x1F00..0x2100)), 2);
        assert_eq!(cache.mark_dirty(&(0x1000..0x1001)), 0);
        assert!(!cache.lookup(0x4000).unwrap().is_dirty());
    }

    #[test]
    #[should_panic(expected = "already holds an entry")]
    fn store_over_live_entry() {
        let mut memory = LinearGuestMemory::new(0, 0x10000);
        let mut cache = TextureCache::new();

        cache.store(&descriptor(0x1000, 16, 16), Rc::new(0), &mut memory);
        cache.store(&descriptor(0x1000, 32, 32), Rc::new(1), &mut memory);
    }

    #[test]
    fn guest_writes_round_trip() {
        let mut memory = LinearGuestMemory::new(0, 0x10000);
        let mut cache = TextureCache::new();

        let desc = descriptor(0x1000, 64, 64);
        cache.store(&desc, Rc::new(0), &mut memory);
        assert_eq!(cache.apply_dirty_events(&mut memory), 0);

        memory.write(0x1800, &[1, 2, 3, 4]).unwrap();
        memory.write(0x1900, &[1, 2, 3, 4]).unwrap();
        assert_eq!(cache.apply_dirty_events(&mut memory), 1);
        assert!(cache.lookup(0x1000).unwrap().is_dirty());

        cache.mark_clean(&desc, &mut memory);
        assert!(!cache.lookup(0x1000).unwrap().is_dirty());
        assert_eq!(memory.watched_ranges(), 1);

        // Re-armed
        memory.write(0x1000, &[5]).unwrap();
        assert_eq!(cache.apply_dirty_events(&mut memory), 1);
    }

    #[test]
    fn evict_releases_watch() {
        let mut memory = LinearGuestMemory::new(0, 0x10000);
        let mut cache = TextureCache::new();

        let texture = Rc::new(7);
        cache.store(&descriptor(0x1000, 64, 64), Rc::clone(&texture), &mut memory);

        let evicted = cache.evict(0x1000, &mut memory).unwrap();
        assert!(Rc::ptr_eq(&evicted, &texture));
        assert!(cache.is_empty());
        assert_eq!(memory.watched_ranges(), 0);
        assert!(cache.evict(0x1000, &mut memory).is_none());

        memory.write(0x1000, &[1]).unwrap();
        assert_eq!(cache.apply_dirty_events(&mut memory), 0);
    }
}
