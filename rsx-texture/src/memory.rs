use crate::api::{TextureError, TextureResult};
use std::collections::HashMap;
use std::ops::Range;

/// Read-only byte-range access to guest memory
pub trait GuestMemory {
    /// Returns `None` if any part of the range is not backed by guest memory.
    fn read(&self, address: u32, len: u32) -> Option<&[u8]>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

pub trait MemoryWatch {
    /// Start watching a range. The next write that touches the range produces one dirty event.
    fn watch(&mut self, range: Range<u32>) -> WatchHandle;

    /// Stop watching. Handles that already fired or were already removed are ignored.
    fn unwatch(&mut self, handle: WatchHandle);

    /// Move all pending dirty ranges into `out`.
    fn drain_dirty(&mut self, out: &mut Vec<Range<u32>>);
}

#[must_use]
pub fn ranges_overlap(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Contiguous guest memory starting at a fixed base address, with software write watching.
///
/// Watches behave like one-shot page protection: the first write to a watched range queues a dirty
/// event and disarms the watch until the range is watched again.
#[derive(Debug, Clone)]
pub struct LinearGuestMemory {
    base: u32,
    bytes: Vec<u8>,
    watches: HashMap<WatchHandle, Range<u32>>,
    next_handle: u64,
    dirty: Vec<Range<u32>>,
}

impl LinearGuestMemory {
    #[must_use]
    pub fn new(base: u32, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0; len],
            watches: HashMap::new(),
            next_handle: 0,
            dirty: Vec::new(),
        }
    }

    #[must_use]
    pub fn base(&self) -> u32 {
        self.base
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn watched_ranges(&self) -> usize {
        self.watches.len()
    }

    fn byte_range(&self, address: u32, len: u32) -> Option<Range<usize>> {
        let start = address.checked_sub(self.base)? as usize;
        let end = start.checked_add(len as usize)?;
        (end <= self.bytes.len()).then_some(start..end)
    }

    /// Writes guest data, firing any watches the write touches.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::GuestMemoryOutOfRange`] if the write does not fit in guest memory.
    pub fn write(&mut self, address: u32, data: &[u8]) -> TextureResult<()> {
        let len = data.len() as u32;
        let byte_range = self
            .byte_range(address, len)
            .ok_or(TextureError::GuestMemoryOutOfRange { address, len: len.into() })?;
        self.bytes[byte_range].copy_from_slice(data);

        let written = address..address.saturating_add(len);
        let dirty = &mut self.dirty;
        self.watches.retain(|_, watched| {
            if ranges_overlap(watched, &written) {
                dirty.push(watched.start.max(written.start)..watched.end.min(written.end));
                false
            } else {
                true
            }
        });

        Ok(())
    }

    /// Fills guest memory from a generator without firing watches; intended for initial loads.
    pub fn fill_with(&mut self, mut f: impl FnMut(usize) -> u8) {
        for (i, byte) in self.bytes.iter_mut().enumerate() {
            *byte = f(i);
        }
    }
}

impl GuestMemory for LinearGuestMemory {
    fn read(&self, address: u32, len: u32) -> Option<&[u8]> {
        self.byte_range(address, len).map(|range| &self.bytes[range])
    }
}

impl MemoryWatch for LinearGuestMemory {
    fn watch(&mut self, range: Range<u32>) -> WatchHandle {
        let handle = WatchHandle(self.next_handle);
        self.next_handle += 1;
        self.watches.insert(handle, range);
        handle
    }

    fn unwatch(&mut self, handle: WatchHandle) {
        self.watches.remove(&handle);
    }

    fn drain_dirty(&mut self, out: &mut Vec<Range<u32>>) {
        out.append(&mut self.dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_bounds() {
        let memory = LinearGuestMemory::new(0x1000, 0x100);
        assert_eq!(memory.read(0x1000, 0x100).map(<[u8]>::len), Some(0x100));
        assert!(memory.read(0x0FFF, 1).is_none());
        assert!(memory.read(0x10FF, 2).is_none());
        assert!(memory.read(u32::MAX, u32::MAX).is_none());
    }

    #[test]
    fn write_fires_overlapping_watch_once() {
        let mut memory = LinearGuestMemory::new(0, 0x1000);
        let _ = memory.watch(0x100..0x200);
        let untouched = memory.watch(0x300..0x400);

        memory.write(0x1F0, &[1; 0x20]).unwrap();
        memory.write(0x180, &[2; 4]).unwrap();

        let mut dirty = Vec::new();
        memory.drain_dirty(&mut dirty);
        assert_eq!(dirty, vec![0x1F0..0x200]);
        assert_eq!(memory.read(0x1F0, 1), Some(&[1][..]));

        // Adjacent writes do not overlap
        memory.write(0x2F0, &[3; 0x10]).unwrap();
        memory.write(0x400, &[3; 0x10]).unwrap();
        dirty.clear();
        memory.drain_dirty(&mut dirty);
        assert!(dirty.is_empty());

        memory.unwatch(untouched);
        memory.write(0x380, &[4]).unwrap();
        memory.drain_dirty(&mut dirty);
        assert!(dirty.is_empty());
        assert_eq!(memory.watched_ranges(), 0);
    }

    #[test]
    fn dirty_event_covers_only_written_bytes() {
        let mut memory = LinearGuestMemory::new(0, 0x1000);
        let _ = memory.watch(0x000..0x1000);
        let _ = memory.watch(0x800..0x900);

        memory.write(0x10, &[0xAA; 4]).unwrap();

        let mut dirty = Vec::new();
        memory.drain_dirty(&mut dirty);
        assert_eq!(dirty, vec![0x10..0x14]);
        assert_eq!(memory.watched_ranges(), 1);
    }

    #[test]
    fn out_of_range_write() {
        let mut memory = LinearGuestMemory::new(0x8000, 0x10);
        assert!(matches!(
            memory.write(0x800F, &[0, 0]),
            Err(TextureError::GuestMemoryOutOfRange { address: 0x800F, len: 2 })
        ));
    }
}
