use crate::api::{TextureError, TextureResult};
use crate::backend::GpuBackend;
use std::fmt::{self, Debug, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingAllocation {
    pub offset: u64,
    pub size: u64,
}

/// Heap position at the end of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingMark {
    position: u64,
    allocations: u64,
}

pub struct StagingHeap<B: GpuBackend> {
    buffer: B::Buffer,
    capacity: u64,
    row_pitch_alignment: u32,
    placement_alignment: u64,
    // Next free byte
    head: u64,
    // Start of the oldest allocation that may still be in flight
    tail: u64,
    allocations: u64,
    released_allocations: u64,
}

impl<B: GpuBackend> Debug for StagingHeap<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingHeap")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("live_allocations", &(self.allocations - self.released_allocations))
            .finish_non_exhaustive()
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl<B: GpuBackend> StagingHeap<B> {
    /// # Errors
    ///
    /// Propagates backend errors from creating the staging buffer.
    pub fn new(
        backend: &mut B,
        capacity: u64,
        row_pitch_alignment: u32,
        placement_alignment: u64,
    ) -> TextureResult<Self> {
        assert!(placement_alignment.is_power_of_two(), "placement alignment is not a power of two");
        assert!(row_pitch_alignment.is_power_of_two(), "row pitch alignment is not a power of two");

        let capacity = capacity - capacity % placement_alignment;
        let buffer = backend.create_staging_buffer(capacity)?;

        log::debug!("Created {capacity}-byte texture staging heap");

        Ok(Self {
            buffer,
            capacity,
            row_pitch_alignment,
            placement_alignment,
            head: 0,
            tail: 0,
            allocations: 0,
            released_allocations: 0,
        })
    }

    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn row_pitch_alignment(&self) -> u32 {
        self.row_pitch_alignment
    }

    pub fn placement_alignment(&self) -> u64 {
        self.placement_alignment
    }

    fn is_empty(&self) -> bool {
        self.allocations == self.released_allocations
    }

    // Returns the offset an allocation of `size` aligned bytes would land at
    fn find_space(&self, size: u64) -> Option<u64> {
        if size > self.capacity {
            return None;
        }

        if self.is_empty() {
            return Some(if self.head + size <= self.capacity { self.head } else { 0 });
        }

        if self.head > self.tail {
            // Live region is [tail, head); free space after head, then wrap to [0, tail)
            if self.head + size <= self.capacity {
                Some(self.head)
            } else if size <= self.tail {
                Some(0)
            } else {
                None
            }
        } else {
            // Wrapped (or exactly full): free space is [head, tail)
            (self.head + size <= self.tail).then_some(self.head)
        }
    }

    #[must_use]
    pub fn can_alloc(&self, size: u64) -> bool {
        self.find_space(align_up(size, self.placement_alignment)).is_some()
    }

    /// Allocates `size` bytes, rounded up to the placement alignment.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::StagingHeapExhausted`] if the request cannot be satisfied. The heap
    /// is sized for worst-case per-frame usage, so this is a fatal capacity error.
    pub fn alloc(&mut self, size: u64) -> TextureResult<StagingAllocation> {
        let aligned = align_up(size, self.placement_alignment);
        let Some(offset) = self.find_space(aligned) else {
            return Err(TextureError::StagingHeapExhausted {
                requested: aligned,
                capacity: self.capacity,
                live: self.tail..self.head,
            });
        };

        if self.is_empty() {
            self.tail = offset;
        }
        self.head = offset + aligned;
        self.allocations += 1;

        Ok(StagingAllocation { offset, size: aligned })
    }

    /// Copies texel data into an allocation (map, write, unmap).
    ///
    /// # Errors
    ///
    /// Propagates backend write errors.
    pub fn write(
        &self,
        backend: &mut B,
        allocation: &StagingAllocation,
        data: &[u8],
    ) -> TextureResult<()> {
        assert!(data.len() as u64 <= allocation.size, "staging write larger than its allocation");
        backend.write_staging(&self.buffer, allocation.offset, data)
    }

    #[must_use]
    pub fn mark(&self) -> StagingMark {
        StagingMark { position: self.head, allocations: self.allocations }
    }

    /// Frees everything allocated before `mark` was taken. The caller guarantees the GPU has
    /// finished reading those allocations.
    pub fn release_to(&mut self, mark: StagingMark) {
        debug_assert!(mark.allocations >= self.released_allocations, "marks released out of order");

        self.tail = mark.position;
        self.released_allocations = mark.allocations;
        if self.is_empty() {
            self.head = self.tail;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    fn new_heap(capacity: u64) -> (HeadlessBackend, StagingHeap<HeadlessBackend>) {
        let mut backend = HeadlessBackend::new();
        let heap = StagingHeap::new(&mut backend, capacity, 256, 512).unwrap();
        (backend, heap)
    }

    #[test]
    fn allocations_are_aligned() {
        let (_, mut heap) = new_heap(4096);

        assert_eq!(heap.alloc(1).unwrap(), StagingAllocation { offset: 0, size: 512 });
        assert_eq!(heap.alloc(513).unwrap(), StagingAllocation { offset: 512, size: 1024 });
        assert_eq!(heap.alloc(512).unwrap(), StagingAllocation { offset: 1536, size: 512 });
    }

    #[test]
    fn outsized_request_is_fatal() {
        let (_, mut heap) = new_heap(4096);

        let err = heap.alloc(4097).unwrap_err();
        assert!(matches!(err, TextureError::StagingHeapExhausted { requested: 4608, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn exhausted_until_released() {
        let (_, mut heap) = new_heap(2048);

        heap.alloc(1024).unwrap();
        let frame_0 = heap.mark();
        heap.alloc(1024).unwrap();
        let frame_1 = heap.mark();

        assert!(!heap.can_alloc(512));
        assert!(heap.alloc(512).is_err());

        // Frame 0's region becomes reusable, so the ring wraps to the start
        heap.release_to(frame_0);
        assert_eq!(heap.alloc(512).unwrap().offset, 0);
        assert_eq!(heap.alloc(512).unwrap().offset, 512);
        assert!(!heap.can_alloc(512));

        heap.release_to(frame_1);
        assert!(heap.can_alloc(1024));
    }

    #[test]
    fn wrap_skips_tail_space() {
        let (_, mut heap) = new_heap(4096);

        heap.alloc(1024).unwrap();
        let frame_0 = heap.mark();
        heap.alloc(2048).unwrap();
        heap.release_to(frame_0);

        // 1024 bytes remain at the end, but 1536 does not fit there or before the tail
        assert!(!heap.can_alloc(1536));
        assert_eq!(heap.alloc(1024).unwrap().offset, 3072);
        assert_eq!(heap.alloc(1024).unwrap().offset, 0);
    }

    #[test]
    fn empty_heap_resets() {
        let (_, mut heap) = new_heap(4096);

        heap.alloc(3072).unwrap();
        let mark = heap.mark();
        heap.release_to(mark);

        assert_eq!(heap.alloc(4096).unwrap().offset, 0);
    }

    #[test]
    fn random_frames_never_overlap_live_data() {
        let (_, mut heap) = new_heap(64 * 1024);
        let mut in_flight: Vec<(StagingMark, Vec<StagingAllocation>)> = Vec::new();

        for _ in 0..500 {
            let mut frame = Vec::new();
            for _ in 0..(rand::random::<u8>() % 4) {
                let size = u64::from(rand::random::<u16>() % 8192) + 1;
                match heap.alloc(size) {
                    Ok(allocation) => {
                        for (_, live) in &in_flight {
                            for other in live {
                                assert!(
                                    allocation.offset + allocation.size <= other.offset
                                        || other.offset + other.size <= allocation.offset,
                                    "{allocation:?} overlaps {other:?}"
                                );
                            }
                        }
                        frame.push(allocation);
                    }
                    Err(err) => assert!(matches!(err, TextureError::StagingHeapExhausted { .. })),
                }
            }
            in_flight.push((heap.mark(), frame));

            // Two frames in flight
            if in_flight.len() > 2 {
                let (mark, _) = in_flight.remove(0);
                heap.release_to(mark);
            }
        }
    }
}
