//! Per-slot GC header

/// Bookkeeping stored next to every heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    /// Mark bit for the mark-sweep collector.
    marked: bool,
    /// Bumped every time the slot is reused; stale handles stop resolving.
    generation: u32,
    /// Bytes charged to the heap for this object.
    size: usize,
}

impl SlotHeader {
    /// Header for a freshly allocated object.
    pub fn new(generation: u32, size: usize) -> Self {
        Self {
            marked: false,
            generation,
            size,
        }
    }

    /// Check if the object is marked
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Mark the object as reachable
    #[inline]
    pub fn mark(&mut self) {
        self.marked = true;
    }

    /// Clear the mark bit
    #[inline]
    pub fn unmark(&mut self) {
        self.marked = false;
    }

    /// Slot generation
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Charged size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}
