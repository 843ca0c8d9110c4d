//! Slot heap for collector-managed objects

use super::header::SlotHeader;
use crate::object::HeapObject;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;

/// Handle to a heap object.
///
/// Carries the slot generation, so a handle to a reclaimed object never
/// resolves to whatever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}{:02x}", self.index, self.generation & 0xff)
    }
}

struct Slot {
    header: SlotHeader,
    object: Option<HeapObject>,
}

/// Raw memory owned by a userdata.
///
/// The block is never interpreted by the heap; whoever wrote into it is
/// responsible for dropping its contents (through `__gc`) before the block
/// is released.
pub(crate) struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBlock {
    /// Allocate a zeroed block. `None` if the allocator fails.
    pub(crate) fn allocate(layout: Layout) -> Option<Self> {
        let layout = Layout::from_size_align(layout.size().max(1), layout.align()).ok()?;
        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, layout })
    }

    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by `alloc_zeroed` with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Slot heap.
pub(crate) struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Total bytes charged to live objects
    allocated_bytes: usize,
    /// Maximum heap size (0 = unlimited)
    max_heap_bytes: usize,
    live: usize,
}

impl Heap {
    pub(crate) fn new(max_heap_bytes: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            allocated_bytes: 0,
            max_heap_bytes,
            live: 0,
        }
    }

    /// Whether `size` more bytes fit under the heap limit.
    pub(crate) fn has_room(&self, size: usize) -> bool {
        self.max_heap_bytes == 0 || self.allocated_bytes + size <= self.max_heap_bytes
    }

    /// Allocate an object, honoring the heap limit. A rejected object is
    /// handed back so the caller decides where it drops.
    pub(crate) fn allocate(&mut self, object: HeapObject) -> Result<ObjectId, HeapObject> {
        let size = object.approx_size();
        if !self.has_room(size) {
            return Err(object);
        }
        Ok(self.insert(object, size))
    }

    /// Allocate an object without checking the heap limit.
    pub(crate) fn insert(&mut self, object: HeapObject, size: usize) -> ObjectId {
        self.allocated_bytes += size;
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.header = SlotHeader::new(slot.header.generation(), size);
                slot.object = Some(object);
                ObjectId {
                    index,
                    generation: slot.header.generation(),
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    header: SlotHeader::new(0, size),
                    object: Some(object),
                });
                ObjectId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.object.is_some() && s.header.generation() == id.generation)
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.object.is_some() && s.header.generation() == id.generation)
    }

    pub(crate) fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        self.slot(id)?.object.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        self.slot_mut(id)?.object.as_mut()
    }

    pub(crate) fn header(&self, id: ObjectId) -> Option<&SlotHeader> {
        self.slot(id).map(|s| &s.header)
    }

    pub(crate) fn header_mut(&mut self, id: ObjectId) -> Option<&mut SlotHeader> {
        self.slot_mut(id).map(|s| &mut s.header)
    }

    /// Handles of every live object.
    pub(crate) fn ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.object.is_some())
            .map(|(index, s)| ObjectId {
                index: index as u32,
                generation: s.header.generation(),
            })
            .collect()
    }

    pub(crate) fn unmark_all(&mut self) {
        for slot in &mut self.slots {
            slot.header.unmark();
        }
    }

    /// Free every unmarked object.
    ///
    /// The removed objects are returned instead of dropped: native closures
    /// may own values whose destructors call back into the state, so the
    /// caller drops them once it no longer holds the state borrow.
    pub(crate) fn sweep(&mut self) -> (Vec<HeapObject>, usize) {
        let mut garbage = Vec::new();
        let mut freed_bytes = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() || slot.header.is_marked() {
                continue;
            }
            if let Some(object) = slot.object.take() {
                freed_bytes += slot.header.size();
                slot.header = SlotHeader::new(slot.header.generation().wrapping_add(1), 0);
                self.free.push(index as u32);
                garbage.push(object);
            }
        }
        self.allocated_bytes -= freed_bytes;
        self.live -= garbage.len();
        (garbage, freed_bytes)
    }

    /// Remove every object, returning them for the caller to drop.
    pub(crate) fn drain(&mut self) -> Vec<HeapObject> {
        let garbage = self
            .slots
            .iter_mut()
            .filter_map(|s| s.object.take())
            .collect();
        self.slots.clear();
        self.free.clear();
        self.allocated_bytes = 0;
        self.live = 0;
        garbage
    }

    pub(crate) fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    pub(crate) fn allocation_count(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut heap = Heap::new(0);
        let first = heap.allocate(HeapObject::Table(Table::new())).unwrap();
        heap.unmark_all();
        let (garbage, _) = heap.sweep();
        assert_eq!(garbage.len(), 1);
        assert!(heap.get(first).is_none());

        let second = heap.allocate(HeapObject::Table(Table::new())).unwrap();
        assert_ne!(first, second);
        assert!(heap.get(second).is_some());
        assert!(heap.get(first).is_none());
    }

    #[test]
    fn test_heap_limit() {
        let mut heap = Heap::new(1);
        assert!(matches!(
            heap.allocate(HeapObject::Table(Table::new())),
            Err(HeapObject::Table(_))
        ));
        assert_eq!(heap.allocation_count(), 0);
    }

    #[test]
    fn test_marked_objects_survive_sweep() {
        let mut heap = Heap::new(0);
        let kept = heap.allocate(HeapObject::Table(Table::new())).unwrap();
        let dropped = heap.allocate(HeapObject::Table(Table::new())).unwrap();
        heap.unmark_all();
        heap.header_mut(kept).unwrap().mark();
        let (garbage, bytes) = heap.sweep();
        assert_eq!(garbage.len(), 1);
        assert!(bytes > 0);
        assert!(heap.get(kept).is_some());
        assert!(heap.get(dropped).is_none());
        assert_eq!(heap.allocation_count(), 1);
    }

    #[test]
    fn test_raw_block_alignment() {
        let layout = Layout::from_size_align(24, 16).unwrap();
        let block = RawBlock::allocate(layout).unwrap();
        assert_eq!(block.as_ptr().as_ptr() as usize % 16, 0);
        assert_eq!(block.size(), 24);
    }
}
