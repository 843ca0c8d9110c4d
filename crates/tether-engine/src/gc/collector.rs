//! Mark-sweep collector
//!
//! The collector itself only decides what is reachable and what must be
//! finalized. Running finalizers needs a live [`State`](crate::State), so the
//! state drives the cycle: mark, schedule finalizers, sweep, then call the
//! scheduled `__gc` handlers outside the heap borrow.

use super::heap::{Heap, ObjectId};
use crate::object::HeapObject;
use crate::value::Value;
use std::time::Duration;

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total bytes freed
    pub bytes_freed: usize,

    /// Total `__gc` finalizers invoked
    pub finalizers_run: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Live objects after last collection
    pub live_objects: usize,

    /// Live bytes after last collection
    pub live_bytes: usize,
}

impl GcStats {
    fn update(
        &mut self,
        pause_time: Duration,
        marked: usize,
        freed: usize,
        freed_bytes: usize,
        live_objects: usize,
        live_bytes: usize,
    ) {
        self.collections += 1;
        self.objects_freed += freed;
        self.bytes_freed += freed_bytes;
        self.total_pause_time += pause_time;
        self.last_pause_time = pause_time;
        self.last_marked_count = marked;
        self.last_freed_count = freed;
        self.live_objects = live_objects;
        self.live_bytes = live_bytes;
    }
}

/// Result of the heap-side part of a cycle.
pub(crate) struct Cycle {
    /// Objects removed from the heap, to be dropped outside the state borrow.
    pub(crate) garbage: Vec<HeapObject>,
    /// Unreachable userdata and their `__gc` handlers.
    pub(crate) finalize: Vec<(ObjectId, Value)>,
}

/// Collector policy and statistics.
pub(crate) struct Collector {
    threshold: usize,
    base_threshold: usize,
    stats: GcStats,
}

impl Collector {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            threshold,
            base_threshold: threshold,
            stats: GcStats::default(),
        }
    }

    /// Check if we should collect
    pub(crate) fn should_collect(&self, heap: &Heap) -> bool {
        heap.allocated_bytes() > self.threshold
    }

    pub(crate) fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub(crate) fn record_finalizers(&mut self, count: usize) {
        self.stats.finalizers_run += count;
    }

    /// Run mark and sweep.
    ///
    /// `gc_handler` resolves the `__gc` metamethod of a userdata; unreachable
    /// userdata that have one and were not finalized before are kept alive
    /// for one more cycle and returned for finalization.
    pub(crate) fn collect(
        &mut self,
        heap: &mut Heap,
        roots: &[Value],
        gc_handler: impl Fn(&Heap, ObjectId) -> Option<Value>,
    ) -> Cycle {
        let start = std::time::Instant::now();

        heap.unmark_all();
        let mut gray: Vec<ObjectId> = roots.iter().filter_map(Value::object_id).collect();
        let mut marked = mark(heap, &mut gray);

        let mut finalize = Vec::new();
        for id in heap.ids() {
            if heap.header(id).is_some_and(|h| h.is_marked()) {
                continue;
            }
            let Some(HeapObject::UserData(ud)) = heap.get(id) else {
                continue;
            };
            if ud.finalized {
                continue;
            }
            if let Some(handler) = gc_handler(heap, id) {
                finalize.push((id, handler));
            }
        }
        for (id, handler) in &finalize {
            if let Some(HeapObject::UserData(ud)) = heap.get_mut(*id) {
                ud.finalized = true;
            }
            gray.push(*id);
            gray.extend(handler.object_id());
        }
        marked += mark(heap, &mut gray);

        let (garbage, freed_bytes) = heap.sweep();

        self.stats.update(
            start.elapsed(),
            marked,
            garbage.len(),
            freed_bytes,
            heap.allocation_count(),
            heap.allocated_bytes(),
        );

        // Adjust threshold (grow by 2x current usage)
        self.threshold = (heap.allocated_bytes() * 2).max(self.base_threshold);

        Cycle { garbage, finalize }
    }
}

/// Mark everything reachable from `gray`, returning how many objects were newly marked.
fn mark(heap: &mut Heap, gray: &mut Vec<ObjectId>) -> usize {
    let mut marked = 0;
    while let Some(id) = gray.pop() {
        match heap.header_mut(id) {
            Some(header) if !header.is_marked() => header.mark(),
            _ => continue,
        }
        marked += 1;
        if let Some(object) = heap.get(id) {
            object.for_each_child(|child| gray.push(child));
        }
    }
    marked
}
