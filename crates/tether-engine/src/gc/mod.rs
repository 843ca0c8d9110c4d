//! Collector-managed heap
//!
//! Objects live in generation-checked slots. Collection is a stop-the-world
//! mark-sweep driven by the owning [`State`](crate::State); userdata with a
//! `__gc` metamethod are finalized once and reclaimed on the following cycle.

mod collector;
mod header;
mod heap;

pub use collector::GcStats;
pub(crate) use collector::Collector;
pub use header::SlotHeader;
pub(crate) use collector::Cycle;
pub use heap::ObjectId;
pub(crate) use heap::{Heap, RawBlock};
