//! Guest state handles
//!
//! A [`Vm`] owns one guest state. [`State`] is a cheap, cloneable handle to it
//! bound to one cooperative thread; native functions receive the handle of the
//! thread that called them. All handles share the heap, the registry and the
//! globals table.

mod call;
mod registry;
mod stack;
mod tables;

pub use registry::{NO_REF, REF_NIL};

use crate::error::{GuestError, GuestResult};
use crate::gc::{Collector, GcStats, Heap, ObjectId};
use crate::load::ChunkLoader;
use crate::logging::{self, TARGET_GC};
use crate::object::{HeapObject, ThreadData};
use crate::options::VmOptions;
use crate::table::Table;
use crate::value::Value;
use std::cell::{RefCell, RefMut};
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, info};

/// Pseudo-index of the registry table.
pub const REGISTRY_INDEX: i32 = -1_001_000;

/// `nresults` value that keeps every result of a call.
pub const MULTRET: i32 = -1;

/// Pseudo-index of upvalue `n` (1-based) of the running native closure.
pub fn upvalue_index(n: i32) -> i32 {
    REGISTRY_INDEX - n
}

pub(crate) struct Inner {
    pub(crate) heap: Heap,
    pub(crate) collector: Collector,
    pub(crate) registry: ObjectId,
    pub(crate) globals: ObjectId,
    pub(crate) main: ObjectId,
    pub(crate) refs: registry::RefSlots,
    /// Message handlers of the active protected calls, innermost last.
    pub(crate) handlers: Vec<Value>,
    pub(crate) options: VmOptions,
    pub(crate) closed: bool,
    /// Stand-in for threads whose handle no longer resolves.
    orphan: ThreadData,
}

impl Inner {
    fn bootstrap(options: VmOptions) -> Self {
        let mut heap = Heap::new(options.max_heap_bytes);
        let registry = heap.insert(HeapObject::Table(Table::new()), 0);
        let globals = heap.insert(HeapObject::Table(Table::new()), 0);
        let main = heap.insert(
            HeapObject::Thread(ThreadData::new(options.stack_capacity)),
            0,
        );
        Self {
            heap,
            collector: Collector::new(options.gc_threshold),
            registry,
            globals,
            main,
            refs: registry::RefSlots::default(),
            handlers: Vec::new(),
            options,
            closed: false,
            orphan: ThreadData::new(0),
        }
    }

    pub(crate) fn thread(&self, id: ObjectId) -> &ThreadData {
        match self.heap.get(id) {
            Some(HeapObject::Thread(t)) => t,
            _ => &self.orphan,
        }
    }

    pub(crate) fn thread_mut(&mut self, id: ObjectId) -> &mut ThreadData {
        match self.heap.get_mut(id) {
            Some(HeapObject::Thread(t)) => t,
            _ => &mut self.orphan,
        }
    }

    pub(crate) fn table(&self, id: ObjectId) -> GuestResult<&Table> {
        match self.heap.get(id) {
            Some(HeapObject::Table(t)) => Ok(t),
            _ => Err(GuestError::runtime("attempt to access a collected table")),
        }
    }

    pub(crate) fn table_mut(&mut self, id: ObjectId) -> GuestResult<&mut Table> {
        match self.heap.get_mut(id) {
            Some(HeapObject::Table(t)) => Ok(t),
            _ => Err(GuestError::runtime("attempt to access a collected table")),
        }
    }

    pub(crate) fn metatable_of(&self, value: &Value) -> Option<ObjectId> {
        match value {
            Value::Table(id) => match self.heap.get(*id) {
                Some(HeapObject::Table(t)) => t.metatable,
                _ => None,
            },
            Value::UserData(id) => match self.heap.get(*id) {
                Some(HeapObject::UserData(u)) => u.metatable,
                _ => None,
            },
            _ => None,
        }
    }

    /// Raw lookup of `name` in the metatable of `value`.
    pub(crate) fn metafield(&self, value: &Value, name: &str) -> Value {
        self.metatable_of(value)
            .and_then(|mt| self.table(mt).ok())
            .map(|t| t.get_str(name))
            .unwrap_or(Value::Nil)
    }

    /// Display name of a value's type, preferring the metatable's `__name`.
    pub(crate) fn display_type(&self, value: &Value) -> String {
        match self.metafield(value, "__name") {
            Value::String(name) => name.to_string(),
            _ => value.type_name().to_string(),
        }
    }

    /// Read a slot, pseudo-index or upvalue. `None` for an unacceptable index.
    pub(crate) fn value_at(&self, thread: ObjectId, idx: i32) -> Option<Value> {
        if idx == REGISTRY_INDEX {
            return Some(Value::Table(self.registry));
        }
        if idx < REGISTRY_INDEX {
            let n = (REGISTRY_INDEX - idx) as usize;
            let function = self.thread(thread).frame().function?;
            return match self.heap.get(function) {
                Some(HeapObject::Function(c)) => c.upvalues.get(n - 1).cloned(),
                _ => None,
            };
        }
        let pos = self.stack_pos(thread, idx)?;
        self.thread(thread).stack.get(pos).cloned()
    }

    /// Absolute stack position of a real (non-pseudo) index.
    pub(crate) fn stack_pos(&self, thread: ObjectId, idx: i32) -> Option<usize> {
        let t = self.thread(thread);
        let base = t.frame().base;
        let len = t.stack.len();
        let pos = if idx > 0 {
            base + idx as usize - 1
        } else if idx < 0 && idx > REGISTRY_INDEX {
            let back = idx.unsigned_abs() as usize;
            if back > len.saturating_sub(base) {
                return None;
            }
            len - back
        } else {
            return None;
        };
        (pos < len).then_some(pos)
    }

    /// Allocate an object whose drop runs no native code.
    pub(crate) fn alloc(&mut self, object: HeapObject) -> GuestResult<ObjectId> {
        self.heap.allocate(object).map_err(|_| GuestError::memory())
    }

    /// Allocate an object, handing it back on rejection so it can be
    /// dropped once the state is no longer borrowed.
    pub(crate) fn try_alloc(&mut self, object: HeapObject) -> Result<ObjectId, HeapObject> {
        self.heap.allocate(object)
    }

    fn roots(&self) -> Vec<Value> {
        let mut roots = vec![
            Value::Table(self.registry),
            Value::Table(self.globals),
            Value::Thread(self.main),
        ];
        for id in self.heap.ids() {
            if let Some(HeapObject::Thread(t)) = self.heap.get(id) {
                if t.anchor.strong_count() > 0 {
                    roots.push(Value::Thread(id));
                }
            }
        }
        roots.extend(self.orphan.stack.iter().cloned());
        roots.extend(self.handlers.iter().cloned());
        roots
    }
}

struct Shared {
    inner: RefCell<Inner>,
    loader: RefCell<Option<Rc<dyn ChunkLoader>>>,
}

/// Handle to a guest state, bound to one cooperative thread.
///
/// Not `Send`: a guest state is single-threaded and every operation on it is
/// strictly sequential.
#[derive(Clone)]
pub struct State {
    shared: Rc<Shared>,
    thread: ObjectId,
    /// Keeps a secondary thread alive while the host holds this handle.
    anchor: Option<Rc<()>>,
}

impl State {
    fn new(options: VmOptions) -> Self {
        let inner = Inner::bootstrap(options);
        let main = inner.main;
        Self {
            shared: Rc::new(Shared {
                inner: RefCell::new(inner),
                loader: RefCell::new(None),
            }),
            thread: main,
            anchor: None,
        }
    }

    pub(crate) fn inner(&self) -> RefMut<'_, Inner> {
        self.shared.inner.borrow_mut()
    }

    pub(crate) fn thread_id(&self) -> ObjectId {
        self.thread
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Handle bound to the main thread of this state.
    pub fn main_thread(&self) -> State {
        let main = self.inner().main;
        State {
            shared: self.shared.clone(),
            thread: main,
            anchor: None,
        }
    }

    /// Whether this handle is bound to the main thread.
    pub fn is_main_thread(&self) -> bool {
        self.inner().main == self.thread
    }

    /// Whether both handles belong to the same guest state.
    pub fn same_state(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Create a cooperative thread, push it, and return a handle bound to it.
    ///
    /// The thread shares the heap, registry and globals but has its own stack.
    pub fn new_thread(&self) -> GuestResult<State> {
        self.maybe_collect();
        let anchor = Rc::new(());
        let id = {
            let mut inner = self.inner();
            let mut data = ThreadData::new(inner.options.stack_capacity);
            data.anchor = Rc::downgrade(&anchor);
            inner.alloc(HeapObject::Thread(data))?
        };
        self.push(Value::Thread(id));
        Ok(State {
            shared: self.shared.clone(),
            thread: id,
            anchor: Some(anchor),
        })
    }

    /// Handle for the thread at `idx`, if it holds one.
    pub fn to_thread(&self, idx: i32) -> Option<State> {
        let mut inner = self.inner();
        let id = match inner.value_at(self.thread, idx)? {
            Value::Thread(id) => id,
            _ => return None,
        };
        if id == inner.main {
            return Some(State {
                shared: self.shared.clone(),
                thread: id,
                anchor: None,
            });
        }
        let thread = match inner.heap.get_mut(id) {
            Some(HeapObject::Thread(t)) => t,
            _ => return None,
        };
        let anchor = thread.anchor.upgrade().unwrap_or_else(|| {
            let anchor = Rc::new(());
            thread.anchor = Rc::downgrade(&anchor);
            anchor
        });
        Some(State {
            shared: self.shared.clone(),
            thread: id,
            anchor: Some(anchor),
        })
    }

    /// Pop `n` values from this thread and push them, in order, onto `to`.
    pub fn xmove(&self, to: &State, n: i32) {
        debug_assert!(self.same_state(to), "xmove between different states");
        let mut inner = self.inner();
        let from = inner.thread_mut(self.thread);
        let base = from.frame().base;
        let start = from.stack.len().saturating_sub(n.max(0) as usize).max(base);
        let moved: Vec<Value> = from.stack.drain(start..).collect();
        inner.thread_mut(to.thread).stack.extend(moved);
    }

    // ========================================================================
    // Garbage Collection
    // ========================================================================

    /// Run a full collection cycle, including pending finalizers.
    ///
    /// Returns the number of objects freed.
    pub fn collect_garbage(&self) -> usize {
        let cycle = {
            let mut guard = self.inner();
            let inner = &mut *guard;
            let roots = inner.roots();
            inner
                .collector
                .collect(&mut inner.heap, &roots, gc_handler)
        };
        let freed = cycle.garbage.len();
        // Native closures may own values whose destructors touch the state.
        drop(cycle.garbage);

        let finalized = cycle.finalize.len();
        for (id, handler) in cycle.finalize {
            self.run_finalizer(id, handler);
        }

        let mut inner = self.inner();
        inner.collector.record_finalizers(finalized);
        let stats = inner.collector.stats();
        logging::log_gc_complete(
            stats.last_pause_time.as_micros() as u64,
            freed,
            finalized,
            stats.live_objects,
        );
        freed
    }

    /// Whether the owning [`Vm`] has been dropped.
    pub fn is_closed(&self) -> bool {
        // A busy state is still open.
        self.shared
            .inner
            .try_borrow()
            .map(|inner| inner.closed)
            .unwrap_or(false)
    }

    /// Collector statistics.
    pub fn gc_stats(&self) -> GcStats {
        self.inner().collector.stats().clone()
    }

    /// Number of live heap objects.
    pub fn object_count(&self) -> usize {
        self.inner().heap.allocation_count()
    }

    /// Bytes currently charged to the heap.
    pub fn allocated_bytes(&self) -> usize {
        self.inner().heap.allocated_bytes()
    }

    /// Collect if the allocation threshold has been crossed. Called at
    /// allocation safe points, before anything is held outside the stack.
    pub(crate) fn maybe_collect(&self) {
        let due = {
            let inner = self.inner();
            !inner.closed && inner.collector.should_collect(&inner.heap)
        };
        if due {
            self.collect_garbage();
        }
    }

    fn run_finalizer(&self, id: ObjectId, handler: Value) {
        self.push(handler);
        self.push(Value::UserData(id));
        if self.pcall(1, 0, 0).is_err() {
            let message = self
                .value(-1)
                .map(|v| v.to_display_string())
                .unwrap_or_default();
            logging::log_finalizer_error(&message);
            self.pop(1);
        }
    }

    /// Run every pending finalizer and release all objects.
    ///
    /// The state stays usable afterwards but starts over empty.
    pub(crate) fn close(&self) {
        let pending: Vec<(ObjectId, Value)> = {
            let mut inner = self.inner();
            if inner.closed {
                return;
            }
            let ids = inner.heap.ids();
            let mut pending = Vec::new();
            for id in ids {
                if let Some(HeapObject::UserData(u)) = inner.heap.get(id) {
                    if u.finalized {
                        continue;
                    }
                    if let Some(handler) = gc_handler(&inner.heap, id) {
                        pending.push((id, handler));
                    }
                }
            }
            for (id, _) in &pending {
                if let Some(HeapObject::UserData(u)) = inner.heap.get_mut(*id) {
                    u.finalized = true;
                }
            }
            pending
        };
        debug!(target: TARGET_GC, pending = pending.len(), "closing guest state");
        for (id, handler) in pending {
            self.run_finalizer(id, handler);
        }

        let garbage = {
            let mut inner = self.inner();
            let garbage = inner.heap.drain();
            let options = inner.options.clone();
            *inner = Inner::bootstrap(options);
            inner.closed = true;
            garbage
        };
        drop(garbage);
    }
}

/// `__gc` handler of a userdata, if its metatable has a callable one.
fn gc_handler(heap: &Heap, id: ObjectId) -> Option<Value> {
    let mt = match heap.get(id)? {
        HeapObject::UserData(u) => u.metatable?,
        _ => return None,
    };
    match heap.get(mt)? {
        HeapObject::Table(t) => match t.get_str("__gc") {
            handler @ Value::Function(_) => Some(handler),
            _ => None,
        },
        _ => None,
    }
}

/// Owner of a guest state.
///
/// Dropping the `Vm` closes the state: every pending `__gc` finalizer runs and
/// the heap is released. Handles that outlive the `Vm` keep working against an
/// empty state.
pub struct Vm {
    state: State,
}

impl Vm {
    /// Create a guest state with default options.
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a guest state with the given options.
    pub fn with_options(options: VmOptions) -> Self {
        info!(
            target: TARGET_GC,
            gc_threshold = options.gc_threshold,
            max_heap_bytes = options.max_heap_bytes,
            "creating guest state"
        );
        Self {
            state: State::new(options),
        }
    }

    /// Main-thread handle.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Install the collaborator that turns source text or precompiled chunks
    /// into callable functions.
    pub fn set_loader(&self, loader: Rc<dyn ChunkLoader>) {
        *self.state.shared.loader.borrow_mut() = Some(loader);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Vm {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.state.close();
    }
}
