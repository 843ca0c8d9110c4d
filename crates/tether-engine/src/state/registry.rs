//! Registry: integer handles, named metatables and userdata allocation.

use super::State;
use crate::error::{GuestError, GuestResult};
use crate::gc::{ObjectId, RawBlock};
use crate::object::{HeapObject, UserData};
use crate::table::Table;
use crate::value::{Value, ValueType};
use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::warn;

/// Handle key of an empty reference.
pub const NO_REF: i32 = -2;

/// Handle key of a reference to `nil`.
pub const REF_NIL: i32 = -1;

/// Free-list bookkeeping for integer handles in the registry.
#[derive(Debug, Default)]
pub(crate) struct RefSlots {
    free: Vec<i32>,
    next: i32,
    live: usize,
}

impl State {
    // ========================================================================
    // Handles
    // ========================================================================

    /// Pop the top value and pin it in the registry under a fresh integer key.
    ///
    /// `nil` is not stored; [`REF_NIL`] is returned instead.
    pub fn create_ref(&self) -> i32 {
        let value = self
            .inner()
            .thread_mut(self.thread)
            .stack
            .pop()
            .unwrap_or_default();
        if value.is_nil() {
            return REF_NIL;
        }
        let mut guard = self.inner();
        let inner = &mut *guard;
        let key = match inner.refs.free.pop() {
            Some(key) => key,
            None => {
                inner.refs.next += 1;
                inner.refs.next
            }
        };
        let registry = inner.registry;
        if let Ok(registry) = inner.table_mut(registry) {
            // Integer keys never fail.
            let _ = registry.set(Value::Integer(key as i64), value);
        }
        inner.refs.live += 1;
        key
    }

    /// Release a handle created by [`create_ref`](Self::create_ref).
    ///
    /// Sentinels and already-released keys are ignored.
    pub fn release_ref(&self, key: i32) {
        if key <= 0 {
            return;
        }
        let Ok(mut guard) = self.shared.inner.try_borrow_mut() else {
            warn!(key, "registry busy; handle leaked");
            return;
        };
        let inner = &mut *guard;
        let registry = inner.registry;
        let Ok(table) = inner.table_mut(registry) else {
            return;
        };
        if table.get(&Value::Integer(key as i64)).is_nil() {
            return;
        }
        let _ = table.set(Value::Integer(key as i64), Value::Nil);
        inner.refs.free.push(key);
        inner.refs.live -= 1;
    }

    /// Push the value pinned under `key` (nil for sentinels and released keys).
    pub fn push_ref(&self, key: i32) {
        let value = if key > 0 {
            let inner = self.inner();
            inner
                .table(inner.registry)
                .map(|t| t.get(&Value::Integer(key as i64)))
                .unwrap_or_default()
        } else {
            Value::Nil
        };
        self.push(value);
    }

    /// Number of live handles.
    pub fn ref_count(&self) -> usize {
        self.inner().refs.live
    }

    // ========================================================================
    // Named Metatables
    // ========================================================================

    /// Push the registry table stored under `name`, creating it (with
    /// `__name = name`) if absent. Returns whether it was created.
    pub fn new_metatable(&self, name: &str) -> GuestResult<bool> {
        if self.get_named_metatable(name) == ValueType::Table {
            return Ok(false);
        }
        self.pop(1);
        self.maybe_collect();
        let id = {
            let mut guard = self.inner();
            let inner = &mut *guard;
            let mut table = Table::new();
            let _ = table.set(Value::from("__name"), Value::from(name));
            let id = inner.alloc(HeapObject::Table(table))?;
            let registry = inner.registry;
            inner
                .table_mut(registry)?
                .set(Value::from(name), Value::Table(id))
                .map_err(|e| GuestError::runtime(e.to_string()))?;
            id
        };
        self.push(Value::Table(id));
        Ok(true)
    }

    /// Push the registry value stored under `name` and return its type.
    pub fn get_named_metatable(&self, name: &str) -> ValueType {
        let value = {
            let inner = self.inner();
            inner
                .table(inner.registry)
                .map(|t| t.get_str(name))
                .unwrap_or_default()
        };
        let ty = value.value_type();
        self.push(value);
        ty
    }

    // ========================================================================
    // Userdata
    // ========================================================================

    /// Allocate a zeroed userdata block for `layout` and push it.
    ///
    /// The caller owns the contents: it must drop whatever it writes there
    /// (usually from `__gc`) before the block is released.
    pub fn new_userdata(&self, layout: Layout) -> GuestResult<NonNull<u8>> {
        self.maybe_collect();
        let id = {
            let mut inner = self.inner();
            if !inner
                .heap
                .has_room(layout.size() + std::mem::size_of::<UserData>())
            {
                return Err(GuestError::memory());
            }
            let block = RawBlock::allocate(layout).ok_or_else(GuestError::memory)?;
            inner.try_alloc(HeapObject::UserData(UserData {
                block,
                metatable: None,
                finalized: false,
            }))
        };
        let id = id.map_err(|_| GuestError::memory())?;
        self.push(Value::UserData(id));
        self.to_userdata(-1).ok_or_else(GuestError::memory)
    }

    /// Block address of the userdata at `idx` if its metatable is the
    /// registry table stored under `name`.
    pub fn check_userdata(&self, idx: i32, name: &str) -> Option<NonNull<u8>> {
        let inner = self.inner();
        let Value::UserData(id) = inner.value_at(self.thread, idx)? else {
            return None;
        };
        let expected = match inner.table(inner.registry).ok()?.get_str(name) {
            Value::Table(mt) => mt,
            _ => return None,
        };
        match inner.heap.get(id)? {
            HeapObject::UserData(u) if u.metatable == Some(expected) => Some(u.block.as_ptr()),
            _ => None,
        }
    }

    /// Whether the userdata at `idx` has already been handed to its finalizer.
    pub fn is_finalized(&self, idx: i32) -> bool {
        let inner = self.inner();
        match inner.value_at(self.thread, idx) {
            Some(Value::UserData(id)) => userdata_finalized(&inner.heap, id),
            _ => false,
        }
    }
}

fn userdata_finalized(heap: &crate::gc::Heap, id: ObjectId) -> bool {
    matches!(heap.get(id), Some(HeapObject::UserData(u)) if u.finalized)
}
