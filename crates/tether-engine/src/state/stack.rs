//! Stack manipulation and value access.
//!
//! Indices follow the guest convention: `1..=top()` count up from the base of
//! the running frame, `-1` is the top, and pseudo-indices address the
//! registry and the running closure's upvalues.

use super::{State, REGISTRY_INDEX};
use crate::object::HeapObject;
use crate::value::{Value, ValueType};
use std::ptr::NonNull;
use std::rc::Rc;

impl State {
    // ========================================================================
    // Stack Shape
    // ========================================================================

    /// Number of values in the running frame.
    pub fn top(&self) -> i32 {
        let inner = self.inner();
        let t = inner.thread(self.thread);
        (t.stack.len() - t.frame().base) as i32
    }

    /// Set the frame's top, padding with nil or dropping values. Negative
    /// `idx` counts from the current top (`set_top(-2)` pops one value).
    pub fn set_top(&self, idx: i32) {
        let mut inner = self.inner();
        let t = inner.thread_mut(self.thread);
        let base = t.frame().base;
        let len = t.stack.len();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            let drop = (-idx - 1) as usize;
            debug_assert!(drop <= len - base, "set_top below frame base");
            len.saturating_sub(drop).max(base)
        };
        t.stack.resize(new_len, Value::Nil);
    }

    /// Convert a relative index into an absolute one. Pseudo-indices are returned unchanged.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || idx <= REGISTRY_INDEX {
            idx
        } else {
            self.top() + idx + 1
        }
    }

    /// Pop `n` values.
    pub fn pop(&self, n: i32) {
        self.set_top(-n - 1);
    }

    /// Remove the value at `idx`, shifting the values above it down.
    pub fn remove(&self, idx: i32) {
        let mut inner = self.inner();
        if let Some(pos) = inner.stack_pos(self.thread, idx) {
            inner.thread_mut(self.thread).stack.remove(pos);
        }
    }

    /// Move the top value into `idx`, shifting the values above it up.
    pub fn insert(&self, idx: i32) {
        let mut inner = self.inner();
        if let Some(pos) = inner.stack_pos(self.thread, idx) {
            let t = inner.thread_mut(self.thread);
            if let Some(top) = t.stack.pop() {
                t.stack.insert(pos, top);
            }
        }
    }

    /// Pop the top value into `idx`.
    pub fn replace(&self, idx: i32) {
        let mut inner = self.inner();
        let Some(pos) = inner.stack_pos(self.thread, idx) else {
            return;
        };
        let t = inner.thread_mut(self.thread);
        if let Some(top) = t.stack.pop() {
            if pos < t.stack.len() {
                t.stack[pos] = top;
            }
        }
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Push a raw value.
    pub fn push(&self, value: Value) {
        self.inner().thread_mut(self.thread).stack.push(value);
    }

    /// Push `nil`.
    pub fn push_nil(&self) {
        self.push(Value::Nil);
    }

    /// Push a boolean.
    pub fn push_boolean(&self, b: bool) {
        self.push(Value::Boolean(b));
    }

    /// Push an integer.
    pub fn push_integer(&self, i: i64) {
        self.push(Value::Integer(i));
    }

    /// Push a float.
    pub fn push_number(&self, n: f64) {
        self.push(Value::Number(n));
    }

    /// Push a copy of `s`.
    pub fn push_string(&self, s: &str) {
        self.push(Value::String(Rc::from(s)));
    }

    /// Push a raw host address.
    pub fn push_light_userdata(&self, address: usize) {
        self.push(Value::LightUserData(address));
    }

    /// Push a copy of the value at `idx` (nil for an invalid index).
    pub fn push_value(&self, idx: i32) {
        let value = self.value(idx).unwrap_or_default();
        self.push(value);
    }

    /// Push the globals table.
    pub fn push_globals(&self) {
        let globals = self.inner().globals;
        self.push(Value::Table(globals));
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// The value at `idx`, `None` for an invalid index.
    pub fn value(&self, idx: i32) -> Option<Value> {
        self.inner().value_at(self.thread, idx)
    }

    /// Basic type at `idx`.
    pub fn type_of(&self, idx: i32) -> ValueType {
        self.value(idx)
            .map_or(ValueType::None, |v| v.value_type())
    }

    /// Type name at `idx`, preferring a metatable `__name`.
    pub fn type_name_at(&self, idx: i32) -> String {
        let inner = self.inner();
        match inner.value_at(self.thread, idx) {
            Some(v) => inner.display_type(&v),
            None => ValueType::None.name().to_string(),
        }
    }

    /// Whether `idx` is nil or not a valid index.
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), ValueType::None | ValueType::Nil)
    }

    /// Whether the value at `idx` is a number or a numeric string.
    pub fn is_number(&self, idx: i32) -> bool {
        self.to_number(idx).is_some()
    }

    /// Whether the value at `idx` is a string or a number.
    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), ValueType::String | ValueType::Number)
    }

    /// Guest truthiness of the value at `idx`.
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_some_and(|v| v.is_truthy())
    }

    /// Integer conversion, see [`Value::to_integer`].
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.value(idx)?.to_integer()
    }

    /// Float conversion, see [`Value::to_number`].
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx)?.to_number()
    }

    /// String conversion, see [`Value::to_str`].
    pub fn to_str(&self, idx: i32) -> Option<Rc<str>> {
        self.value(idx)?.to_str()
    }

    /// Address of a userdata block (or the address carried by a light userdata).
    ///
    /// The pointer stays valid while the userdata is reachable.
    pub fn to_userdata(&self, idx: i32) -> Option<NonNull<u8>> {
        let inner = self.inner();
        match inner.value_at(self.thread, idx)? {
            Value::UserData(id) => match inner.heap.get(id) {
                Some(HeapObject::UserData(u)) => Some(u.block.as_ptr()),
                _ => None,
            },
            Value::LightUserData(address) => NonNull::new(address as *mut u8),
            _ => None,
        }
    }

    /// Primitive equality of two slots; false if either index is invalid.
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        match (self.value(a), self.value(b)) {
            (Some(x), Some(y)) => x.raw_equal(&y),
            _ => false,
        }
    }

    /// Raw length: bytes of a string, border of a table, block size of a
    /// userdata, 0 otherwise.
    pub fn raw_len(&self, idx: i32) -> usize {
        let inner = self.inner();
        match inner.value_at(self.thread, idx) {
            Some(Value::String(s)) => s.len(),
            Some(Value::Table(id)) => inner.table(id).map_or(0, |t| t.border() as usize),
            Some(Value::UserData(id)) => match inner.heap.get(id) {
                Some(HeapObject::UserData(u)) => u.block.size(),
                _ => 0,
            },
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::Vm;
    use crate::value::ValueType;

    #[test]
    fn test_push_and_index() {
        let vm = Vm::new();
        vm.push_integer(1);
        vm.push_string("two");
        vm.push_boolean(true);
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.type_of(1), ValueType::Number);
        assert_eq!(vm.type_of(-2), ValueType::String);
        assert_eq!(vm.type_of(4), ValueType::None);
        assert_eq!(vm.abs_index(-1), 3);
        assert!(vm.to_boolean(3));
        assert!(!vm.to_boolean(4));
    }

    #[test]
    fn test_insert_remove_replace() {
        let vm = Vm::new();
        for i in 1..=3 {
            vm.push_integer(i);
        }
        vm.insert(1);
        assert_eq!(vm.to_integer(1), Some(3));
        assert_eq!(vm.to_integer(3), Some(2));
        vm.remove(1);
        assert_eq!(vm.to_integer(1), Some(1));
        assert_eq!(vm.top(), 2);
        vm.push_integer(9);
        vm.replace(1);
        assert_eq!(vm.to_integer(1), Some(9));
        assert_eq!(vm.top(), 2);
    }

    #[test]
    fn test_set_top_pads_and_truncates() {
        let vm = Vm::new();
        vm.set_top(3);
        assert_eq!(vm.top(), 3);
        assert!(vm.is_none_or_nil(2));
        vm.pop(2);
        assert_eq!(vm.top(), 1);
        vm.set_top(0);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_string_number_coercion() {
        let vm = Vm::new();
        vm.push_string("12");
        vm.push_number(2.5);
        assert!(vm.is_number(1));
        assert_eq!(vm.to_integer(1), Some(12));
        assert_eq!(vm.to_str(2).as_deref(), Some("2.5"));
        assert_eq!(vm.raw_len(1), 2);
    }
}
