//! Property protocol of bound objects
//!
//! Reading `obj.key` returns the dispatch table's `key` entry if present,
//! otherwise calls its `__get_key` accessor. Writing `obj.key = v` calls
//! `__set_key`; a key without a setter is read-only. Non-string keys never
//! reach an accessor.

use crate::error::{Error, Result};
use crate::stack::Stack;
use std::rc::Rc;
use tether_engine::{upvalue_index, GuestResult, State};

/// Dispatch table prefix of property getters.
pub(crate) const GETTER_PREFIX: &str = "__get_";
/// Dispatch table prefix of property setters.
pub(crate) const SETTER_PREFIX: &str = "__set_";

/// Install `__index`, `__newindex` and `__name` on the dispatch table at
/// `table`. `[-0, +0]`
pub(crate) fn install(stack: &Stack, table: i32, display_name: &str) -> Result<()> {
    let state = stack.state();

    state.push_value(table);
    state.push_named_closure("__index", Rc::new(index), 1)?;
    stack.set_field(table, "__index")?;

    state.push_value(table);
    state.push_named_closure("__newindex", Rc::new(newindex), 1)?;
    stack.set_field(table, "__newindex")?;

    stack.push(display_name)?;
    stack.set_field(table, "__name")?;
    Ok(())
}

/// `(object, key) -> value`, upvalue 1 is the dispatch table.
fn index(state: &State) -> GuestResult<usize> {
    state.push_value(2);
    state.raw_get(upvalue_index(1))?;
    if !state.is_none_or_nil(-1) || !state.is_string(2) {
        return Ok(1);
    }
    state.pop(1);

    state.push_string(GETTER_PREFIX);
    state.push_value(2);
    state.concat(2)?;
    state.raw_get(upvalue_index(1))?;
    if state.is_none_or_nil(-1) {
        return Ok(1);
    }

    // getter, object, key
    state.insert(1);
    state.call(2, 1)?;
    Ok(1)
}

/// `(object, key, value)`, upvalue 1 is the dispatch table.
fn newindex(state: &State) -> GuestResult<usize> {
    if state.is_string(2) {
        state.push_string(SETTER_PREFIX);
        state.push_value(2);
        state.concat(2)?;
        state.raw_get(upvalue_index(1))?;
        if !state.is_none_or_nil(-1) {
            // setter, object, value, key
            state.insert(1);
            state.insert(3);
            state.call(3, 0)?;
            return Ok(0);
        }
    }
    let key = state
        .value(2)
        .map(|v| v.to_display_string())
        .unwrap_or_default();
    Err(Error::PropertyReadOnly(key).into_guest())
}
