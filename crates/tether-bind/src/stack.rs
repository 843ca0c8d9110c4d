//! The value stack
//!
//! [`Stack`] wraps a guest state handle and exposes the operations the
//! binding layer is built from. Every operation states its net stack effect
//! as `[-popped, +pushed]`.

use crate::convert::{FromGuest, ToGuest};
use crate::error::{Error, Result};
use std::rc::Rc;
use tether_engine::{State, Status, ValueType, MULTRET};

/// Typed view of a guest state's value stack.
#[derive(Clone)]
pub struct Stack {
    state: State,
}

impl Stack {
    /// Wrap a state handle. The stack operates on that handle's thread.
    pub fn new(state: &State) -> Self {
        Self {
            state: state.clone(),
        }
    }

    /// The underlying state handle
    pub fn state(&self) -> &State {
        &self.state
    }

    // ========================================================================
    // Stack Shape
    // ========================================================================

    /// Number of values in the current frame. `[-0, +0]`
    pub fn top(&self) -> i32 {
        self.state.top()
    }

    /// Grow (with nil) or shrink the frame to `idx` values. `[-?, +?]`
    pub fn set_top(&self, idx: i32) {
        self.state.set_top(idx)
    }

    /// Convert a relative index to an absolute one. `[-0, +0]`
    pub fn abs_index(&self, idx: i32) -> i32 {
        self.state.abs_index(idx)
    }

    /// `[-n, +0]`
    pub fn pop(&self, n: i32) {
        self.state.pop(n)
    }

    /// `[-1, +0]`
    pub fn remove(&self, idx: i32) {
        self.state.remove(idx)
    }

    /// Move the top value into `idx`. `[-1, +1]`
    pub fn insert(&self, idx: i32) {
        self.state.insert(idx)
    }

    /// Push a copy of the value at `idx`. `[-0, +1]`
    pub fn push_value(&self, idx: i32) {
        self.state.push_value(idx)
    }

    /// `[-0, +0]`
    pub fn type_of(&self, idx: i32) -> ValueType {
        self.state.type_of(idx)
    }

    /// Type name at `idx`, bound objects report their Rust type name. `[-0, +0]`
    pub fn type_name(&self, idx: i32) -> String {
        self.state.type_name_at(idx)
    }

    // ========================================================================
    // Push / Read
    // ========================================================================

    /// Push any convertible value. `[-0, +1]` on success, `[-0, +0]` on error.
    pub fn push<T: ToGuest>(&self, value: T) -> Result<()> {
        value.push(self)
    }

    /// `[-0, +1]`
    pub fn push_nil(&self) {
        self.state.push_nil()
    }

    /// `[-0, +1]`
    pub fn push_light_userdata(&self, address: usize) {
        self.state.push_light_userdata(address)
    }

    /// Convert the value at `idx`. `[-0, +0]`
    pub fn read<T: FromGuest>(&self, idx: i32) -> Result<T> {
        T::read(self, idx)
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// `[-0, +1]`
    pub fn new_table(&self) -> Result<()> {
        Ok(self.state.new_table()?)
    }

    /// Pop a key, push `t[key]` without metamethods. `[-1, +1]`
    pub fn raw_get(&self, idx: i32) -> Result<ValueType> {
        Ok(self.state.raw_get(idx)?)
    }

    /// Pop a value and a key, assign without metamethods. `[-2, +0]`
    pub fn raw_set(&self, idx: i32) -> Result<()> {
        Ok(self.state.raw_set(idx)?)
    }

    /// `[-0, +1]`
    pub fn get_field(&self, idx: i32, name: &str) -> Result<ValueType> {
        Ok(self.state.get_field(idx, name)?)
    }

    /// `[-1, +0]`
    pub fn set_field(&self, idx: i32, name: &str) -> Result<()> {
        Ok(self.state.set_field(idx, name)?)
    }

    /// `[-0, +1]`
    pub fn get_global(&self, name: &str) -> Result<ValueType> {
        Ok(self.state.get_global(name)?)
    }

    /// `[-1, +0]`
    pub fn set_global(&self, name: &str) -> Result<()> {
        Ok(self.state.set_global(name)?)
    }

    /// `[-n, +1]`
    pub fn concat(&self, n: i32) -> Result<()> {
        Ok(self.state.concat(n)?)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Error to return from a raw native function.
    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::Native(message.into())
    }

    /// Unprotected call. `[-(nargs+1), +nrets]`
    pub fn call(&self, nargs: i32, nrets: i32) -> Result<()> {
        Ok(self.state.call(nargs, nrets)?)
    }

    /// Protected call with the message handler at `handler` (0 for none).
    /// `[-(nargs+1), +(nrets|1)]`
    pub fn pcall(&self, nargs: i32, nrets: i32, handler: i32) -> Status {
        self.state.pcall(nargs, nrets, handler)
    }

    /// Protected call that turns a guest failure into [`Error::Runtime`]
    /// carrying the message and a stack traceback.
    ///
    /// `[-(nargs+1), +nrets]` on success, `[-(nargs+1), +0]` on failure.
    pub fn call_and_throw(&self, nargs: i32, nrets: i32) -> Result<()> {
        let func = self.top() - nargs;
        let depth = func - 1;
        if let Err(e) = self
            .state
            .push_named_closure("traceback", Rc::new(traceback_handler), 0)
        {
            self.set_top(depth.max(0));
            return Err(e.into());
        }
        self.insert(func);

        let status = self.pcall(nargs, nrets, func);
        if status.is_err() {
            let message = self
                .state
                .value(-1)
                .map(|v| v.to_display_string())
                .unwrap_or_default();
            self.pop(1);
            self.remove(func);
            debug_assert_eq!(self.top(), depth);
            return Err(match status {
                Status::Memory => Error::OutOfMemory,
                _ => Error::Runtime(message),
            });
        }

        self.remove(func);
        debug_assert!(nrets == MULTRET || self.top() == depth + nrets);
        Ok(())
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Load a chunk through the state's loader. `[-0, +1]`
    pub fn load_buffer(&self, content: &[u8], name: &str) -> Result<()> {
        self.state
            .load_buffer(content, name)
            .map_err(|e| Error::Load(e.message_str().to_string()))
    }

    /// Load a chunk from source text, named after the source itself. `[-0, +1]`
    pub fn load_string(&self, source: &str) -> Result<()> {
        self.load_buffer(source.as_bytes(), source)
    }

    /// Run a full collection cycle. `[-0, +0]`
    pub fn collect_garbage(&self) -> usize {
        self.state.collect_garbage()
    }
}

fn traceback_handler(state: &State) -> tether_engine::GuestResult<usize> {
    let message = state
        .value(1)
        .map(|v| v.to_display_string())
        .unwrap_or_default();
    let trace = state.traceback(Some(&message), 1);
    state.push_string(&trace);
    Ok(1)
}

/// Restores the stack top when dropped.
pub struct StackBalancer<'a> {
    stack: &'a Stack,
    top: i32,
}

impl<'a> StackBalancer<'a> {
    /// Remember the current top of `stack`.
    pub fn new(stack: &'a Stack) -> Self {
        Self {
            stack,
            top: stack.top(),
        }
    }

    /// The top that will be restored
    pub fn top(&self) -> i32 {
        self.top
    }
}

impl Drop for StackBalancer<'_> {
    fn drop(&mut self) {
        self.stack.set_top(self.top);
    }
}
