//! Native closures, calls, protected calls and chunk loading.

use super::{State, MULTRET};
use crate::defaults::MAX_META_CHAIN;
use crate::error::{GuestError, GuestResult, Status};
use crate::logging::TARGET_CALL;
use crate::object::{Closure, Frame, HeapObject, NativeFunction};
use crate::value::Value;
use std::rc::Rc;
use tracing::trace;

impl State {
    // ========================================================================
    // Closures
    // ========================================================================

    /// Pop `nup` values as upvalues and push a native closure over them.
    pub fn push_native_closure(&self, func: NativeFunction, nup: i32) -> GuestResult<()> {
        self.push_closure(None, func, nup)
    }

    /// Like [`push_native_closure`](Self::push_native_closure); `name` shows
    /// up in tracebacks.
    pub fn push_named_closure(&self, name: &str, func: NativeFunction, nup: i32) -> GuestResult<()> {
        self.push_closure(Some(Rc::from(name)), func, nup)
    }

    /// Push a native function without upvalues.
    pub fn push_native_function(&self, func: NativeFunction) -> GuestResult<()> {
        self.push_closure(None, func, 0)
    }

    fn push_closure(&self, name: Option<Rc<str>>, func: NativeFunction, nup: i32) -> GuestResult<()> {
        // Upvalues are still on the stack here, so they survive this cycle.
        self.maybe_collect();
        let allocated = {
            let mut inner = self.inner();
            let t = inner.thread_mut(self.thread);
            let available = t.stack.len() - t.frame().base;
            let nup = (nup.max(0) as usize).min(available);
            let start = t.stack.len() - nup;
            let upvalues: Vec<Value> = t.stack[start..].to_vec();
            let allocated = inner.try_alloc(HeapObject::Function(Closure {
                func,
                upvalues,
                name,
            }));
            if let Ok(id) = allocated {
                let t = inner.thread_mut(self.thread);
                t.stack.truncate(start);
                t.stack.push(Value::Function(id));
            }
            allocated
        };
        // A rejected closure must drop after the borrow ends.
        allocated.map(|_| ()).map_err(|_| GuestError::memory())
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call the function below the top `nargs` values, leaving `nresults`
    /// results (all of them for [`MULTRET`]) in its place.
    ///
    /// On error the function and its arguments are removed before the error
    /// is returned.
    pub fn call(&self, nargs: i32, nresults: i32) -> GuestResult<()> {
        let func_pos = self.function_slot(nargs)?;
        self.call_at(func_pos, nresults)
    }

    /// Protected call. `msgh` is the stack index of a message handler, or 0.
    ///
    /// On failure the function and arguments are replaced by the error value
    /// (as rewritten by the handler) and its status is returned.
    pub fn pcall(&self, nargs: i32, nresults: i32, msgh: i32) -> Status {
        let handler = if msgh == 0 {
            Value::Nil
        } else {
            self.value(msgh).unwrap_or_default()
        };
        let func_pos = match self.function_slot(nargs) {
            Ok(pos) => pos,
            Err(e) => {
                self.push(e.value().clone());
                return e.status();
            }
        };
        self.inner().handlers.push(handler);
        let result = self.call_at(func_pos, nresults);
        self.inner().handlers.pop();
        match result {
            Ok(()) => Status::Ok,
            Err(e) => {
                trace!(target: TARGET_CALL, status = ?e.status(), "protected call failed");
                let status = e.status();
                self.push(e.value().clone());
                status
            }
        }
    }

    /// Build an error to be returned from a native function.
    pub fn error(&self, message: impl Into<String>) -> GuestError {
        GuestError::runtime(message)
    }

    /// Render the active frames of this thread, innermost first, skipping
    /// the first `level` frames.
    pub fn traceback(&self, message: Option<&str>, level: usize) -> String {
        let mut out = String::new();
        if let Some(message) = message {
            out.push_str(message);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let inner = self.inner();
        let frames = &inner.thread(self.thread).frames;
        for frame in frames.iter().rev().skip(level) {
            let Some(function) = frame.function else {
                continue;
            };
            let name = match inner.heap.get(function) {
                Some(HeapObject::Function(c)) => c.name.clone(),
                _ => None,
            };
            match name {
                Some(name) => out.push_str(&format!("\n\t[native]: in function '{}'", name)),
                None => out.push_str("\n\t[native]: in function <anonymous>"),
            }
        }
        out
    }

    /// Absolute position of the function below the top `nargs` values.
    fn function_slot(&self, nargs: i32) -> GuestResult<usize> {
        let inner = self.inner();
        let t = inner.thread(self.thread);
        let needed = nargs.max(0) as usize + 1;
        if t.stack.len() < t.frame().base + needed {
            return Err(GuestError::runtime("not enough values on the stack for call"));
        }
        Ok(t.stack.len() - needed)
    }

    fn call_at(&self, func_pos: usize, nresults: i32) -> GuestResult<()> {
        let saved_frames = self.inner().thread(self.thread).frames.len();
        let result = self.enter(func_pos, saved_frames);
        match result {
            Ok(n) => {
                let mut inner = self.inner();
                let t = inner.thread_mut(self.thread);
                t.frames.truncate(saved_frames);
                let len = t.stack.len();
                let n = n.min(len.saturating_sub(func_pos + 1));
                t.stack.drain(func_pos..len - n);
                if nresults != MULTRET {
                    t.stack.resize(func_pos + nresults.max(0) as usize, Value::Nil);
                }
                Ok(())
            }
            Err(e) => {
                let e = self.handle_error(e);
                let mut inner = self.inner();
                let t = inner.thread_mut(self.thread);
                t.frames.truncate(saved_frames);
                t.stack.truncate(func_pos);
                Err(e)
            }
        }
    }

    /// Resolve the callee at `func_pos`, push its frame and run it.
    fn enter(&self, func_pos: usize, depth: usize) -> GuestResult<usize> {
        let (id, func) = self.resolve_callee(func_pos)?;
        {
            let mut inner = self.inner();
            if depth > inner.options.max_call_depth {
                return Err(GuestError::runtime("stack overflow"));
            }
            inner.thread_mut(self.thread).frames.push(Frame {
                base: func_pos + 1,
                function: Some(id),
            });
        }
        func(self)
    }

    fn resolve_callee(&self, func_pos: usize) -> GuestResult<(crate::gc::ObjectId, NativeFunction)> {
        for _ in 0..MAX_META_CHAIN {
            let mut inner = self.inner();
            let callee = inner
                .thread(self.thread)
                .stack
                .get(func_pos)
                .cloned()
                .unwrap_or_default();
            if let Value::Function(id) = callee {
                return match inner.heap.get(id) {
                    Some(HeapObject::Function(c)) => Ok((id, c.func.clone())),
                    _ => Err(GuestError::runtime("attempt to call a collected function")),
                };
            }
            let handler = inner.metafield(&callee, "__call");
            if handler.is_nil() {
                return Err(GuestError::runtime(format!(
                    "attempt to call a {} value",
                    inner.display_type(&callee)
                )));
            }
            // The called object becomes the first argument of its `__call`.
            inner.thread_mut(self.thread).stack.insert(func_pos, handler);
        }
        Err(GuestError::runtime("'__call' chain too long; possible loop"))
    }

    /// Run the innermost message handler on an error that has not seen one,
    /// while the failing frames are still in place.
    fn handle_error(&self, mut error: GuestError) -> GuestError {
        if error.handled || error.status() == Status::Memory {
            return error;
        }
        let handler = self.inner().handlers.last().cloned().unwrap_or_default();
        if handler.is_nil() {
            error.handled = true;
            return error;
        }
        // Errors raised by the handler itself are not handled again.
        self.inner().handlers.push(Value::Nil);
        let func_pos = self.inner().thread(self.thread).stack.len();
        self.push(handler);
        self.push(error.value().clone());
        let result = self.call_at(func_pos, 1);
        self.inner().handlers.pop();
        let mut handled = match result {
            Ok(()) => {
                let value = self
                    .inner()
                    .thread_mut(self.thread)
                    .stack
                    .pop()
                    .unwrap_or_default();
                GuestError::with_value(error.status(), value)
            }
            Err(e) => GuestError::with_value(Status::Handler, e.value().clone()),
        };
        handled.handled = true;
        handled
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Turn `bytes` into a callable chunk through the installed
    /// [`ChunkLoader`](crate::ChunkLoader) and push it.
    pub fn load_buffer(&self, bytes: &[u8], chunk_name: &str) -> GuestResult<()> {
        let loader = self.shared.loader.borrow().clone();
        let Some(loader) = loader else {
            return Err(GuestError::syntax(format!(
                "{}: no chunk loader installed",
                chunk_name
            )));
        };
        let func = loader
            .load(self, bytes, chunk_name)
            .map_err(GuestError::syntax)?;
        self.push_named_closure(chunk_name, func, 0)
    }
}
