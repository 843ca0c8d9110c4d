//! Heap object kinds.

use crate::error::GuestResult;
use crate::gc::{ObjectId, RawBlock};
use crate::state::State;
use crate::table::Table;
use crate::value::Value;
use std::fmt;
use std::rc::{Rc, Weak};

/// A native function as seen by the guest runtime.
///
/// Arguments are at slots `1..=top()` of the callee frame; the function
/// returns how many values on top of its stack are results.
pub type NativeFunction = Rc<dyn Fn(&State) -> GuestResult<usize>>;

/// Anything the heap can hold.
pub(crate) enum HeapObject {
    Table(Table),
    Function(Closure),
    UserData(UserData),
    Thread(ThreadData),
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            HeapObject::Table(_) => "Table",
            HeapObject::Function(_) => "Function",
            HeapObject::UserData(_) => "UserData",
            HeapObject::Thread(_) => "Thread",
        };
        f.write_str(kind)
    }
}

impl HeapObject {
    /// Visit every object handle this object keeps alive.
    pub(crate) fn for_each_child(&self, mut visit: impl FnMut(ObjectId)) {
        let mut value = |v: &Value| {
            if let Some(id) = v.object_id() {
                visit(id);
            }
        };
        match self {
            HeapObject::Table(t) => {
                t.values().for_each(&mut value);
                if let Some(mt) = t.metatable {
                    value(&Value::Table(mt));
                }
            }
            HeapObject::Function(c) => c.upvalues.iter().for_each(&mut value),
            HeapObject::UserData(u) => {
                if let Some(mt) = u.metatable {
                    value(&Value::Table(mt));
                }
            }
            HeapObject::Thread(t) => {
                t.stack.iter().for_each(&mut value);
                for frame in &t.frames {
                    if let Some(f) = frame.function {
                        value(&Value::Function(f));
                    }
                }
            }
        }
    }

    pub(crate) fn approx_size(&self) -> usize {
        match self {
            HeapObject::Table(t) => t.approx_size(),
            HeapObject::Function(c) => {
                std::mem::size_of::<Closure>() + c.upvalues.len() * std::mem::size_of::<Value>()
            }
            HeapObject::UserData(u) => std::mem::size_of::<UserData>() + u.block.size(),
            HeapObject::Thread(t) => {
                std::mem::size_of::<ThreadData>()
                    + t.stack.capacity() * std::mem::size_of::<Value>()
            }
        }
    }
}

/// A native closure and its upvalues.
pub(crate) struct Closure {
    pub(crate) func: NativeFunction,
    pub(crate) upvalues: Vec<Value>,
    pub(crate) name: Option<Rc<str>>,
}

/// A raw memory block with an optional metatable.
pub(crate) struct UserData {
    pub(crate) block: RawBlock,
    pub(crate) metatable: Option<ObjectId>,
    /// Set once `__gc` has been scheduled; the block is freed on a later cycle.
    pub(crate) finalized: bool,
}

/// A call frame. `base` is the absolute stack position of slot 1.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pub(crate) base: usize,
    pub(crate) function: Option<ObjectId>,
}

/// Stack and frames of one cooperative thread.
pub(crate) struct ThreadData {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    /// Alive while some host `State` handle points at this thread.
    pub(crate) anchor: Weak<()>,
}

impl ThreadData {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            stack: Vec::with_capacity(capacity),
            frames: vec![Frame {
                base: 0,
                function: None,
            }],
            anchor: Weak::new(),
        }
    }

    /// Frame currently executing (the host frame when no call is active).
    pub(crate) fn frame(&self) -> Frame {
        self.frames.last().copied().unwrap_or(Frame {
            base: 0,
            function: None,
        })
    }
}
