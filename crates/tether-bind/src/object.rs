//! Embedded native objects
//!
//! An embedded value lives inside a guest userdata block as a
//! [`BoundObject`]: a header identifying the type, followed by the value in a
//! `RefCell`. The block's metatable is the type's dispatch table, whose
//! `__gc` drops the value exactly once.
//!
//! Access goes through [`Stack::with_object`] and
//! [`Stack::with_object_mut`]. Both check the metatable, the block size and
//! the header token before touching the value, and pin the block in the
//! registry for the duration of the borrow.

use crate::error::{Error, Result};
use crate::marshal::boundary;
use crate::register::UserType;
use crate::stack::Stack;
use crate::types::descriptor;
use crate::TARGET_BIND;
use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use tether_engine::NativeFunction;
use tracing::{trace, warn};

#[repr(C)]
struct ObjectHeader {
    /// Type token; zero in a block that was never initialized.
    token: u64,
    live: Cell<bool>,
}

#[repr(C)]
pub(crate) struct BoundObject<T> {
    header: ObjectHeader,
    value: RefCell<T>,
}

/// Keeps the value at an index reachable while a borrow is outstanding.
struct RegistryPin<'a> {
    stack: &'a Stack,
    key: i32,
}

impl<'a> RegistryPin<'a> {
    fn new(stack: &'a Stack, idx: i32) -> Self {
        stack.push_value(idx);
        let key = stack.state().create_ref();
        Self { stack, key }
    }
}

impl Drop for RegistryPin<'_> {
    fn drop(&mut self) {
        self.stack.state().release_ref(self.key);
    }
}

impl Stack {
    // ========================================================================
    // Embedding
    // ========================================================================

    /// Embed `value` as a new guest object. `[-0, +1]` on success, `[-0, +0]`
    /// on error.
    pub fn new_object<T: UserType>(&self, value: T) -> Result<()> {
        self.new_object_with(|| Ok(value))
    }

    /// Allocate the guest block first, then construct the value in place.
    /// A failing constructor leaves nothing behind.
    pub fn new_object_with<T, F>(&self, ctor: F) -> Result<()>
    where
        T: UserType,
        F: FnOnce() -> Result<T>,
    {
        let desc = descriptor::<T>();
        let check_top = self.top();
        let block = self
            .state()
            .new_userdata(Layout::new::<BoundObject<T>>())?;

        let value = match ctor() {
            Ok(value) => value,
            Err(e) => {
                self.set_top(check_top);
                return Err(e);
            }
        };

        let object = block.cast::<BoundObject<T>>();
        // SAFETY: the block was allocated with the layout of BoundObject<T>
        // and nothing else refers to its contents yet.
        unsafe {
            object.as_ptr().write(BoundObject {
                header: ObjectHeader {
                    token: desc.token(),
                    live: Cell::new(true),
                },
                value: RefCell::new(value),
            });
        }

        let attached = self
            .push_instance_table::<T>()
            .and_then(|()| Ok(self.state().set_metatable(-2)?));
        if let Err(e) = attached {
            // SAFETY: written above and never exposed; without a metatable
            // no finalizer will see it.
            unsafe {
                (*object.as_ptr()).header.live.set(false);
                ptr::drop_in_place(ptr::addr_of_mut!((*object.as_ptr()).value));
            }
            self.set_top(check_top);
            return Err(e);
        }

        trace!(target: TARGET_BIND, type_name = desc.display_name(), "embedded object");
        Ok(())
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Whether the value at `idx` is a live embedded `T`.
    pub fn check_type<T: UserType>(&self, idx: i32) -> bool {
        self.object_ptr::<T>(idx).is_ok()
    }

    /// Borrow the embedded `T` at `idx` immutably.
    pub fn with_object<T, R>(&self, idx: i32, f: impl FnOnce(&T) -> R) -> Result<R>
    where
        T: UserType,
    {
        let object = self.object_ptr::<T>(idx)?;
        let _pin = RegistryPin::new(self, idx);
        // SAFETY: the header was validated and the block is pinned until
        // `_pin` drops, after the borrow below.
        let object = unsafe { object.as_ref() };
        let value = object
            .value
            .try_borrow()
            .map_err(|_| Error::Borrow(descriptor::<T>().display_name().to_string()))?;
        Ok(f(&value))
    }

    /// Borrow the embedded `T` at `idx` mutably.
    pub fn with_object_mut<T, R>(&self, idx: i32, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: UserType,
    {
        let object = self.object_ptr::<T>(idx)?;
        let _pin = RegistryPin::new(self, idx);
        // SAFETY: as in `with_object`.
        let object = unsafe { object.as_ref() };
        let mut value = object
            .value
            .try_borrow_mut()
            .map_err(|_| Error::Borrow(descriptor::<T>().display_name().to_string()))?;
        Ok(f(&mut value))
    }

    fn object_ptr<T: 'static>(&self, idx: i32) -> Result<NonNull<BoundObject<T>>> {
        let desc = descriptor::<T>();
        let mismatch = || Error::type_mismatch(idx, desc.display_name(), self.type_name(idx));

        let block = self
            .state()
            .check_userdata(idx, desc.registry_key())
            .ok_or_else(mismatch)?;
        if self.state().raw_len(idx) < size_of::<BoundObject<T>>()
            || block.as_ptr() as usize % align_of::<BoundObject<T>>() != 0
        {
            return Err(mismatch());
        }

        let object = block.cast::<BoundObject<T>>();
        // SAFETY: the block is large enough and aligned for the header, and
        // blocks start zeroed.
        let header = unsafe { &(*object.as_ptr()).header };
        if header.token != desc.token() {
            return Err(mismatch());
        }
        if !header.live.get() || self.state().is_finalized(idx) {
            return Err(Error::Collected(desc.display_name().to_string()));
        }
        Ok(object)
    }
}

/// `__gc` of a dispatch table: drop the embedded value once.
pub(crate) fn gc_hook<T: 'static>() -> NativeFunction {
    boundary(|stack: &Stack| {
        let desc = descriptor::<T>();
        let Some(block) = stack.state().check_userdata(1, desc.registry_key()) else {
            return Ok(0);
        };
        if stack.state().raw_len(1) < size_of::<BoundObject<T>>() {
            return Ok(0);
        }
        let object = block.cast::<BoundObject<T>>().as_ptr();

        // SAFETY: size checked above; the token check rejects blocks that
        // were never initialized as a BoundObject<T>.
        unsafe {
            let header = &(*object).header;
            if header.token != desc.token() || !header.live.get() {
                return Ok(0);
            }
            if (*object).value.try_borrow_mut().is_err() {
                warn!(
                    target: TARGET_BIND,
                    type_name = desc.display_name(),
                    "finalizing a borrowed object, value leaked"
                );
                header.live.set(false);
                return Ok(0);
            }
            header.live.set(false);
            ptr::drop_in_place(ptr::addr_of_mut!((*object).value));
        }
        trace!(target: TARGET_BIND, type_name = desc.display_name(), "destroyed object");
        Ok(0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use tether_engine::Vm;

    #[derive(Clone)]
    struct Tracked(Rc<Cell<u32>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    impl UserType for Tracked {}

    struct Other;

    impl UserType for Other {}

    #[test]
    fn test_embed_and_borrow() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        let drops = Rc::new(Cell::new(0));
        stack.new_object(Tracked(drops.clone())).unwrap();
        assert!(stack.check_type::<Tracked>(1));
        assert!(!stack.check_type::<Other>(1));
        let count = stack.with_object(1, |t: &Tracked| t.0.get()).unwrap();
        assert_eq!(count, 0);
        assert_eq!(stack.top(), 1);
        assert_eq!(stack.type_name(1), "Tracked");
    }

    #[test]
    fn test_wrong_type_is_a_mismatch() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        stack.new_object(Other).unwrap();
        stack.push(5).unwrap();
        let err = stack.with_object(1, |_: &Tracked| ()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad argument #1 (expected Tracked, got Other)"
        );
        assert!(stack.with_object(2, |_: &Other| ()).is_err());
    }

    #[test]
    fn test_nested_mutable_borrow_fails() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        stack.new_object(Tracked(Rc::new(Cell::new(0)))).unwrap();
        let inner = stack
            .with_object(1, |_: &Tracked| {
                stack.with_object_mut(1, |_: &mut Tracked| ()).unwrap_err()
            })
            .unwrap();
        assert!(matches!(inner, Error::Borrow(_)));
        assert!(stack.with_object_mut(1, |_: &mut Tracked| ()).is_ok());
    }

    #[test]
    fn test_failing_constructor_leaves_nothing() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        let err = stack
            .new_object_with::<Tracked, _>(|| Err(Error::Native("no".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Native(_)));
        assert_eq!(stack.top(), 0);
    }

    #[test]
    fn test_collection_drops_once() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        let drops = Rc::new(Cell::new(0));
        stack.new_object(Tracked(drops.clone())).unwrap();
        stack.pop(1);
        stack.collect_garbage();
        stack.collect_garbage();
        assert_eq!(drops.get(), 1);
    }
}
