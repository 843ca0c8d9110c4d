//! Marshaling of native callables
//!
//! Every native entry point the guest can reach is wrapped by `boundary`,
//! which converts returned errors and caught panics into guest errors so
//! that neither unwinds through the engine.
//!
//! Free functions and methods are generic over a marker tuple
//! `(Kind, Ret, (Args..))` which picks the calling convention from the
//! callable's signature; users never name it.

mod callable;
mod function;
mod method;

pub use function::GuestFunction;
pub use method::GuestMethod;

use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::TARGET_BIND;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tether_engine::{NativeFunction, State};
use tracing::{trace, warn};

// ============================================================================
// Calling Convention Markers
// ============================================================================

/// `Fn(A..) -> R`
pub struct Plain;
/// `Fn(&Stack, A..) -> R`
pub struct WithContext;
/// `Fn(&T, A..) -> R`
pub struct Shared;
/// `Fn(&mut T, A..) -> R`
pub struct Exclusive;
/// `Fn(&T, &Stack, A..) -> R`
pub struct SharedWithContext;
/// `Fn(&mut T, &Stack, A..) -> R`
pub struct ExclusiveWithContext;

// ============================================================================
// Error Boundary
// ============================================================================

/// Wrap a stack-level native function into an engine function.
pub(crate) fn boundary<F>(f: F) -> NativeFunction
where
    F: Fn(&Stack) -> Result<usize> + 'static,
{
    Rc::new(move |state: &State| {
        let stack = Stack::new(state);
        match panic::catch_unwind(AssertUnwindSafe(|| f(&stack))) {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => {
                trace!(target: TARGET_BIND, error = %e, "native call failed");
                Err(e.into_guest())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(target: TARGET_BIND, message = %message, "native call panicked");
                Err(Error::Native(message).into_guest())
            }
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl Stack {
    /// Push a marshaled free function. `[-0, +1]`
    pub fn push_function<M, F>(&self, func: F) -> Result<()>
    where
        F: GuestFunction<M>,
    {
        let name = std::any::type_name::<F>();
        self.state()
            .push_named_closure(name, boundary(move |stack| func.invoke(stack)), 0)?;
        Ok(())
    }

    /// Push a function that reads its own arguments and pushes its own
    /// results, returning how many. `[-0, +1]`
    pub fn push_raw_function<F>(&self, func: F) -> Result<()>
    where
        F: Fn(&Stack) -> Result<usize> + 'static,
    {
        let name = std::any::type_name::<F>();
        self.state().push_named_closure(name, boundary(func), 0)?;
        Ok(())
    }

    /// Push a marshaled method of `T`; the receiver is the first argument.
    /// `[-0, +1]`
    pub fn push_method<T, M, F>(&self, method: F) -> Result<()>
    where
        F: GuestMethod<T, M>,
    {
        let name = std::any::type_name::<F>();
        self.state()
            .push_named_closure(name, boundary(move |stack| method.invoke(stack)), 0)?;
        Ok(())
    }
}
