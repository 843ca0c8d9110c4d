use super::{boundary, GuestFunction};
use crate::error::Result;
use crate::register::UserType;
use crate::stack::Stack;
use std::marker::PhantomData;
use tether_engine::upvalue_index;

/// A function object embedded as a guest object, so the guest collector
/// owns whatever it captured.
struct Callable<F, M> {
    func: F,
    _marker: PhantomData<fn() -> M>,
}

impl<F, M> UserType for Callable<F, M>
where
    F: GuestFunction<M>,
    M: 'static,
{
}

impl Stack {
    /// Push a marshaled function whose captured state is embedded as the
    /// closure's first upvalue. The state is dropped when the guest collects
    /// the closure. `[-0, +1]`
    pub fn push_callable<M, F>(&self, func: F) -> Result<()>
    where
        M: 'static,
        F: GuestFunction<M>,
    {
        self.new_object(Callable {
            func,
            _marker: PhantomData,
        })?;
        let invoke = boundary(|stack: &Stack| {
            stack.with_object(upvalue_index(1), |callable: &Callable<F, M>| {
                callable.func.invoke(stack)
            })?
        });
        if let Err(e) = self
            .state()
            .push_named_closure(std::any::type_name::<F>(), invoke, 1)
        {
            self.pop(1);
            return Err(e.into());
        }
        Ok(())
    }
}
