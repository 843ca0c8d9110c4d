use super::{Exclusive, ExclusiveWithContext, Shared, SharedWithContext};
use crate::convert::{FromGuest, IntoReturn};
use crate::error::Result;
use crate::register::UserType;
use crate::stack::Stack;

/// A Rust method callable from the guest on an embedded `T`.
///
/// Implemented for `Fn(&T, A..) -> R`, `Fn(&mut T, A..) -> R` and their
/// `&Stack`-taking variants `Fn(&T, &Stack, A..) -> R` and
/// `Fn(&mut T, &Stack, A..) -> R`, up to 8 arguments. The receiver is stack
/// slot 1, argument `i` is slot `i + 1`. Arguments are read before the
/// receiver is borrowed and results are pushed after the borrow ends.
pub trait GuestMethod<T, Marker>: 'static {
    /// Check the receiver, read the arguments, run the method, push results.
    fn invoke(&self, stack: &Stack) -> Result<usize>;
}

macro_rules! impl_guest_method {
    ($($arg:ident $var:ident),*) => {
        impl<T, Func, Ret, $($arg,)*> GuestMethod<T, (Shared, Ret, ($($arg,)*))> for Func
        where
            T: UserType,
            Func: Fn(&T, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromGuest,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn invoke(&self, stack: &Stack) -> Result<usize> {
                stack.check_receiver::<T>()?;
                let mut index = 1;
                $(
                    index += 1;
                    let $var = <$arg as FromGuest>::read(stack, index)?;
                )*
                let ret = stack.with_object(1, |this: &T| (self)(this, $($var),*))?;
                ret.push_return(stack)
            }
        }

        impl<T, Func, Ret, $($arg,)*> GuestMethod<T, (Exclusive, Ret, ($($arg,)*))> for Func
        where
            T: UserType,
            Func: Fn(&mut T, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromGuest,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn invoke(&self, stack: &Stack) -> Result<usize> {
                stack.check_receiver::<T>()?;
                let mut index = 1;
                $(
                    index += 1;
                    let $var = <$arg as FromGuest>::read(stack, index)?;
                )*
                let ret = stack.with_object_mut(1, |this: &mut T| (self)(this, $($var),*))?;
                ret.push_return(stack)
            }
        }

        impl<T, Func, Ret, $($arg,)*> GuestMethod<T, (SharedWithContext, Ret, ($($arg,)*))> for Func
        where
            T: UserType,
            Func: Fn(&T, &Stack, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromGuest,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn invoke(&self, stack: &Stack) -> Result<usize> {
                stack.check_receiver::<T>()?;
                let mut index = 1;
                $(
                    index += 1;
                    let $var = <$arg as FromGuest>::read(stack, index)?;
                )*
                let ret = stack.with_object(1, |this: &T| (self)(this, stack, $($var),*))?;
                ret.push_return(stack)
            }
        }

        impl<T, Func, Ret, $($arg,)*> GuestMethod<T, (ExclusiveWithContext, Ret, ($($arg,)*))> for Func
        where
            T: UserType,
            Func: Fn(&mut T, &Stack, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromGuest,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn invoke(&self, stack: &Stack) -> Result<usize> {
                stack.check_receiver::<T>()?;
                let mut index = 1;
                $(
                    index += 1;
                    let $var = <$arg as FromGuest>::read(stack, index)?;
                )*
                let ret = stack.with_object_mut(1, |this: &mut T| (self)(this, stack, $($var),*))?;
                ret.push_return(stack)
            }
        }
    };
}

impl_guest_method!();
impl_guest_method!(A1 a1);
impl_guest_method!(A1 a1, A2 a2);
impl_guest_method!(A1 a1, A2 a2, A3 a3);
impl_guest_method!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_guest_method!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_guest_method!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_guest_method!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_guest_method!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

impl Stack {
    /// Fail with a mismatch on slot 1 unless it holds a live `T`.
    fn check_receiver<T: UserType>(&self) -> Result<()> {
        self.with_object(1, |_: &T| ())
    }
}
