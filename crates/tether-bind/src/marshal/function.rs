use super::{Plain, WithContext};
use crate::convert::{FromGuest, IntoReturn};
use crate::error::Result;
use crate::stack::Stack;

/// A Rust function callable from the guest.
///
/// Implemented for every `Fn(A1, .., An) -> R` and `Fn(&Stack, A1, .., An)
/// -> R` with `n <= 8`, where each argument is [`FromGuest`] and the result
/// is [`IntoReturn`]. Argument `i` is read from stack slot `i`.
pub trait GuestFunction<Marker>: 'static {
    /// Read the arguments, run the function, push its results.
    fn invoke(&self, stack: &Stack) -> Result<usize>;
}

macro_rules! impl_guest_function {
    ($($arg:ident $var:ident),*) => {
        impl<Func, Ret, $($arg,)*> GuestFunction<(Plain, Ret, ($($arg,)*))> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromGuest,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn invoke(&self, stack: &Stack) -> Result<usize> {
                let mut index = 0;
                $(
                    index += 1;
                    let $var = <$arg as FromGuest>::read(stack, index)?;
                )*
                (self)($($var),*).push_return(stack)
            }
        }

        impl<Func, Ret, $($arg,)*> GuestFunction<(WithContext, Ret, ($($arg,)*))> for Func
        where
            Func: Fn(&Stack, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromGuest,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn invoke(&self, stack: &Stack) -> Result<usize> {
                let mut index = 0;
                $(
                    index += 1;
                    let $var = <$arg as FromGuest>::read(stack, index)?;
                )*
                (self)(stack, $($var),*).push_return(stack)
            }
        }
    };
}

impl_guest_function!();
impl_guest_function!(A1 a1);
impl_guest_function!(A1 a1, A2 a2);
impl_guest_function!(A1 a1, A2 a2, A3 a3);
impl_guest_function!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_guest_function!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_guest_function!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_guest_function!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_guest_function!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);
