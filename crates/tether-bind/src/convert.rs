//! Conversions between Rust values and guest stack slots.
//!
//! [`ToGuest`] pushes exactly one slot. [`FromGuest`] reads one slot without
//! popping it. Bound native types convert through the blanket impls over
//! [`UserType`](crate::UserType): pushing embeds the value as a new object,
//! reading returns a clone of the embedded value.

use crate::error::{Error, Result};
use crate::register::UserType;
use crate::stack::Stack;
use std::fmt::Display;
use tether_engine::Value;

/// Push a Rust value as one guest value.
pub trait ToGuest {
    /// Push `self`. `[-0, +1]` on success, `[-0, +0]` on error.
    fn push(self, stack: &Stack) -> Result<()>;
}

/// Read a Rust value from a guest stack slot.
pub trait FromGuest: Sized {
    /// Convert the value at `idx`. `[-0, +0]`
    fn read(stack: &Stack, idx: i32) -> Result<Self>;
}

/// Result of a marshaled callable.
///
/// `()` produces no results, any [`ToGuest`] value produces one, and an
/// `Err` of a `Result` becomes [`Error::Native`].
pub trait IntoReturn {
    /// Push the results and report how many there are.
    fn push_return(self, stack: &Stack) -> Result<usize>;
}

/// The guest `nil`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nil;

// ============================================================================
// Booleans, Numbers, Strings
// ============================================================================

impl ToGuest for bool {
    fn push(self, stack: &Stack) -> Result<()> {
        stack.state().push_boolean(self);
        Ok(())
    }
}

impl FromGuest for bool {
    /// Booleans as-is; numbers and numeric strings are true when their
    /// integer part is nonzero.
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        match stack.state().value(idx) {
            Some(Value::Boolean(b)) => Ok(b),
            Some(v) => match v.to_number() {
                Some(n) => Ok(n as i64 != 0),
                None => Err(Error::type_mismatch(idx, "boolean", stack.type_name(idx))),
            },
            None => Err(Error::type_mismatch(idx, "boolean", stack.type_name(idx))),
        }
    }
}

fn read_integer(stack: &Stack, idx: i32) -> Result<i64> {
    let Some(value) = stack.state().value(idx) else {
        return Err(Error::type_mismatch(idx, "number", stack.type_name(idx)));
    };
    match value.to_integer() {
        Some(i) => Ok(i),
        None if value.to_number().is_some() => Err(Error::type_mismatch(
            idx,
            "integer",
            value.to_display_string(),
        )),
        None => Err(Error::type_mismatch(idx, "number", stack.type_name(idx))),
    }
}

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl ToGuest for $ty {
                fn push(self, stack: &Stack) -> Result<()> {
                    stack.state().push_integer(i64::from(self));
                    Ok(())
                }
            }

            impl FromGuest for $ty {
                fn read(stack: &Stack, idx: i32) -> Result<Self> {
                    let i = read_integer(stack, idx)?;
                    <$ty>::try_from(i)
                        .map_err(|_| Error::type_mismatch(idx, stringify!($ty), i.to_string()))
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, u8, u16, u32);

impl ToGuest for f64 {
    fn push(self, stack: &Stack) -> Result<()> {
        stack.state().push_number(self);
        Ok(())
    }
}

impl FromGuest for f64 {
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        stack
            .state()
            .to_number(idx)
            .ok_or_else(|| Error::type_mismatch(idx, "number", stack.type_name(idx)))
    }
}

impl ToGuest for f32 {
    fn push(self, stack: &Stack) -> Result<()> {
        f64::from(self).push(stack)
    }
}

impl FromGuest for f32 {
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        f64::read(stack, idx).map(|n| n as f32)
    }
}

impl ToGuest for &str {
    fn push(self, stack: &Stack) -> Result<()> {
        stack.state().push_string(self);
        Ok(())
    }
}

impl ToGuest for String {
    fn push(self, stack: &Stack) -> Result<()> {
        stack.state().push(Value::from(self));
        Ok(())
    }
}

impl ToGuest for &String {
    fn push(self, stack: &Stack) -> Result<()> {
        self.as_str().push(stack)
    }
}

impl FromGuest for String {
    /// Owned copy; numbers convert to their string form.
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        stack
            .state()
            .to_str(idx)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::type_mismatch(idx, "string", stack.type_name(idx)))
    }
}

// ============================================================================
// Nil, Option, Raw Values
// ============================================================================

impl ToGuest for Nil {
    fn push(self, stack: &Stack) -> Result<()> {
        stack.push_nil();
        Ok(())
    }
}

impl FromGuest for Nil {
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        if stack.state().is_none_or_nil(idx) {
            Ok(Nil)
        } else {
            Err(Error::type_mismatch(idx, "nil", stack.type_name(idx)))
        }
    }
}

impl<T: ToGuest> ToGuest for Option<T> {
    fn push(self, stack: &Stack) -> Result<()> {
        match self {
            Some(v) => v.push(stack),
            None => Nil.push(stack),
        }
    }
}

impl<T: FromGuest> FromGuest for Option<T> {
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        if stack.state().is_none_or_nil(idx) {
            Ok(None)
        } else {
            T::read(stack, idx).map(Some)
        }
    }
}

impl ToGuest for Value {
    fn push(self, stack: &Stack) -> Result<()> {
        stack.state().push(self);
        Ok(())
    }
}

impl FromGuest for Value {
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        Ok(stack.state().value(idx).unwrap_or_default())
    }
}

// ============================================================================
// Bound Objects
// ============================================================================

impl<T: UserType> ToGuest for T {
    fn push(self, stack: &Stack) -> Result<()> {
        stack.new_object(self)
    }
}

impl<T: UserType + Clone> FromGuest for T {
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        stack.with_object(idx, |value: &T| value.clone())
    }
}

// ============================================================================
// Return Values
// ============================================================================

impl IntoReturn for () {
    fn push_return(self, _stack: &Stack) -> Result<usize> {
        Ok(0)
    }
}

impl<T: ToGuest> IntoReturn for T {
    fn push_return(self, stack: &Stack) -> Result<usize> {
        stack.push(self)?;
        Ok(1)
    }
}

impl<T: IntoReturn, E: Display> IntoReturn for std::result::Result<T, E> {
    fn push_return(self, stack: &Stack) -> Result<usize> {
        match self {
            Ok(value) => value.push_return(stack),
            Err(e) => Err(Error::Native(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_engine::Vm;

    #[test]
    fn test_primitives_round_trip() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        stack.push(-7i8).unwrap();
        stack.push(40_000u32).unwrap();
        stack.push(1.5f32).unwrap();
        stack.push("text").unwrap();
        stack.push(true).unwrap();
        assert_eq!(stack.read::<i8>(1).unwrap(), -7);
        assert_eq!(stack.read::<u32>(2).unwrap(), 40_000);
        assert_eq!(stack.read::<f32>(3).unwrap(), 1.5);
        assert_eq!(stack.read::<String>(4).unwrap(), "text");
        assert!(stack.read::<bool>(5).unwrap());
    }

    #[test]
    fn test_numeric_coercions() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        stack.push("42").unwrap();
        stack.push(3.0).unwrap();
        stack.push(0).unwrap();
        assert_eq!(stack.read::<i32>(1).unwrap(), 42);
        assert_eq!(stack.read::<i64>(2).unwrap(), 3);
        assert_eq!(stack.read::<String>(2).unwrap(), "3.0");
        assert!(!stack.read::<bool>(3).unwrap());
        assert!(stack.read::<bool>(1).unwrap());

        stack.push(0.5).unwrap();
        stack.push(-1.5).unwrap();
        stack.push("0.9").unwrap();
        assert!(!stack.read::<bool>(4).unwrap());
        assert!(stack.read::<bool>(5).unwrap());
        assert!(!stack.read::<bool>(6).unwrap());
    }

    #[test]
    fn test_integer_errors() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        stack.push(2.5).unwrap();
        stack.push(300).unwrap();
        stack.push("abc").unwrap();
        assert_eq!(
            stack.read::<i32>(1).unwrap_err().to_string(),
            "bad argument #1 (expected integer, got 2.5)"
        );
        assert_eq!(
            stack.read::<u8>(2).unwrap_err().to_string(),
            "bad argument #2 (expected u8, got 300)"
        );
        assert_eq!(
            stack.read::<i32>(3).unwrap_err().to_string(),
            "bad argument #3 (expected number, got string)"
        );
        assert_eq!(
            stack.read::<i32>(9).unwrap_err().to_string(),
            "bad argument #9 (expected number, got no value)"
        );
    }

    #[test]
    fn test_option_and_nil() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        stack.push(None::<i32>).unwrap();
        stack.push(Some(5)).unwrap();
        assert_eq!(stack.read::<Option<i32>>(1).unwrap(), None);
        assert_eq!(stack.read::<Option<i32>>(2).unwrap(), Some(5));
        assert_eq!(stack.read::<Option<i32>>(3).unwrap(), None);
        assert_eq!(stack.read::<Nil>(1).unwrap(), Nil);
        assert!(stack.read::<Nil>(2).is_err());
        assert!(stack.read::<bool>(1).is_err());
    }

    #[test]
    fn test_result_return_maps_error() {
        let vm = Vm::new();
        let stack = Stack::new(&vm);
        let ok: std::result::Result<i32, String> = Ok(1);
        assert_eq!(ok.push_return(&stack).unwrap(), 1);
        let err: std::result::Result<i32, String> = Err("nope".into());
        assert!(matches!(err.push_return(&stack), Err(Error::Native(m)) if m == "nope"));
        assert_eq!(().push_return(&stack).unwrap(), 0);
        assert_eq!(stack.top(), 1);
    }
}
