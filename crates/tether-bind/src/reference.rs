//! Guest values that outlive the native frame that produced them

use crate::convert::{FromGuest, ToGuest};
use crate::error::{Error, Result};
use crate::stack::Stack;
use std::fmt;
use tether_engine::{State, NO_REF, REF_NIL};

/// A guest value pinned in its state's registry.
///
/// The handle is released when the `Reference` drops. Cloning pins the value
/// again under a new handle.
pub struct Reference {
    state: Option<State>,
    key: i32,
}

impl Reference {
    /// A reference to nothing; pushes as nil.
    pub fn empty() -> Self {
        Self {
            state: None,
            key: NO_REF,
        }
    }

    /// Pop the top value of `stack` and pin it. `[-1, +0]`
    pub fn capture(stack: &Stack) -> Self {
        let key = stack.state().create_ref();
        Self {
            state: Some(stack.state().main_thread()),
            key,
        }
    }

    /// Move the handle out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::empty())
    }

    /// Whether this reference holds no handle.
    pub fn is_empty(&self) -> bool {
        self.key == NO_REF
    }

    /// Whether this reference captured `nil`.
    pub fn is_nil(&self) -> bool {
        self.key == REF_NIL
    }

    /// Whether this reference holds a handle (possibly to nil).
    pub fn is_valid(&self) -> bool {
        !self.is_empty()
    }

    /// Push the referenced value. `[-0, +1]`
    fn push_into(&self, stack: &Stack) -> Result<()> {
        match &self.state {
            Some(state) if !state.same_state(stack.state()) => Err(Error::ForeignReference),
            _ => {
                stack.state().push_ref(self.key);
                Ok(())
            }
        }
    }
}

impl Default for Reference {
    fn default() -> Self {
        Self::empty()
    }
}

impl Clone for Reference {
    fn clone(&self) -> Self {
        match &self.state {
            Some(state) if self.key > 0 => {
                state.push_ref(self.key);
                Self {
                    state: Some(state.clone()),
                    key: state.create_ref(),
                }
            }
            _ => Self {
                state: self.state.clone(),
                key: self.key,
            },
        }
    }
}

impl Drop for Reference {
    fn drop(&mut self) {
        if self.key <= 0 {
            return;
        }
        if let Some(state) = &self.state {
            if !state.is_closed() {
                state.release_ref(self.key);
            }
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference").field("key", &self.key).finish()
    }
}

impl ToGuest for Reference {
    fn push(self, stack: &Stack) -> Result<()> {
        self.push_into(stack)
    }
}

impl ToGuest for &Reference {
    fn push(self, stack: &Stack) -> Result<()> {
        self.push_into(stack)
    }
}

impl FromGuest for Reference {
    fn read(stack: &Stack, idx: i32) -> Result<Self> {
        stack.push_value(idx);
        Ok(Reference::capture(stack))
    }
}
