//! Chunk loading seam.
//!
//! The engine has no language front-end. Hosts that run scripts install a
//! [`ChunkLoader`] with [`Vm::set_loader`](crate::Vm::set_loader); it turns
//! source text or a precompiled chunk into a native function that the state
//! pushes as the chunk's entry point.

use crate::object::NativeFunction;
use crate::state::State;

/// Turns chunk bytes into a callable entry point.
pub trait ChunkLoader {
    /// Compile `bytes` (named `chunk_name` in diagnostics).
    ///
    /// An `Err` carries the message of the resulting syntax error.
    fn load(&self, state: &State, bytes: &[u8], chunk_name: &str) -> Result<NativeFunction, String>;
}

impl<F> ChunkLoader for F
where
    F: Fn(&State, &[u8], &str) -> Result<NativeFunction, String>,
{
    fn load(&self, state: &State, bytes: &[u8], chunk_name: &str) -> Result<NativeFunction, String> {
        self(state, bytes, chunk_name)
    }
}
