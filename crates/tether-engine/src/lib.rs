//! Tether Guest Runtime
//!
//! A small embedded runtime with a Lua-style host interface, used as the
//! guest side of the `tether-bind` binding layer:
//! - **Values and tables**: dynamically typed values, insertion-ordered tables
//!   with metatables (`value`, `table` modules)
//! - **State**: value stack, call frames, registry handles, protected calls and
//!   cooperative threads (`state` module)
//! - **GC**: mark-sweep collector with `__gc` finalizers (`gc` module)
//!
//! There is no language front-end; scripts reach the state through a
//! [`ChunkLoader`] supplied by the host.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use tether_engine::Vm;
//!
//! let vm = Vm::new();
//! vm.push_native_function(Rc::new(|st| {
//!     let n = st.to_integer(1).unwrap_or(0);
//!     st.push_integer(n * 2);
//!     Ok(1)
//! }))?;
//! vm.push_integer(21);
//! vm.call(1, 1)?;
//! assert_eq!(vm.to_integer(-1), Some(42));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

pub mod defaults;
pub mod error;
pub mod gc;
pub mod load;
pub mod logging;
pub mod object;
pub mod options;
pub mod state;
pub mod table;
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{GuestError, GuestResult, Status};
pub use gc::{GcStats, ObjectId};
pub use load::ChunkLoader;
pub use logging::{init_logging, LogConfig};
pub use object::NativeFunction;
pub use options::VmOptions;
pub use state::{upvalue_index, State, Vm, MULTRET, NO_REF, REF_NIL, REGISTRY_INDEX};
pub use value::{Value, ValueType};
