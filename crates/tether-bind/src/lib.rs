//! Tether Binding Layer
//!
//! Exposes native Rust types, functions and methods to a `tether-engine`
//! guest state:
//! - **Stack**: typed access to the guest value stack (`stack`, `convert`)
//! - **Objects**: native values embedded in guest memory, dropped by the
//!   guest collector (`object`)
//! - **Marshaling**: Rust signatures turned into guest-callable closures
//!   (`marshal`)
//! - **Registration**: per-type dispatch tables with methods and properties,
//!   and global modules (`register`, `property`)
//! - **References**: guest values pinned beyond the native frame
//!   (`reference`)
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_bind::{Result, Stack, TypeRegister, UserType};
//! use tether_engine::Vm;
//!
//! #[derive(Clone)]
//! struct Point { x: i32 }
//!
//! impl UserType for Point {
//!     fn register(reg: &mut TypeRegister<'_, Self>) -> Result<()> {
//!         reg.register_property_rw("X", |p: &Point| p.x, |p: &mut Point, x: i32| p.x = x)?;
//!         Ok(())
//!     }
//! }
//!
//! let vm = Vm::new();
//! let stack = Stack::new(&vm);
//! stack.push(Point { x: 1 })?;
//! stack.set_global("p")?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

mod convert;
mod error;
pub mod marshal;
mod object;
mod property;
mod reference;
mod register;
mod stack;
mod types;

// ============================================================================
// Public API
// ============================================================================

pub use convert::{FromGuest, IntoReturn, Nil, ToGuest};
pub use error::{Error, Result};
pub use marshal::{GuestFunction, GuestMethod};
pub use reference::Reference;
pub use register::{ModuleRegister, TypeRegister, UserType};
pub use stack::{Stack, StackBalancer};
pub use types::{descriptor, TypeDescriptor};

/// Log target for marshaled calls and object lifetimes
pub(crate) const TARGET_BIND: &str = "tether::bind";
/// Log target for type and module registration
pub(crate) const TARGET_REGISTRY: &str = "tether::registry";
