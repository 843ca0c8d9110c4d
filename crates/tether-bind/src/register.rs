//! Type and module registration
//!
//! A bound type owns one dispatch table per state, stored in the registry
//! under its [`TypeDescriptor`](crate::TypeDescriptor) key. The table is the
//! metatable of every embedded instance and carries the property protocol
//! (`__index`, `__newindex`), the destructor hook (`__gc`), and the type's
//! methods and `__get_*`/`__set_*` accessors.

use crate::convert::ToGuest;
use crate::error::{Error, Result};
use crate::marshal::{GuestFunction, GuestMethod};
use crate::object::gc_hook;
use crate::property::{self, GETTER_PREFIX, SETTER_PREFIX};
use crate::stack::Stack;
use crate::types::{descriptor, TypeDescriptor};
use crate::TARGET_REGISTRY;
use std::marker::PhantomData;
use tether_engine::{ValueType, REGISTRY_INDEX};
use tracing::{debug, trace, warn};

/// A Rust type that can be embedded in a guest state.
///
/// ```ignore
/// struct Point { x: i32 }
///
/// impl UserType for Point {
///     fn register(reg: &mut TypeRegister<'_, Self>) -> Result<()> {
///         reg.register_property_rw("X", |p: &Point| p.x, |p: &mut Point, x: i32| p.x = x)?;
///         Ok(())
///     }
/// }
/// ```
pub trait UserType: Sized + 'static {
    /// Whether embedding an instance registers the type on demand. When
    /// `false`, [`Stack::register_type`] must run first or embedding fails
    /// with [`Error::NotRegistered`].
    const AUTO_REGISTER: bool = true;

    /// Populate the dispatch table. Runs once per state, when the table is
    /// created.
    fn register(reg: &mut TypeRegister<'_, Self>) -> Result<()> {
        let _ = reg;
        Ok(())
    }
}

// ============================================================================
// Type Registration
// ============================================================================

/// Builder over a type's dispatch table, which sits on the stack at
/// [`index`](Self::index) while the register is alive.
pub struct TypeRegister<'a, T> {
    stack: &'a Stack,
    index: i32,
    check_top: i32,
    owns_table: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: UserType> TypeRegister<'a, T> {
    /// Stack index of the dispatch table
    pub fn index(&self) -> i32 {
        self.index
    }

    /// The stack the table lives on
    pub fn stack(&self) -> &'a Stack {
        self.stack
    }

    /// Add a method. The receiver is argument 1 of the guest call.
    pub fn register_method<M, F>(&mut self, name: &str, method: F) -> Result<&mut Self>
    where
        F: GuestMethod<T, M>,
    {
        self.stack.push_method::<T, M, F>(method)?;
        self.set_entry(name)
    }

    /// Add a method that manages the stack itself.
    pub fn register_raw_method<F>(&mut self, name: &str, method: F) -> Result<&mut Self>
    where
        F: Fn(&Stack) -> Result<usize> + 'static,
    {
        self.stack.push_raw_function(method)?;
        self.set_entry(name)
    }

    /// Add a read-only property. Assigning it raises
    /// [`Error::PropertyReadOnly`].
    pub fn register_property<MG, G>(&mut self, name: &str, getter: G) -> Result<&mut Self>
    where
        G: GuestMethod<T, MG>,
    {
        self.stack.push_method::<T, MG, G>(getter)?;
        self.set_entry(&format!("{}{}", GETTER_PREFIX, name))
    }

    /// Add a read-write property.
    pub fn register_property_rw<MG, MS, G, S>(
        &mut self,
        name: &str,
        getter: G,
        setter: S,
    ) -> Result<&mut Self>
    where
        G: GuestMethod<T, MG>,
        S: GuestMethod<T, MS>,
    {
        self.register_property(name, getter)?;
        self.stack.push_method::<T, MS, S>(setter)?;
        self.set_entry(&format!("{}{}", SETTER_PREFIX, name))
    }

    /// Pop the value on top into `table[name]`.
    fn set_entry(&mut self, name: &str) -> Result<&mut Self> {
        self.stack.set_field(self.index, name)?;
        trace!(
            target: TARGET_REGISTRY,
            type_name = descriptor::<T>().display_name(),
            entry = name,
            "registered entry"
        );
        Ok(self)
    }
}

impl<T> Drop for TypeRegister<'_, T> {
    fn drop(&mut self) {
        if self.owns_table {
            self.stack.remove(self.index);
        }
        debug_assert_eq!(self.stack.top(), self.check_top);
    }
}

impl Stack {
    /// Register `T` in this state and return a builder over its dispatch
    /// table. Registering twice reuses the existing table; `T::register`
    /// only runs the first time.
    pub fn register_type<T: UserType>(&self) -> Result<TypeRegister<'_, T>> {
        let check_top = self.top();
        self.push_type_table::<T>()?;
        Ok(TypeRegister {
            stack: self,
            index: self.top(),
            check_top,
            owns_table: true,
            _marker: PhantomData,
        })
    }

    /// Whether `T` has a dispatch table in this state.
    pub fn is_registered<T: UserType>(&self) -> bool {
        let ty = self
            .state()
            .get_named_metatable(descriptor::<T>().registry_key());
        self.pop(1);
        ty == ValueType::Table
    }

    /// Push the dispatch table of `T`, building it if this state has none.
    /// `[-0, +1]` on success, `[-0, +0]` on error.
    pub(crate) fn push_type_table<T: UserType>(&self) -> Result<()> {
        let desc = descriptor::<T>();
        let check_top = self.top();
        if !self.state().new_metatable(desc.registry_key())? {
            return Ok(());
        }
        if let Err(e) = self.init_type_table::<T>(desc) {
            self.set_top(check_top);
            // Forget the partial table so the next attempt starts over.
            self.push_nil();
            if let Err(cleanup) = self.state().set_field(REGISTRY_INDEX, desc.registry_key()) {
                warn!(
                    target: TARGET_REGISTRY,
                    type_name = desc.display_name(),
                    error = %cleanup,
                    "failed to forget partial dispatch table"
                );
            }
            return Err(e);
        }
        debug!(
            target: TARGET_REGISTRY,
            type_name = desc.display_name(),
            token = desc.token(),
            "registered user type"
        );
        Ok(())
    }

    /// Push the dispatch table of `T` for embedding an instance.
    pub(crate) fn push_instance_table<T: UserType>(&self) -> Result<()> {
        if T::AUTO_REGISTER {
            return self.push_type_table::<T>();
        }
        let desc = descriptor::<T>();
        if self.state().get_named_metatable(desc.registry_key()) != ValueType::Table {
            self.pop(1);
            return Err(Error::NotRegistered(desc.display_name().to_string()));
        }
        Ok(())
    }

    fn init_type_table<T: UserType>(&self, desc: &TypeDescriptor) -> Result<()> {
        let index = self.top();
        property::install(self, index, desc.display_name())?;

        self.state()
            .push_named_closure("__gc", gc_hook::<T>(), 0)?;
        self.set_field(index, "__gc")?;

        if T::AUTO_REGISTER {
            let mut reg = TypeRegister::<T> {
                stack: self,
                index,
                check_top: index,
                owns_table: false,
                _marker: PhantomData,
            };
            T::register(&mut reg)?;
        }
        Ok(())
    }
}

// ============================================================================
// Module Registration
// ============================================================================

/// Builder over a global table of free functions and values.
pub struct ModuleRegister<'a> {
    stack: &'a Stack,
    index: i32,
    check_top: i32,
}

impl<'a> ModuleRegister<'a> {
    /// Stack index of the module table
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Set `module[name] = value`.
    pub fn register_value<V: ToGuest>(&mut self, name: &str, value: V) -> Result<&mut Self> {
        self.stack.push(value)?;
        self.set_entry(name)
    }

    /// Add a marshaled free function.
    pub fn register_method<M, F>(&mut self, name: &str, func: F) -> Result<&mut Self>
    where
        F: GuestFunction<M>,
    {
        self.stack.push_function(func)?;
        self.set_entry(name)
    }

    /// Add a function whose state lives in an embedded object.
    pub fn register_callable<M, F>(&mut self, name: &str, func: F) -> Result<&mut Self>
    where
        M: 'static,
        F: GuestFunction<M>,
    {
        self.stack.push_callable(func)?;
        self.set_entry(name)
    }

    /// Add a function that manages the stack itself.
    pub fn register_raw_method<F>(&mut self, name: &str, func: F) -> Result<&mut Self>
    where
        F: Fn(&Stack) -> Result<usize> + 'static,
    {
        self.stack.push_raw_function(func)?;
        self.set_entry(name)
    }

    fn set_entry(&mut self, name: &str) -> Result<&mut Self> {
        self.stack.set_field(self.index, name)?;
        Ok(self)
    }
}

impl Drop for ModuleRegister<'_> {
    fn drop(&mut self) {
        self.stack.remove(self.index);
        debug_assert_eq!(self.stack.top(), self.check_top);
    }
}

impl Stack {
    /// Create a new table, bind it to the global `name`, and return a
    /// builder over it. An existing global of that name is replaced.
    pub fn register_module(&self, name: &str) -> Result<ModuleRegister<'_>> {
        let check_top = self.top();
        self.new_table()?;
        self.push_value(-1);
        if let Err(e) = self.set_global(name) {
            self.set_top(check_top);
            return Err(e);
        }
        debug!(target: TARGET_REGISTRY, module = name, "registered module");
        Ok(ModuleRegister {
            stack: self,
            index: self.top(),
            check_top,
        })
    }
}
