//! Type identity for bound native types
//!
//! Every Rust type that crosses into a guest state gets one interned
//! [`TypeDescriptor`]. The descriptor's token is process-wide and stable, so
//! it can key the per-state dispatch table in each state's registry.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::TypeId;

/// Identity of one native type.
#[derive(Debug)]
pub struct TypeDescriptor {
    token: u64,
    rust_name: &'static str,
    display_name: &'static str,
    registry_key: String,
}

impl TypeDescriptor {
    fn new(token: u64, rust_name: &'static str) -> Self {
        Self {
            token,
            rust_name,
            display_name: short_name(rust_name),
            registry_key: format!("__type_{}_{}", rust_name, token),
        }
    }

    /// Unique token, stable for the process lifetime
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Full Rust type name
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    /// Last path segment of the Rust name, used in guest-facing messages
    pub fn display_name(&self) -> &'static str {
        self.display_name
    }

    /// Registry key of the type's dispatch table
    pub fn registry_key(&self) -> &str {
        &self.registry_key
    }
}

static DESCRIPTORS: Lazy<RwLock<FxHashMap<TypeId, &'static TypeDescriptor>>> =
    Lazy::new(|| RwLock::new(FxHashMap::default()));

/// Descriptor of `T`, interned on first use.
pub fn descriptor<T: 'static>() -> &'static TypeDescriptor {
    let id = TypeId::of::<T>();
    if let Some(desc) = DESCRIPTORS.read().get(&id) {
        return *desc;
    }
    let mut map = DESCRIPTORS.write();
    let token = map.len() as u64 + 1;
    *map.entry(id).or_insert_with(|| {
        Box::leak(Box::new(TypeDescriptor::new(
            token,
            std::any::type_name::<T>(),
        )))
    })
}

/// `alloc::vec::Vec<i32>` -> `Vec`, `my_crate::geom::Point` -> `Point`
fn short_name(rust_name: &'static str) -> &'static str {
    let base = rust_name.split('<').next().unwrap_or(rust_name);
    base.rsplit("::").next().unwrap_or(base)
}
