//! Default constants for guest state configuration.
//!
//! Centralizes the numbers shared by `VmOptions`, the collector and the call
//! machinery.

/// Default initial GC threshold in bytes (1 MB).
pub const DEFAULT_GC_THRESHOLD: usize = 1024 * 1024;

/// Default maximum heap size in bytes (0 = unlimited).
pub const DEFAULT_MAX_HEAP_BYTES: usize = 0;

/// Default maximum number of nested native call frames per thread.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Initial capacity reserved for each thread's value stack.
pub const DEFAULT_STACK_CAPACITY: usize = 64;

/// Maximum length of an `__index` / `__newindex` chain before it is treated as a loop.
pub const MAX_META_CHAIN: usize = 100;
