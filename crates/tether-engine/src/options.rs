//! Guest state configuration.

use crate::defaults::{
    DEFAULT_GC_THRESHOLD, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_HEAP_BYTES, DEFAULT_STACK_CAPACITY,
};

/// Options used when creating a [`Vm`](crate::Vm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    /// Allocated bytes that trigger the first automatic collection.
    pub gc_threshold: usize,
    /// Hard heap limit in bytes; allocations past it fail with a memory error (0 = unlimited).
    pub max_heap_bytes: usize,
    /// Maximum nested call frames per thread before "stack overflow" is raised.
    pub max_call_depth: usize,
    /// Initial value-stack capacity per thread.
    pub stack_capacity: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            stack_capacity: DEFAULT_STACK_CAPACITY,
        }
    }
}

impl VmOptions {
    /// Read options from the environment, falling back to defaults.
    ///
    /// Recognized variables: `TETHER_GC_THRESHOLD`, `TETHER_MAX_HEAP`,
    /// `TETHER_MAX_CALL_DEPTH`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(v) = env_usize("TETHER_GC_THRESHOLD") {
            options.gc_threshold = v;
        }
        if let Some(v) = env_usize("TETHER_MAX_HEAP") {
            options.max_heap_bytes = v;
        }
        if let Some(v) = env_usize("TETHER_MAX_CALL_DEPTH") {
            options.max_call_depth = v;
        }
        options
    }

    /// Set the initial collection threshold.
    pub fn with_gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = bytes;
        self
    }

    /// Set the hard heap limit.
    pub fn with_max_heap_bytes(mut self, bytes: usize) -> Self {
        self.max_heap_bytes = bytes;
        self
    }

    /// Set the maximum call depth.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = VmOptions::default();
        assert_eq!(options.gc_threshold, DEFAULT_GC_THRESHOLD);
        assert_eq!(options.max_heap_bytes, 0);
        assert_eq!(options.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn test_builder_setters() {
        let options = VmOptions::default()
            .with_gc_threshold(4096)
            .with_max_heap_bytes(1 << 20)
            .with_max_call_depth(8);
        assert_eq!(options.gc_threshold, 4096);
        assert_eq!(options.max_heap_bytes, 1 << 20);
        assert_eq!(options.max_call_depth, 8);
    }
}
