//! Logging for the guest runtime and the binding layer.
//!
//! Uses `tracing` for structured logging. Nothing is printed unless the host
//! installs a subscriber, either its own or the one from [`init_logging`].

use once_cell::sync::OnceCell;

pub use tracing::{debug, error, info, trace, warn, Level};

/// Target for collector events.
pub const TARGET_GC: &str = "tether::gc";
/// Target for call and error events.
pub const TARGET_CALL: &str = "tether::call";

static INIT: OnceCell<()> = OnceCell::new();

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level when no directive matches.
    pub level: Level,
    /// Extra `EnvFilter` directives, e.g. `tether::gc=trace`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: if cfg!(debug_assertions) {
                Level::DEBUG
            } else {
                Level::INFO
            },
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Build a configuration from `TETHER_LOG` (level) and
    /// `TETHER_LOG_TARGETS` (comma-separated filter directives).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("TETHER_LOG") {
            if let Ok(level) = level.trim().parse() {
                config.level = level;
            }
        }
        if let Ok(targets) = std::env::var("TETHER_LOG_TARGETS") {
            config.directives = targets
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect();
        }
        config
    }
}

/// Install a global `fmt` subscriber once. Later calls are no-ops, as is a call
/// made after the host installed its own subscriber.
pub fn init_logging(config: LogConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    INIT.get_or_init(|| {
        let mut filter = EnvFilter::new(config.level.to_string().to_ascii_lowercase());
        for directive in &config.directives {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        fmt().with_env_filter(filter).compact().try_init().ok();
    });
}

/// Log the end of a collection cycle.
#[inline]
pub fn log_gc_complete(duration_us: u64, freed: usize, finalized: usize, live_objects: usize) {
    debug!(
        target: TARGET_GC,
        duration_us,
        freed,
        finalized,
        live_objects,
        "garbage collection complete"
    );
}

/// Log a finalizer that raised an error.
#[inline]
pub fn log_finalizer_error(message: &str) {
    warn!(target: TARGET_GC, message, "error in __gc finalizer");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging(LogConfig::default());
        init_logging(LogConfig::from_env());
    }
}
