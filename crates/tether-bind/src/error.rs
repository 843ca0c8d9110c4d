//! Error types for the binding layer

use tether_engine::{GuestError, Status};

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Binding error types
///
/// Inside a marshaled closure every variant is raised as a guest error whose
/// message is the variant's `Display`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A stack slot does not hold the expected type
    #[error("bad argument #{index} (expected {expected}, got {got})")]
    TypeMismatch {
        /// Stack index of the offending value
        index: i32,
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// A type without self-registration was used before its table was registered
    #[error("User type is not registered: {0}")]
    NotRegistered(String),

    /// Write to a property without a setter
    #[error("Property '{0}' cannot be set")]
    PropertyReadOnly(String),

    /// Error returned or panic raised by a marshaled native callable
    #[error("{0}")]
    Native(String),

    /// Protected call failure, carrying the guest traceback
    #[error("{0}")]
    Runtime(String),

    /// Guest allocation failure
    #[error("not enough memory")]
    OutOfMemory,

    /// Chunk loader failure
    #[error("{0}")]
    Load(String),

    /// Conflicting access to a bound object already borrowed
    #[error("{0} object is already borrowed")]
    Borrow(String),

    /// Access to a bound object whose value has already been destroyed
    #[error("attempt to use a destroyed {0} object")]
    Collected(String),

    /// A reference pushed into a guest state other than its own
    #[error("reference belongs to a different guest state")]
    ForeignReference,

    /// Raw guest runtime error
    #[error(transparent)]
    Guest(GuestError),
}

impl Error {
    /// Build a type mismatch for the slot at `index`.
    pub fn type_mismatch(index: i32, expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeMismatch {
            index,
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Convert into the error raised inside the guest state.
    pub fn into_guest(self) -> GuestError {
        match self {
            Error::Guest(e) => e,
            Error::OutOfMemory => GuestError::memory(),
            other => GuestError::runtime(other.to_string()),
        }
    }
}

impl From<GuestError> for Error {
    fn from(e: GuestError) -> Self {
        match e.status() {
            Status::Memory => Error::OutOfMemory,
            _ => Error::Guest(e),
        }
    }
}

impl From<Error> for GuestError {
    fn from(e: Error) -> Self {
        e.into_guest()
    }
}
