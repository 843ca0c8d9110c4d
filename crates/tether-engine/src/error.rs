//! Guest-level errors and call status codes.

use crate::value::Value;

/// Result type for guest state operations.
pub type GuestResult<T> = Result<T, GuestError>;

/// Outcome of a protected call or chunk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Completed normally.
    Ok,
    /// A runtime error was raised.
    Runtime,
    /// An allocation failed.
    Memory,
    /// A chunk failed to load.
    Syntax,
    /// The message handler itself failed.
    Handler,
}

impl Status {
    /// Whether this status reports a failure.
    pub fn is_err(self) -> bool {
        self != Status::Ok
    }
}

/// An error raised inside the guest state.
///
/// Carries the raised guest value plus a rendered message. Native functions
/// return it to raise an error; protected calls catch it and push the value.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct GuestError {
    status: Status,
    value: Value,
    message: String,
    /// Set once the active message handler has seen this error.
    pub(crate) handled: bool,
}

impl GuestError {
    /// A runtime error whose value is the message string.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::message(Status::Runtime, message.into())
    }

    /// The allocation failure error.
    pub fn memory() -> Self {
        Self::message(Status::Memory, "not enough memory".to_string())
    }

    /// A chunk load failure.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::message(Status::Syntax, message.into())
    }

    /// An error carrying an arbitrary guest value.
    pub fn with_value(status: Status, value: Value) -> Self {
        let message = match &value {
            Value::String(s) => s.to_string(),
            Value::Integer(_) | Value::Number(_) => value.to_display_string(),
            other => format!("(error object is a {} value)", other.type_name()),
        };
        Self {
            status,
            value,
            message,
            handled: false,
        }
    }

    fn message(status: Status, message: String) -> Self {
        Self {
            status,
            value: Value::String(message.as_str().into()),
            message,
            handled: false,
        }
    }

    /// Status code of this error.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The raised guest value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Rendered message.
    pub fn message_str(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_value_is_message() {
        let err = GuestError::runtime("boom");
        assert_eq!(err.status(), Status::Runtime);
        assert_eq!(err.to_string(), "boom");
        assert!(matches!(err.value(), Value::String(s) if &**s == "boom"));
    }

    #[test]
    fn test_non_string_error_value() {
        let err = GuestError::with_value(Status::Runtime, Value::Boolean(true));
        assert_eq!(err.message_str(), "(error object is a boolean value)");
        assert_eq!(GuestError::memory().status(), Status::Memory);
    }
}
