//! Guest values.

use crate::gc::ObjectId;
use std::fmt;
use std::rc::Rc;

/// Basic type of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// The index does not refer to a valid slot.
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// A raw host address carried as a value.
    LightUserData,
    /// Integer or float.
    Number,
    /// Immutable string.
    String,
    /// Table.
    Table,
    /// Native closure.
    Function,
    /// Collector-owned memory block.
    UserData,
    /// Cooperative thread.
    Thread,
}

impl ValueType {
    /// Guest-visible type name.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::None => "no value",
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::LightUserData | ValueType::UserData => "userdata",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Function => "function",
            ValueType::Thread => "thread",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A guest value.
///
/// Heap values are handles into the state's heap; cloning a `Value` never
/// copies the object. Strings are immutable and shared.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// `nil`
    #[default]
    Nil,
    /// Boolean.
    Boolean(bool),
    /// Integer number.
    Integer(i64),
    /// Float number.
    Number(f64),
    /// Immutable string.
    String(Rc<str>),
    /// Table handle.
    Table(ObjectId),
    /// Native closure handle.
    Function(ObjectId),
    /// Userdata handle.
    UserData(ObjectId),
    /// Raw host address.
    LightUserData(usize),
    /// Thread handle.
    Thread(ObjectId),
}

impl Value {
    /// Basic type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) | Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Table(_) => ValueType::Table,
            Value::Function(_) => ValueType::Function,
            Value::UserData(_) => ValueType::UserData,
            Value::LightUserData(_) => ValueType::LightUserData,
            Value::Thread(_) => ValueType::Thread,
        }
    }

    /// Guest-visible type name.
    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    /// Whether this is `nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Guest truthiness: everything except `nil` and `false` is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Heap handle, if this value refers to a collectable object.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Table(id) | Value::Function(id) | Value::UserData(id) | Value::Thread(id) => {
                Some(*id)
            }
            _ => None,
        }
    }

    /// Primitive equality: numbers by value across representations, strings
    /// by content, objects by identity. No metamethods.
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
                float_to_integer(*n) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::LightUserData(a), Value::LightUserData(b)) => a == b,
            (a, b) => match (a.object_id(), b.object_id()) {
                (Some(x), Some(y)) => x == y && a.value_type() == b.value_type(),
                _ => false,
            },
        }
    }

    /// Numeric view, converting numeric strings.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => match parse_number(s)? {
                Value::Integer(i) => Some(i as f64),
                Value::Number(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integer view: integers, floats with an exact integer value, and
    /// strings that convert to either.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            Value::String(s) => match parse_number(s)? {
                Value::Integer(i) => Some(i),
                Value::Number(n) => float_to_integer(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// String view: strings as-is, numbers converted.
    pub fn to_str(&self) -> Option<Rc<str>> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(_) | Value::Number(_) => Some(self.to_display_string().into()),
            _ => None,
        }
    }

    /// Human-readable rendering used by messages and `concat`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::LightUserData(p) => format!("userdata: {:#x}", p),
            other => match other.object_id() {
                Some(id) => format!("{}: {}", other.type_name(), id),
                None => other.type_name().to_string(),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

/// Exact integer value of a float, if it has one in `i64` range.
pub fn float_to_integer(n: f64) -> Option<i64> {
    // 2^63 is exactly representable; the valid range is [-2^63, 2^63).
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if n.fract() == 0.0 && n >= -LIMIT && n < LIMIT {
        Some(n as i64)
    } else {
        None
    }
}

/// Format a float the way the guest prints it: integral values keep a `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        if n.is_sign_negative() { "-nan" } else { "nan" }.to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Parse a numeric string (decimal, float or `0x` hex integer), ignoring
/// surrounding whitespace.
pub fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let magnitude = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(Value::Integer(if negative {
            magnitude.wrapping_neg()
        } else {
            magnitude
        }));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    // Reject spellings Rust accepts but the guest does not.
    if digits.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    s.parse::<f64>().ok().map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Integer(1).type_name(), "number");
        assert_eq!(Value::Number(1.5).type_name(), "number");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(ValueType::None.name(), "no value");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::from("42").to_integer(), Some(42));
        assert_eq!(Value::from(" 0x10 ").to_integer(), Some(16));
        assert_eq!(Value::Number(3.0).to_integer(), Some(3));
        assert_eq!(Value::Number(3.5).to_integer(), None);
        assert_eq!(Value::from("2.5").to_number(), Some(2.5));
        assert_eq!(Value::from("inf").to_number(), None);
        assert_eq!(Value::from("abc").to_number(), None);
        assert_eq!(Value::Boolean(true).to_number(), None);
    }

    #[test]
    fn test_raw_equal_mixed_numbers() {
        assert!(Value::Integer(2).raw_equal(&Value::Number(2.0)));
        assert!(!Value::Integer(2).raw_equal(&Value::Number(2.5)));
        assert!(Value::from("a").raw_equal(&Value::from("a")));
        assert!(!Value::from("1").raw_equal(&Value::Integer(1)));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5.0");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(Value::Integer(-7).to_display_string(), "-7");
    }
}
