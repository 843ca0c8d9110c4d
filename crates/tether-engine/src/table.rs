//! Guest tables.
//!
//! Entries live in an insertion-ordered vector indexed by an `FxHashMap`, so
//! traversal with [`Table::next`] is deterministic. Assigning `nil` leaves a
//! tombstone that traversal skips; tombstones are compacted when new keys are
//! inserted.

use crate::gc::ObjectId;
use crate::value::{float_to_integer, Value};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Hashable form of a table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TableKey {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(Rc<str>),
    Light(usize),
    Object(ObjectId),
}

impl TableKey {
    /// Normalize a value into a key. `None` for `nil` and NaN.
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Nil => return None,
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Number(n) => {
                if n.is_nan() {
                    return None;
                }
                match float_to_integer(*n) {
                    Some(i) => TableKey::Integer(i),
                    // -0.0 has an integer value, so only non-integral floats get here
                    None => TableKey::Float(n.to_bits()),
                }
            }
            Value::String(s) => TableKey::String(s.clone()),
            Value::LightUserData(p) => TableKey::Light(*p),
            Value::Table(id) | Value::Function(id) | Value::UserData(id) | Value::Thread(id) => {
                TableKey::Object(*id)
            }
        })
    }
}

/// Error raised when assigning with an invalid key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The key was `nil`.
    #[error("index is nil")]
    Nil,
    /// The key was NaN.
    #[error("index is NaN")]
    NaN,
}

/// A guest table.
#[derive(Debug, Default)]
pub struct Table {
    index: FxHashMap<TableKey, usize>,
    entries: Vec<(Value, Value)>,
    tombstones: usize,
    pub(crate) metatable: Option<ObjectId>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup. Missing keys read as `nil`.
    pub fn get(&self, key: &Value) -> Value {
        TableKey::from_value(key)
            .and_then(|k| self.index.get(&k))
            .map(|&slot| self.entries[slot].1.clone())
            .unwrap_or(Value::Nil)
    }

    /// Raw lookup by string key.
    pub fn get_str(&self, key: &str) -> Value {
        self.index
            .get(&TableKey::String(key.into()))
            .map(|&slot| self.entries[slot].1.clone())
            .unwrap_or(Value::Nil)
    }

    /// Raw assignment. Assigning `nil` removes the entry.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), KeyError> {
        let table_key = match TableKey::from_value(&key) {
            Some(k) => k,
            None if key.is_nil() => return Err(KeyError::Nil),
            None => return Err(KeyError::NaN),
        };
        match self.index.get(&table_key) {
            Some(&slot) => {
                let entry = &mut self.entries[slot];
                match (entry.1.is_nil(), value.is_nil()) {
                    (false, true) => self.tombstones += 1,
                    (true, false) => self.tombstones -= 1,
                    _ => {}
                }
                entry.1 = value;
            }
            None if value.is_nil() => {}
            None => {
                if self.tombstones > 0 && self.tombstones * 2 >= self.entries.len() {
                    self.compact();
                }
                self.index.insert(table_key, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    /// Number of non-nil entries.
    pub fn len(&self) -> usize {
        self.entries.len() - self.tombstones
    }

    /// Whether the table has no non-nil entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the array part: the largest `n` such that keys `1..=n` are all present.
    pub fn border(&self) -> i64 {
        let mut n = 0;
        while !self.get(&Value::Integer(n + 1)).is_nil() {
            n += 1;
        }
        n
    }

    /// Traversal step. `key == nil` starts the traversal.
    ///
    /// Returns `None` when `key` is not present in the table, `Some(None)` at
    /// the end of the traversal.
    pub fn next(&self, key: &Value) -> Option<Option<(Value, Value)>> {
        let start = if key.is_nil() {
            0
        } else {
            *self.index.get(&TableKey::from_value(key)?)? + 1
        };
        Some(
            self.entries[start.min(self.entries.len())..]
                .iter()
                .find(|(_, v)| !v.is_nil())
                .cloned(),
        )
    }

    /// Every key and value, for marking.
    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().flat_map(|(k, v)| [k, v])
    }

    pub(crate) fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.entries.capacity() * std::mem::size_of::<(Value, Value)>()
    }

    fn compact(&mut self) {
        self.entries.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (slot, (key, _)) in self.entries.iter().enumerate() {
            if let Some(k) = TableKey::from_value(key) {
                self.index.insert(k, slot);
            }
        }
        self.tombstones = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_keys_normalize() {
        let mut t = Table::new();
        t.set(Value::Number(1.0), Value::from("one")).unwrap();
        assert!(t.get(&Value::Integer(1)).raw_equal(&Value::from("one")));
        t.set(Value::Number(1.5), Value::Boolean(true)).unwrap();
        assert!(t.get(&Value::Number(1.5)).is_truthy());
    }

    #[test]
    fn test_invalid_keys() {
        let mut t = Table::new();
        assert_eq!(t.set(Value::Nil, Value::Integer(1)), Err(KeyError::Nil));
        assert_eq!(t.set(Value::Number(f64::NAN), Value::Integer(1)), Err(KeyError::NaN));
        assert!(t.get(&Value::Nil).is_nil());
    }

    #[test]
    fn test_remove_and_traverse() {
        let mut t = Table::new();
        for i in 1..=4 {
            t.set(Value::Integer(i), Value::Integer(i * 10)).unwrap();
        }
        t.set(Value::Integer(2), Value::Nil).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.border(), 1);

        let mut seen = Vec::new();
        let mut key = Value::Nil;
        while let Some(Some((k, _))) = t.next(&key) {
            seen.push(k.to_integer().unwrap());
            key = k;
        }
        assert_eq!(seen, vec![1, 3, 4]);
    }

    #[test]
    fn test_compaction_keeps_lookups() {
        let mut t = Table::new();
        for i in 0..8 {
            t.set(Value::Integer(i), Value::Integer(i)).unwrap();
        }
        for i in 0..6 {
            t.set(Value::Integer(i), Value::Nil).unwrap();
        }
        t.set(Value::from("fresh"), Value::Integer(99)).unwrap();
        assert_eq!(t.len(), 3);
        assert!(t.get(&Value::Integer(7)).raw_equal(&Value::Integer(7)));
        assert!(t.get_str("fresh").raw_equal(&Value::Integer(99)));
        assert!(t.next(&Value::Integer(0)).is_none());
    }
}
