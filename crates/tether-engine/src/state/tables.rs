//! Table access, metatables and concatenation.

use super::State;
use crate::defaults::MAX_META_CHAIN;
use crate::error::{GuestError, GuestResult};
use crate::object::HeapObject;
use crate::table::Table;
use crate::value::{Value, ValueType};

impl State {
    /// Push a new empty table.
    pub fn new_table(&self) -> GuestResult<()> {
        self.maybe_collect();
        let id = self.inner().alloc(HeapObject::Table(Table::new()))?;
        self.push(Value::Table(id));
        Ok(())
    }

    fn pop_value(&self) -> Value {
        self.inner()
            .thread_mut(self.thread)
            .stack
            .pop()
            .unwrap_or_default()
    }

    fn table_at(&self, idx: i32) -> GuestResult<crate::gc::ObjectId> {
        match self.value(idx) {
            Some(Value::Table(id)) => Ok(id),
            other => Err(GuestError::runtime(format!(
                "table expected, got {}",
                other.map_or("no value", |v| v.type_name())
            ))),
        }
    }

    // ========================================================================
    // Raw Access
    // ========================================================================

    /// Pop a key and push `t[key]` without metamethods. `idx` must hold a table.
    pub fn raw_get(&self, idx: i32) -> GuestResult<ValueType> {
        let id = self.table_at(idx)?;
        let key = self.pop_value();
        let value = self.inner().table(id)?.get(&key);
        let ty = value.value_type();
        self.push(value);
        Ok(ty)
    }

    /// Pop a value and a key and assign `t[key] = value` without metamethods.
    pub fn raw_set(&self, idx: i32) -> GuestResult<()> {
        let id = self.table_at(idx)?;
        let value = self.pop_value();
        let key = self.pop_value();
        self.inner()
            .table_mut(id)?
            .set(key, value)
            .map_err(|e| GuestError::runtime(e.to_string()))
    }

    /// Push `t[n]` without metamethods.
    pub fn raw_get_index(&self, idx: i32, n: i64) -> GuestResult<ValueType> {
        let idx = self.abs_index(idx);
        self.push_integer(n);
        self.raw_get(idx)
    }

    /// Pop a value and assign `t[n] = value` without metamethods.
    pub fn raw_set_index(&self, idx: i32, n: i64) -> GuestResult<()> {
        let idx = self.abs_index(idx);
        self.push_integer(n);
        self.insert(-2);
        self.raw_set(idx)
    }

    /// Traversal step: pop a key and push the next key and value, returning
    /// `false` (and pushing nothing) at the end.
    pub fn next(&self, idx: i32) -> GuestResult<bool> {
        let id = self.table_at(idx)?;
        let key = self.pop_value();
        let step = self.inner().table(id)?.next(&key);
        match step {
            Some(Some((k, v))) => {
                self.push(k);
                self.push(v);
                Ok(true)
            }
            Some(None) => Ok(false),
            None => Err(GuestError::runtime("invalid key to 'next'")),
        }
    }

    // ========================================================================
    // Metamethod-aware Access
    // ========================================================================

    /// Pop a key and push `t[key]`, honoring `__index`.
    pub fn get_table(&self, idx: i32) -> GuestResult<ValueType> {
        let object = self.value(idx).unwrap_or_default();
        let key = self.pop_value();
        let value = self.index_value(object, key)?;
        let ty = value.value_type();
        self.push(value);
        Ok(ty)
    }

    /// Pop a value and a key and assign `t[key] = value`, honoring `__newindex`.
    pub fn set_table(&self, idx: i32) -> GuestResult<()> {
        let object = self.value(idx).unwrap_or_default();
        let value = self.pop_value();
        let key = self.pop_value();
        self.newindex_value(object, key, value)
    }

    /// Push `t[name]`, honoring `__index`.
    pub fn get_field(&self, idx: i32, name: &str) -> GuestResult<ValueType> {
        let idx = self.abs_index(idx);
        self.push_string(name);
        self.get_table(idx)
    }

    /// Pop a value and assign `t[name] = value`, honoring `__newindex`.
    pub fn set_field(&self, idx: i32, name: &str) -> GuestResult<()> {
        let idx = self.abs_index(idx);
        self.push_string(name);
        self.insert(-2);
        self.set_table(idx)
    }

    /// Push the global `name`.
    pub fn get_global(&self, name: &str) -> GuestResult<ValueType> {
        self.push_globals();
        match self.get_field(-1, name) {
            Ok(ty) => {
                self.remove(-2);
                Ok(ty)
            }
            Err(e) => {
                self.pop(1);
                Err(e)
            }
        }
    }

    /// Pop a value into the global `name`.
    pub fn set_global(&self, name: &str) -> GuestResult<()> {
        self.push_globals();
        self.insert(-2);
        let result = self.set_field(-2, name);
        self.pop(1);
        result
    }

    fn index_value(&self, mut object: Value, key: Value) -> GuestResult<Value> {
        for _ in 0..MAX_META_CHAIN {
            let handler = {
                let inner = self.inner();
                if let Value::Table(id) = object {
                    let value = inner.table(id)?.get(&key);
                    if !value.is_nil() {
                        return Ok(value);
                    }
                }
                let handler = inner.metafield(&object, "__index");
                if handler.is_nil() {
                    return match object {
                        Value::Table(_) => Ok(Value::Nil),
                        _ => Err(GuestError::runtime(format!(
                            "attempt to index a {} value",
                            inner.display_type(&object)
                        ))),
                    };
                }
                handler
            };
            if let Value::Function(_) = handler {
                self.push(handler);
                self.push(object);
                self.push(key);
                self.call(2, 1)?;
                return Ok(self.pop_value());
            }
            object = handler;
        }
        Err(GuestError::runtime("'__index' chain too long; possible loop"))
    }

    fn newindex_value(&self, mut object: Value, key: Value, value: Value) -> GuestResult<()> {
        for _ in 0..MAX_META_CHAIN {
            let handler = {
                let mut inner = self.inner();
                let handler = inner.metafield(&object, "__newindex");
                if let Value::Table(id) = object {
                    let table = inner.table_mut(id)?;
                    if handler.is_nil() || !table.get(&key).is_nil() {
                        return table
                            .set(key, value)
                            .map_err(|e| GuestError::runtime(e.to_string()));
                    }
                } else if handler.is_nil() {
                    return Err(GuestError::runtime(format!(
                        "attempt to index a {} value",
                        inner.display_type(&object)
                    )));
                }
                handler
            };
            if let Value::Function(_) = handler {
                self.push(handler);
                self.push(object);
                self.push(key);
                self.push(value);
                return self.call(3, 0);
            }
            object = handler;
        }
        Err(GuestError::runtime("'__newindex' chain too long; possible loop"))
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Push the metatable of the value at `idx`, returning `false` (and
    /// pushing nothing) if it has none.
    pub fn get_metatable(&self, idx: i32) -> bool {
        let mt = {
            let inner = self.inner();
            inner
                .value_at(self.thread, idx)
                .and_then(|v| inner.metatable_of(&v))
        };
        match mt {
            Some(id) => {
                self.push(Value::Table(id));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or nil) and make it the metatable of the table or
    /// userdata at `idx`.
    pub fn set_metatable(&self, idx: i32) -> GuestResult<()> {
        let target = self.value(idx).unwrap_or_default();
        let mt = match self.pop_value() {
            Value::Table(id) => Some(id),
            Value::Nil => None,
            other => {
                return Err(GuestError::runtime(format!(
                    "metatable must be a table or nil, got {}",
                    other.type_name()
                )))
            }
        };
        let mut inner = self.inner();
        let slot = match target {
            Value::Table(id) => match inner.heap.get_mut(id) {
                Some(HeapObject::Table(t)) => &mut t.metatable,
                _ => return Err(GuestError::runtime("attempt to access a collected table")),
            },
            Value::UserData(id) => match inner.heap.get_mut(id) {
                Some(HeapObject::UserData(u)) => &mut u.metatable,
                _ => return Err(GuestError::runtime("attempt to access a collected userdata")),
            },
            other => {
                return Err(GuestError::runtime(format!(
                    "cannot set the metatable of a {} value",
                    other.type_name()
                )))
            }
        };
        *slot = mt;
        Ok(())
    }

    // ========================================================================
    // Concatenation
    // ========================================================================

    /// Pop `n` values and push their concatenation. Strings and numbers only.
    pub fn concat(&self, n: i32) -> GuestResult<()> {
        if n == 0 {
            self.push_string("");
            return Ok(());
        }
        let values: Vec<Value> = {
            let mut inner = self.inner();
            let t = inner.thread_mut(self.thread);
            let base = t.frame().base;
            let start = t.stack.len().saturating_sub(n as usize).max(base);
            t.stack[start..].to_vec()
        };
        let mut out = String::new();
        for value in &values {
            match value.to_str() {
                Some(s) => out.push_str(&s),
                None => {
                    return Err(GuestError::runtime(format!(
                        "attempt to concatenate a {} value",
                        value.type_name()
                    )))
                }
            }
        }
        self.pop(values.len() as i32);
        self.push(Value::from(out));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::state::{upvalue_index, Vm, REGISTRY_INDEX};
    use crate::value::ValueType;
    use std::rc::Rc;

    #[test]
    fn test_raw_set_get() {
        let vm = Vm::new();
        vm.new_table().unwrap();
        vm.push_string("k");
        vm.push_integer(5);
        vm.raw_set(1).unwrap();
        vm.push_string("k");
        assert_eq!(vm.raw_get(1).unwrap(), ValueType::Number);
        assert_eq!(vm.to_integer(-1), Some(5));
        vm.pop(1);
        vm.push_integer(1);
        vm.raw_set_index(1, 1).unwrap();
        assert_eq!(vm.raw_len(1), 1);
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_globals_round_trip() {
        let vm = Vm::new();
        vm.push_integer(42);
        vm.set_global("answer").unwrap();
        assert_eq!(vm.top(), 0);
        vm.get_global("answer").unwrap();
        assert_eq!(vm.to_integer(-1), Some(42));
        vm.get_global("missing").unwrap();
        assert!(vm.is_none_or_nil(-1));
        assert_eq!(vm.top(), 2);
    }

    #[test]
    fn test_index_through_table_metamethod() {
        let vm = Vm::new();
        vm.new_table().unwrap(); // 1: object
        vm.new_table().unwrap(); // 2: metatable
        vm.new_table().unwrap(); // 3: fallback
        vm.push_integer(10);
        vm.set_field(3, "x").unwrap();
        vm.set_field(2, "__index").unwrap();
        vm.set_metatable(1).unwrap();
        vm.get_field(1, "x").unwrap();
        assert_eq!(vm.to_integer(-1), Some(10));
    }

    #[test]
    fn test_index_through_function_metamethod() {
        let vm = Vm::new();
        vm.new_table().unwrap();
        vm.new_table().unwrap();
        vm.push_native_function(Rc::new(|st| {
            let key = st.to_str(2).unwrap_or_default();
            st.push_string(&format!("got {}", key));
            Ok(1)
        }))
        .unwrap();
        vm.set_field(-2, "__index").unwrap();
        vm.set_metatable(1).unwrap();
        vm.get_field(1, "name").unwrap();
        assert_eq!(vm.to_str(-1).as_deref(), Some("got name"));
    }

    #[test]
    fn test_index_non_table_errors() {
        let vm = Vm::new();
        vm.push_integer(3);
        let err = vm.get_field(1, "x").unwrap_err();
        assert!(err.to_string().contains("attempt to index a number value"));
    }

    #[test]
    fn test_next_traversal() {
        let vm = Vm::new();
        vm.new_table().unwrap();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            vm.push_integer(i as i64);
            vm.set_field(1, name).unwrap();
        }
        let mut keys = Vec::new();
        vm.push_nil();
        while vm.next(1).unwrap() {
            keys.push(vm.to_str(-2).unwrap().to_string());
            vm.pop(1);
        }
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_concat() {
        let vm = Vm::new();
        vm.push_string("__get_");
        vm.push_integer(3);
        vm.concat(2).unwrap();
        assert_eq!(vm.to_str(-1).as_deref(), Some("__get_3"));
        vm.new_table().unwrap();
        let err = vm.concat(2).unwrap_err();
        assert!(err.to_string().contains("concatenate a table"));
    }

    #[test]
    fn test_pseudo_indices() {
        let vm = Vm::new();
        assert_eq!(vm.type_of(REGISTRY_INDEX), ValueType::Table);
        assert_eq!(vm.type_of(upvalue_index(1)), ValueType::None);
    }
}
