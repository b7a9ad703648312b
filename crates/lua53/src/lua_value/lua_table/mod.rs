// Lua table: array part for keys 1..n plus an insertion-ordered hash part
mod hash_table;

use thiserror::Error;

use crate::lua_value::{LuaTableRef, LuaValue};
pub use hash_table::HashKey;
use hash_table::LuaHashTable;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("table index is nil")]
    IndexNil,
    #[error("table index is NaN")]
    IndexNaN,
    #[error("invalid key to 'next'")]
    InvalidNextKey,
}

pub struct LuaTable {
    /// Values for keys `1..=array.len()`; never ends with nil.
    array: Vec<LuaValue>,
    hash: LuaHashTable,
    metatable: Option<LuaTableRef>,
}

impl LuaTable {
    pub fn new(array_size: usize, hash_size: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(array_size),
            hash: LuaHashTable::new(hash_size),
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<LuaTableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, metatable: Option<LuaTableRef>) {
        self.metatable = metatable;
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }

    /// Raw read.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        match key {
            LuaValue::Integer(i) => self.get_int(*i),
            LuaValue::String(_) | LuaValue::Boolean(_) => self.get_hashed(key),
            LuaValue::Float(f) => match crate::lua_value::lua_convert::float_to_integer(*f) {
                Some(i) => self.get_int(i),
                None => self.get_hashed(key),
            },
            LuaValue::Nil => LuaValue::Nil,
            _ => self.get_hashed(key),
        }
    }

    fn get_hashed(&self, key: &LuaValue) -> LuaValue {
        HashKey::from_value(key)
            .and_then(|hk| self.hash.get(&hk).cloned())
            .unwrap_or_default()
    }

    #[inline]
    pub fn get_int(&self, i: i64) -> LuaValue {
        if i >= 1 && (i as u64) <= self.array.len() as u64 {
            return self.array[(i - 1) as usize].clone();
        }
        self.hash.get(&HashKey::Int(i)).cloned().unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        self.get_hashed(&LuaValue::from(key))
    }

    /// Raw write; assigning nil removes the key.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableError> {
        let key = match key {
            LuaValue::Nil => return Err(TableError::IndexNil),
            LuaValue::Float(f) if f.is_nan() => return Err(TableError::IndexNaN),
            LuaValue::Float(f) => match crate::lua_value::lua_convert::float_to_integer(f) {
                Some(i) => LuaValue::Integer(i),
                None => LuaValue::Float(f),
            },
            other => other,
        };
        if let LuaValue::Integer(i) = key {
            self.set_int(i, value);
            return Ok(());
        }
        let hkey = HashKey::from_value(&key).ok_or(TableError::IndexNil)?;
        self.hash.set(hkey, key, value);
        Ok(())
    }

    pub fn set_int(&mut self, i: i64, value: LuaValue) {
        let len = self.array.len() as i64;
        if i >= 1 && i <= len {
            self.array[(i - 1) as usize] = value;
            if i == len {
                while self.array.last().is_some_and(|v| v.is_nil()) {
                    self.array.pop();
                }
            }
            return;
        }
        if i == len + 1 && !value.is_nil() {
            self.hash.take(&HashKey::Int(i));
            self.array.push(value);
            self.migrate_from_hash();
            return;
        }
        self.hash.set(HashKey::Int(i), LuaValue::Integer(i), value);
    }

    pub fn set_str(&mut self, key: &str, value: LuaValue) {
        let key = LuaValue::from(key);
        if let Some(hkey) = HashKey::from_value(&key) {
            self.hash.set(hkey, key, value);
        }
    }

    /// Moves keys that now extend the array out of the hash part.
    fn migrate_from_hash(&mut self) {
        while self.hash.len() > 0 {
            let next = HashKey::Int(self.array.len() as i64 + 1);
            match self.hash.take(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// A border: `t[n] ~= nil` and `t[n+1] == nil`, or 0 when `t[1] == nil`.
    pub fn len(&self) -> i64 {
        if !self.array.is_empty() {
            return self.array.len() as i64;
        }
        if self.hash.get(&HashKey::Int(1)).is_none() {
            return 0;
        }
        // unbound search over the hash part
        let mut lo: i64 = 1;
        let mut hi: i64 = 2;
        while self.hash.get(&HashKey::Int(hi)).is_some() {
            lo = hi;
            if hi > i64::MAX / 2 {
                let mut n = 1;
                while self.hash.get(&HashKey::Int(n + 1)).is_some() {
                    n += 1;
                }
                return n;
            }
            hi *= 2;
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.hash.get(&HashKey::Int(mid)).is_some() {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn is_empty(&self) -> bool {
        self.array.iter().all(|v| v.is_nil()) && self.hash.len() == 0
    }

    /// Entry following `key` in traversal order: the array part in index
    /// order, then the hash part in insertion order.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, TableError> {
        let array_from = match key {
            LuaValue::Nil => Some(0),
            _ => match HashKey::from_value(key) {
                Some(HashKey::Int(i)) if i >= 1 && (i as u64) <= self.array.len() as u64 => {
                    Some(i as usize)
                }
                Some(hkey) => match self.hash.position(&hkey) {
                    Some(pos) => return Ok(self.hash.entry_from(pos + 1)),
                    // an array slot that was trimmed away during traversal
                    None if matches!(hkey, HashKey::Int(i) if i >= 1) => Some(self.array.len()),
                    None => return Err(TableError::InvalidNextKey),
                },
                None => return Err(TableError::InvalidNextKey),
            },
        };
        if let Some(from) = array_from {
            for (idx, value) in self.array.iter().enumerate().skip(from) {
                if !value.is_nil() {
                    return Ok(Some((LuaValue::Integer(idx as i64 + 1), value.clone())));
                }
            }
        }
        Ok(self.hash.entry_from(0))
    }

    /// Appends at `#t + 1`.
    pub fn push(&mut self, value: LuaValue) {
        let n = self.len();
        self.set_int(n + 1, value);
    }

    /// Inserts at `pos`, shifting up the elements `pos..=#t`.
    pub fn insert(&mut self, pos: i64, value: LuaValue) {
        let n = self.len();
        let mut i = n;
        while i >= pos {
            let v = self.get_int(i);
            self.set_int(i + 1, v);
            i -= 1;
        }
        self.set_int(pos, value);
    }

    /// Removes the element at `pos`, shifting down the elements above it.
    pub fn remove(&mut self, pos: i64) -> LuaValue {
        let n = self.len();
        let removed = self.get_int(pos);
        for i in pos..n {
            let v = self.get_int(i + 1);
            self.set_int(i, v);
        }
        if pos <= n {
            self.set_int(n, LuaValue::Nil);
        }
        removed
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        LuaTable::new(0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> LuaValue {
        LuaValue::Integer(i)
    }

    #[test]
    fn test_array_and_hash_parts() {
        let mut t = LuaTable::new(0, 0);
        t.set(int(3), int(30)).unwrap();
        t.set(int(1), int(10)).unwrap();
        assert_eq!(t.array_len(), 1);
        t.set(int(2), int(20)).unwrap();
        // 3 migrated out of the hash part
        assert_eq!(t.array_len(), 3);
        assert_eq!(t.hash_len(), 0);
        assert_eq!(t.len(), 3);
        assert!(t.get(&LuaValue::Float(2.0)).raw_equal(&int(20)));
    }

    #[test]
    fn test_key_errors() {
        let mut t = LuaTable::default();
        assert_eq!(t.set(LuaValue::Nil, int(1)), Err(TableError::IndexNil));
        assert_eq!(
            t.set(LuaValue::Float(f64::NAN), int(1)),
            Err(TableError::IndexNaN)
        );
        assert!(matches!(
            t.next(&LuaValue::from("missing")),
            Err(TableError::InvalidNextKey)
        ));
        assert!(t.get(&LuaValue::Nil).is_nil());
    }

    #[test]
    fn test_float_keys_normalise() {
        let mut t = LuaTable::default();
        t.set(LuaValue::Float(1.0), LuaValue::from("a")).unwrap();
        assert_eq!(t.array_len(), 1);
        t.set(LuaValue::Float(1.5), LuaValue::from("b")).unwrap();
        assert!(t.get(&LuaValue::Float(1.5)).raw_equal(&LuaValue::from("b")));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_border_in_hash_part() {
        let mut t = LuaTable::default();
        for i in (1..=10).rev() {
            t.set(int(i), int(i)).unwrap();
        }
        assert_eq!(t.len(), 10);
        let mut h = LuaTable::default();
        h.set(int(2), int(2)).unwrap();
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn test_next_visits_everything_while_clearing() {
        let mut t = LuaTable::default();
        for i in 1..=5 {
            t.set(int(i), int(i)).unwrap();
        }
        t.set(LuaValue::from("x"), int(1)).unwrap();
        t.set(LuaValue::from("y"), int(2)).unwrap();
        let mut key = LuaValue::Nil;
        let mut count = 0;
        while let Some((k, _)) = t.next(&key).unwrap() {
            t.set(k.clone(), LuaValue::Nil).unwrap();
            key = k;
            count += 1;
        }
        assert_eq!(count, 7);
        assert!(t.is_empty());
    }

    #[test]
    fn test_insert_remove() {
        let mut t = LuaTable::default();
        t.push(int(1));
        t.push(int(3));
        t.insert(2, int(2));
        assert_eq!(t.len(), 3);
        assert!(t.get_int(2).raw_equal(&int(2)));
        assert!(t.remove(1).raw_equal(&int(1)));
        assert_eq!(t.len(), 2);
        assert!(t.get_int(1).raw_equal(&int(2)));
    }
}
