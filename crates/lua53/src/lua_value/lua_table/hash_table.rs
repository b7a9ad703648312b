use std::collections::HashMap;

use crate::lua_value::{LuaString, LuaValue};

/// Hashable identity of a table key. Floats with an integral value never
/// reach this type; they are normalised to `Int` first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(LuaString),
    /// Heap objects and light userdata by address, tagged by kind.
    Ptr(u8, usize),
}

impl HashKey {
    /// `None` for nil and NaN, which cannot be keys.
    pub fn from_value(key: &LuaValue) -> Option<HashKey> {
        Some(match key {
            LuaValue::Nil => return None,
            LuaValue::Boolean(b) => HashKey::Bool(*b),
            LuaValue::Integer(i) => HashKey::Int(*i),
            LuaValue::Float(f) => {
                if f.is_nan() {
                    return None;
                }
                match crate::lua_value::lua_convert::float_to_integer(*f) {
                    Some(i) => HashKey::Int(i),
                    None => HashKey::Float(f.to_bits()),
                }
            }
            LuaValue::String(s) => HashKey::Str(s.clone()),
            other => HashKey::Ptr(other.kind() as u8, other.address().unwrap_or_default()),
        })
    }
}

struct Slot {
    key: LuaValue,
    value: LuaValue,
}

/// Insertion-ordered hash part. Removing a key leaves a nil-valued slot in
/// place so a traversal can continue from it; dead slots are dropped when a
/// new key is inserted and they outnumber the live ones.
pub struct LuaHashTable {
    slots: Vec<Slot>,
    index: HashMap<HashKey, usize, ahash::RandomState>,
    live: usize,
}

impl LuaHashTable {
    pub fn new(capacity: usize) -> Self {
        LuaHashTable {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity_and_hasher(capacity, ahash::RandomState::new()),
            live: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn get(&self, key: &HashKey) -> Option<&LuaValue> {
        let slot = &self.slots[*self.index.get(key)?];
        if slot.value.is_nil() {
            None
        } else {
            Some(&slot.value)
        }
    }

    pub fn set(&mut self, hkey: HashKey, key: LuaValue, value: LuaValue) {
        if let Some(&pos) = self.index.get(&hkey) {
            let slot = &mut self.slots[pos];
            match (slot.value.is_nil(), value.is_nil()) {
                (true, false) => self.live += 1,
                (false, true) => self.live -= 1,
                _ => {}
            }
            slot.value = value;
            return;
        }
        if value.is_nil() {
            return;
        }
        if self.slots.len() - self.live > self.live.max(8) {
            self.compact();
        }
        self.index.insert(hkey, self.slots.len());
        self.slots.push(Slot { key, value });
        self.live += 1;
    }

    /// Removes `key` and returns its value.
    pub fn take(&mut self, key: &HashKey) -> Option<LuaValue> {
        let pos = *self.index.get(key)?;
        let value = std::mem::take(&mut self.slots[pos].value);
        if value.is_nil() {
            return None;
        }
        self.live -= 1;
        Some(value)
    }

    fn compact(&mut self) {
        self.slots.retain(|slot| !slot.value.is_nil());
        self.index.clear();
        for (pos, slot) in self.slots.iter().enumerate() {
            if let Some(hkey) = HashKey::from_value(&slot.key) {
                self.index.insert(hkey, pos);
            }
        }
    }

    /// Slot position of `key`, dead or alive.
    pub fn position(&self, key: &HashKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// First live entry at or after slot `from`.
    pub fn entry_from(&self, from: usize) -> Option<(LuaValue, LuaValue)> {
        self.slots[from.min(self.slots.len())..]
            .iter()
            .find(|slot| !slot.value.is_nil())
            .map(|slot| (slot.key.clone(), slot.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: i64) -> (HashKey, LuaValue) {
        (HashKey::Int(i), LuaValue::Integer(i))
    }

    #[test]
    fn test_set_get_delete() {
        let mut h = LuaHashTable::new(0);
        let (hk, k) = key(10);
        h.set(hk.clone(), k.clone(), LuaValue::from("x"));
        assert_eq!(h.len(), 1);
        assert!(h.get(&hk).is_some());
        h.set(hk.clone(), k, LuaValue::Nil);
        assert_eq!(h.len(), 0);
        assert!(h.get(&hk).is_none());
        // the dead slot still anchors a traversal
        assert_eq!(h.position(&hk), Some(0));
    }

    #[test]
    fn test_compaction_keeps_order() {
        let mut h = LuaHashTable::new(0);
        for i in 0..40 {
            let (hk, k) = key(i);
            h.set(hk, k, LuaValue::Integer(i));
        }
        for i in 0..30 {
            let (hk, k) = key(i);
            h.set(hk, k, LuaValue::Nil);
        }
        let (hk, k) = key(100);
        h.set(hk, k, LuaValue::Integer(100));
        assert_eq!(h.len(), 11);
        let mut seen = Vec::new();
        let mut pos = 0;
        while let Some((k, _)) = h.entry_from(pos) {
            let hk = HashKey::from_value(&k).unwrap();
            pos = h.position(&hk).unwrap() + 1;
            seen.push(k.as_integer().unwrap());
        }
        assert_eq!(seen, (30..40).chain(std::iter::once(100)).collect::<Vec<_>>());
    }

    #[test]
    fn test_key_normalisation() {
        assert_eq!(HashKey::from_value(&LuaValue::Float(2.0)), Some(HashKey::Int(2)));
        assert_eq!(HashKey::from_value(&LuaValue::Float(-0.0)), Some(HashKey::Int(0)));
        assert!(HashKey::from_value(&LuaValue::Float(f64::NAN)).is_none());
        assert!(HashKey::from_value(&LuaValue::Nil).is_none());
    }
}
