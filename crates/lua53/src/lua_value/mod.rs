// Lua 5.3 value model
// Reference counted heap objects, no tracing collector
mod chunk;
pub mod chunk_serializer;
pub mod lua_arith;
pub mod lua_convert;
mod lua_function;
mod lua_table;
mod lua_thread;
#[allow(clippy::module_inception)]
mod lua_value;

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub use chunk::{Chunk, LocVar, UpvalueDesc};
pub use lua_function::{LuaClosure, LuaFunction, LuaUpvalue, NativeFn, NativeFunction, NativeKind};
pub use lua_table::{LuaTable, TableError};
pub use lua_thread::{LuaThread, ThreadStatus};
pub use lua_value::{LuaTableRef, LuaValue, LuaValueKind};

/// Immutable byte string. Lua strings are not required to be UTF-8.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LuaString(Rc<[u8]>);

impl LuaString {
    pub fn new(bytes: &[u8]) -> Self {
        LuaString(Rc::from(bytes))
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn ptr_eq(&self, other: &LuaString) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}

impl fmt::Display for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl AsRef<[u8]> for LuaString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        LuaString::new(s.as_bytes())
    }
}

impl From<String> for LuaString {
    fn from(s: String) -> Self {
        LuaString(Rc::from(s.into_bytes()))
    }
}

impl From<&[u8]> for LuaString {
    fn from(b: &[u8]) -> Self {
        LuaString::new(b)
    }
}

impl From<Vec<u8>> for LuaString {
    fn from(b: Vec<u8>) -> Self {
        LuaString(Rc::from(b))
    }
}

/// Userdata - arbitrary Rust data with optional metatable and user value
pub struct LuaUserdata {
    data: RefCell<Box<dyn Any>>,
    metatable: RefCell<Option<LuaTableRef>>,
    user_value: RefCell<LuaValue>,
}

impl LuaUserdata {
    pub fn new<T: Any>(data: T) -> Self {
        LuaUserdata {
            data: RefCell::new(Box::new(data)),
            metatable: RefCell::new(None),
            user_value: RefCell::new(LuaValue::Nil),
        }
    }

    pub fn data(&self) -> &RefCell<Box<dyn Any>> {
        &self.data
    }

    pub fn metatable(&self) -> Option<LuaTableRef> {
        self.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, metatable: Option<LuaTableRef>) {
        *self.metatable.borrow_mut() = metatable;
    }

    pub fn user_value(&self) -> LuaValue {
        self.user_value.borrow().clone()
    }

    pub fn set_user_value(&self, value: LuaValue) {
        *self.user_value.borrow_mut() = value;
    }
}

impl fmt::Debug for LuaUserdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Userdata({:p})", self as *const _)
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn test_integer_float_distinction() {
        let int_val = LuaValue::integer(42);
        let float_val = LuaValue::float(42.0);

        assert!(int_val.is_integer());
        assert!(!int_val.is_float());
        assert!(!float_val.is_integer());
        assert!(float_val.is_float());
        assert!(int_val.is_number() && float_val.is_number());
        assert!(int_val.raw_equal(&float_val));
        assert!(!LuaValue::integer(1).raw_equal(&LuaValue::float(1.5)));
    }

    #[test]
    fn test_integer_float_conversion() {
        assert_eq!(LuaValue::integer(42).as_float(), Some(42.0));
        assert_eq!(LuaValue::float(42.5).as_integer(), None);
        assert_eq!(LuaValue::float(42.0).as_integer(), Some(42));
        assert_eq!(LuaValue::float(2f64.powi(63)).as_integer(), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(LuaValue::nil().is_falsy());
        assert!(LuaValue::boolean(false).is_falsy());
        assert!(LuaValue::integer(0).to_bool());
        assert!(LuaValue::from("").to_bool());
    }

    #[test]
    fn test_identity() {
        let t = LuaValue::new_table();
        let u = LuaValue::new_table();
        assert!(t.raw_equal(&t.clone()));
        assert!(!t.raw_equal(&u));
        assert_eq!(t.type_name(), "table");
        assert!(LuaValue::from("abc").raw_equal(&LuaValue::string(b"abc".to_vec())));
    }
}
