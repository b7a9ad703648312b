// Lua 5.3 value representation
// Scalars are stored inline, heap objects behind Rc

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::lua_value::lua_table::LuaTable;
use crate::lua_value::{LuaFunction, LuaString, LuaThread, LuaUserdata};

pub type LuaTableRef = Rc<RefCell<LuaTable>>;

/// Basic type tags, in the order of Lua's `LUA_T*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaValueKind {
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl LuaValueKind {
    pub fn name(self) -> &'static str {
        match self {
            LuaValueKind::Nil => "nil",
            LuaValueKind::Boolean => "boolean",
            LuaValueKind::LightUserdata | LuaValueKind::Userdata => "userdata",
            LuaValueKind::Number => "number",
            LuaValueKind::String => "string",
            LuaValueKind::Table => "table",
            LuaValueKind::Function => "function",
            LuaValueKind::Thread => "thread",
        }
    }
}

#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(LuaString),
    Table(LuaTableRef),
    Function(Rc<LuaFunction>),
    Userdata(Rc<LuaUserdata>),
    LightUserdata(usize),
    Thread(Rc<LuaThread>),
}

impl LuaValue {
    #[inline(always)]
    pub fn nil() -> Self {
        LuaValue::Nil
    }

    #[inline(always)]
    pub fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline(always)]
    pub fn integer(i: i64) -> Self {
        LuaValue::Integer(i)
    }

    #[inline(always)]
    pub fn float(n: f64) -> Self {
        LuaValue::Float(n)
    }

    pub fn string(s: impl Into<LuaString>) -> Self {
        LuaValue::String(s.into())
    }

    pub fn table(table: LuaTable) -> Self {
        LuaValue::Table(Rc::new(RefCell::new(table)))
    }

    pub fn new_table() -> Self {
        Self::table(LuaTable::new(0, 0))
    }

    pub fn function(f: LuaFunction) -> Self {
        LuaValue::Function(Rc::new(f))
    }

    pub fn kind(&self) -> LuaValueKind {
        match self {
            LuaValue::Nil => LuaValueKind::Nil,
            LuaValue::Boolean(_) => LuaValueKind::Boolean,
            LuaValue::Integer(_) | LuaValue::Float(_) => LuaValueKind::Number,
            LuaValue::String(_) => LuaValueKind::String,
            LuaValue::Table(_) => LuaValueKind::Table,
            LuaValue::Function(_) => LuaValueKind::Function,
            LuaValue::Userdata(_) => LuaValueKind::Userdata,
            LuaValue::LightUserdata(_) => LuaValueKind::LightUserdata,
            LuaValue::Thread(_) => LuaValueKind::Thread,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// `nil` and `false` are falsy, everything else is truthy.
    #[inline(always)]
    pub fn is_falsy(&self) -> bool {
        matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    #[inline(always)]
    pub fn to_bool(&self) -> bool {
        !self.is_falsy()
    }

    #[inline(always)]
    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Integer(_) | LuaValue::Float(_))
    }

    #[inline(always)]
    pub fn is_integer(&self) -> bool {
        matches!(self, LuaValue::Integer(_))
    }

    #[inline(always)]
    pub fn is_float(&self) -> bool {
        matches!(self, LuaValue::Float(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, LuaValue::String(_))
    }

    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Table(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, LuaValue::Function(_))
    }

    /// Integer payload; floats with an exact integer value convert.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            LuaValue::Float(f) => crate::lua_value::lua_convert::float_to_integer(*f),
            _ => None,
        }
    }

    /// Numeric payload as a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            LuaValue::Integer(i) => Some(*i as f64),
            LuaValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&LuaString> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&LuaTableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<LuaFunction>> {
        match self {
            LuaValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&Rc<LuaThread>> {
        match self {
            LuaValue::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<&Rc<LuaUserdata>> {
        match self {
            LuaValue::Userdata(u) => Some(u),
            _ => None,
        }
    }

    /// Address of a heap object, used for identity and `%p`-style printing.
    pub fn address(&self) -> Option<usize> {
        match self {
            LuaValue::Table(t) => Some(Rc::as_ptr(t) as *const u8 as usize),
            LuaValue::Function(f) => Some(Rc::as_ptr(f) as *const u8 as usize),
            LuaValue::Userdata(u) => Some(Rc::as_ptr(u) as *const u8 as usize),
            LuaValue::Thread(t) => Some(Rc::as_ptr(t) as *const u8 as usize),
            LuaValue::LightUserdata(p) => Some(*p),
            _ => None,
        }
    }

    /// Primitive equality: no metamethods, integers and floats compare by
    /// mathematical value, objects by identity.
    pub fn raw_equal(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::Integer(i), LuaValue::Float(f)) | (LuaValue::Float(f), LuaValue::Integer(i)) => {
                crate::lua_value::lua_convert::float_to_integer(*f) == Some(*i)
            }
            (LuaValue::String(a), LuaValue::String(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Userdata(a), LuaValue::Userdata(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Thread(a), LuaValue::Thread(b)) => Rc::ptr_eq(a, b),
            (LuaValue::LightUserdata(a), LuaValue::LightUserdata(b)) => a == b,
            _ => false,
        }
    }

    /// Metatable attached to the value itself (tables and full userdata).
    pub fn own_metatable(&self) -> Option<LuaTableRef> {
        match self {
            LuaValue::Table(t) => t.borrow().metatable(),
            LuaValue::Userdata(u) => u.metatable(),
            _ => None,
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{}", b),
            LuaValue::Integer(i) => write!(f, "{}", i),
            LuaValue::Float(n) => write!(f, "{:?}", n),
            LuaValue::String(s) => write!(f, "{:?}", s.to_str_lossy()),
            LuaValue::LightUserdata(p) => write!(f, "userdata: {:#x}", p),
            other => write!(
                f,
                "{}: {:#x}",
                other.type_name(),
                other.address().unwrap_or_default()
            ),
        }
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(i: i64) -> Self {
        LuaValue::Integer(i)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Float(n)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::String(s.into())
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::String(s.into())
    }
}

impl From<LuaString> for LuaValue {
    fn from(s: LuaString) -> Self {
        LuaValue::String(s)
    }
}

impl From<LuaTableRef> for LuaValue {
    fn from(t: LuaTableRef) -> Self {
        LuaValue::Table(t)
    }
}
