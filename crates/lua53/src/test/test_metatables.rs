// Metatables and metamethods
use crate::test::{check, new_vm, run};
use crate::*;

#[test]
fn test_arithmetic_metamethods() {
    check(
        r#"
        local V = {}
        V.__index = V
        local function vec(x, y) return setmetatable({x = x, y = y}, V) end
        V.__add = function(a, b) return vec(a.x + b.x, a.y + b.y) end
        V.__sub = function(a, b) return vec(a.x - b.x, a.y - b.y) end
        V.__mul = function(a, b)
            if type(a) == "number" then return vec(a * b.x, a * b.y) end
            return vec(a.x * b, a.y * b)
        end
        V.__unm = function(a) return vec(-a.x, -a.y) end
        V.__idiv = function(a, b) return "idiv" end
        V.__mod = function(a, b) return "mod" end
        V.__pow = function(a, b) return "pow" end
        V.__div = function(a, b) return "div" end
        local a, b = vec(1, 2), vec(3, 4)
        local c = a + b
        assert(c.x == 4 and c.y == 6)
        assert((b - a).x == 2)
        assert((a * 2).y == 4 and (3 * a).x == 3)
        assert((-a).x == -1)
        assert(a // 1 == "idiv" and a % 1 == "mod" and a ^ 2 == "pow" and a / 2 == "div")
    "#,
    );
}

#[test]
fn test_bitwise_metamethods() {
    check(
        r#"
        local mt = {
            __band = function() return "band" end, __bor = function() return "bor" end,
            __bxor = function() return "bxor" end, __shl = function() return "shl" end,
            __shr = function() return "shr" end, __bnot = function() return "bnot" end,
        }
        local o = setmetatable({}, mt)
        assert((o & 1) == "band" and (1 | o) == "bor" and (o ~ 1) == "bxor")
        assert((o << 1) == "shl" and (o >> 1) == "shr" and (~o) == "bnot")
        local ok, err = pcall(function() return 1.5 | 1 end)
        assert(not ok and err:find("number has no integer representation"))
        ok, err = pcall(function() return {} & 1 end)
        assert(not ok and err:find("attempt to perform bitwise operation on a table value"))
    "#,
    );
}

#[test]
fn test_comparison_metamethods() {
    check(
        r#"
        local mt = {}
        mt.__lt = function(a, b) return a.v < b.v end
        mt.__le = function(a, b) return a.v <= b.v end
        mt.__eq = function(a, b) return a.v == b.v end
        local function obj(v) return setmetatable({v = v}, mt) end
        local x, y, z = obj(1), obj(2), obj(1)
        assert(x < y and y > x and x <= z and x >= z)
        assert(x == z and x ~= y)

        local only_lt = {__lt = function(a, b) return a.v < b.v end}
        local p, q = setmetatable({v = 1}, only_lt), setmetatable({v = 2}, only_lt)
        assert(p <= q and not (q <= p))

        local other = setmetatable({v = 1}, {__eq = function() return true end})
        assert(x ~= other)

        local ok, err = pcall(function() return {} < {} end)
        assert(not ok and err:find("attempt to compare two table values"))
        ok, err = pcall(function() return 1 < "2" end)
        assert(not ok and err:find("attempt to compare number with string"))
    "#,
    );
}

#[test]
fn test_concat_len_call_metamethods() {
    check(
        r#"
        local mt = {
            __concat = function(a, b)
                local l = type(a) == "table" and a.name or a
                local r = type(b) == "table" and b.name or b
                return l .. r
            end,
            __len = function(t) return 99 end,
            __call = function(self, a, b) return self.name, a + b end,
        }
        local o = setmetatable({name = "obj"}, mt)
        assert(o .. "!" == "obj!" and "<" .. o == "<obj")
        assert("a" .. "b" .. o .. "c" == "abobjc")
        assert(#o == 99)
        local n, s = o(1, 2)
        assert(n == "obj" and s == 3)
        local ok, err = pcall(function() return {} .. "x" end)
        assert(not ok and err:find("attempt to concatenate a table value"))
    "#,
    );
}

#[test]
fn test_index_and_newindex() {
    check(
        r#"
        local log = {}
        local store = {}
        local proxy = setmetatable({}, {
            __index = function(_, k) return store[k] end,
            __newindex = function(_, k, v) log[#log + 1] = k; store[k] = v end,
        })
        proxy.a = 1
        proxy.b = 2
        assert(proxy.a == 1 and rawget(proxy, "a") == nil and #log == 2)

        local defaults = setmetatable({}, {__index = {color = "red"}})
        assert(defaults.color == "red")
        local sink = {}
        local redirect = setmetatable({}, {__newindex = sink})
        redirect.z = 5
        assert(sink.z == 5 and rawget(redirect, "z") == nil)

        local loop = {}
        setmetatable(loop, {__index = loop})
        local ok, err = pcall(function() return loop.missing end)
        assert(not ok and err:find("'__index' chain too long; possible loop"))
    "#,
    );
}

#[test]
fn test_string_values_have_metatable() {
    check(
        r#"
        local s = "abc"
        assert(s:len() == 3 and s.len == string.len)
        local ok, err = pcall(function() local n = 5; return n.x end)
        assert(not ok and err:find("attempt to index a number value %(local 'n'%)"))
    "#,
    );
}

#[test]
fn test_tostring_and_name() {
    check(
        r#"
        local t = setmetatable({}, {__tostring = function() return "custom" end})
        assert(tostring(t) == "custom")
        local named = setmetatable({}, {__name = "MyType"})
        assert(tostring(named):find("^MyType: "))
        local bad = setmetatable({}, {__tostring = function() return 1 end})
        local ok, err = pcall(tostring, bad)
        assert(not ok and err:find("'__tostring' must return a string"))
        assert(tostring(print):find("^function: "))
        assert(tostring({}):find("^table: "))
    "#,
    );
}

#[test]
fn test_protected_metatable() {
    check(
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(t) == "locked")
        local ok, err = pcall(setmetatable, t, {})
        assert(not ok and err:find("cannot change a protected metatable"))
        assert(getmetatable(1) == nil)
        ok, err = pcall(setmetatable, {}, 1)
        assert(not ok and err:find("nil or table expected"))
    "#,
    );
}

#[test]
fn test_metatable_from_rust() {
    let mut vm = new_vm();
    let t = vm.new_table_size(0, 0);
    let mt = vm.new_table_size(0, 1);
    let double = run(&mut vm, "return function(_, k) return k * 2 end").unwrap().remove(0);
    vm.set_table(&mt, LuaValue::from("__index"), double).unwrap();
    vm.set_metatable(&t, mt.as_table().cloned());
    let v = vm.get_table(&t, &LuaValue::Integer(21)).unwrap();
    assert!(matches!(v, LuaValue::Integer(42)));
    vm.set_global("doubler", t);
    let r = run(&mut vm, "return doubler[5]").unwrap();
    assert!(matches!(r[..], [LuaValue::Integer(10)]));
}
