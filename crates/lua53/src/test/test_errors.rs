// Error values, positions, variable names and protected calls
use crate::test::{check, new_vm, run};
use crate::*;

#[test]
fn test_variable_names_in_messages() {
    check(
        r#"
        local ok, err = pcall(function() return undefined_global.x end)
        assert(not ok and err:find("attempt to index a nil value %(global 'undefined_global'%)"))
        ok, err = pcall(function() undefined_fn() end)
        assert(not ok and err:find("attempt to call a nil value %(global 'undefined_fn'%)"))
        ok, err = pcall(function() local t = {} return t.a.b end)
        assert(not ok and err:find("attempt to index a nil value %(field 'a'%)"))
        ok, err = pcall(function() local s = {} return s:nomethod() end)
        assert(not ok and err:find("attempt to call a nil value %(method 'nomethod'%)"))
        local up = nil
        ok, err = pcall(function() return up.x end)
        assert(not ok and err:find("attempt to index a nil value %(upvalue 'up'%)"))
        ok, err = pcall(function() local a = {} return a + 1 end)
        assert(not ok and err:find("attempt to perform arithmetic on a table value %(local 'a'%)"))
        ok, err = pcall(function() local s = "x" return s .. {} end)
        assert(not ok and err:find("attempt to concatenate a table value"))
        ok, err = pcall(function() return #nil end)
        assert(not ok and err:find("attempt to get length of a nil value"))
    "#,
    );
}

#[test]
fn test_error_positions_and_levels() {
    check(
        r#"
        local ok, err = pcall(error, "plain", 0)
        assert(err == "plain")
        ok, err = pcall(function() error("here") end)
        assert(err == "test:4: here")
        local function inner() error("from caller", 2) end
        local function outer()
            inner()
        end
        ok, err = pcall(outer)
        assert(err == "test:8: from caller")
        ok, err = pcall(function() error() end)
        assert(not ok and err == nil)
        ok, err = pcall(function() error(setmetatable({}, {__tostring = function() return "E" end})) end)
        assert(not ok and tostring(err) == "E")
    "#,
    );
}

#[test]
fn test_integer_errors() {
    check(
        r#"
        local ok, err = pcall(function() return 1 // 0 end)
        assert(not ok and err:find("attempt to perform 'n//0'"))
        ok, err = pcall(function() return 1 % 0 end)
        assert(not ok and err:find("attempt to perform 'n%%0'"))
        assert(1.0 // 0 > 1e308)
        ok, err = pcall(function() local x = 2^63 return x | 0 end)
        assert(not ok and err:find("number has no integer representation"))
    "#,
    );
}

#[test]
fn test_xpcall_handler() {
    check(
        r#"
        local ok, msg = xpcall(function() error("bad") end, function(m) return "handled: " .. m end)
        assert(not ok and msg == "handled: test:2: bad")
        local ok2, a, b = xpcall(function(x, y) return x + y, x * y end, print, 3, 4)
        assert(ok2 and a == 7 and b == 12)
        local ok3, tb = xpcall(function() error("deep") end, debug.traceback)
        assert(not ok3 and tb:find("stack traceback:"))
        local ok4, m4 = xpcall(function() error("x") end, function() error("again") end)
        assert(not ok4)
    "#,
    );
}

#[test]
fn test_pcall_edge_cases() {
    check(
        r##"
        local ok, err = pcall(nil)
        assert(not ok and err == "attempt to call a nil value")
        assert(select("#", pcall(function() end)) == 1)
        local ok2, v = pcall(pcall, error, "e")
        assert(ok2 == true and v == false)
        local ok3, err3 = pcall(error, {code = 1})
        assert(not ok3 and err3.code == 1)
        local ok4 = pcall(assert, false)
        assert(not ok4)
        local ok5, err5 = pcall(assert, nil, "custom message")
        assert(err5 == "custom message")
        local ok6, err6 = pcall(assert, false)
        assert(err6:find("assertion failed!"))
    "##,
    );
}

#[test]
fn test_stack_overflow_is_caught() {
    check(
        r#"
        local function rec(n) return 1 + rec(n + 1) end
        local ok, err = pcall(rec, 1)
        assert(not ok and err:find("stack overflow"))
    "#,
    );
}

#[test]
fn test_uncaught_error_from_rust() {
    let mut vm = new_vm();
    let err = run(&mut vm, "local x = nil\nreturn x.y").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index);
    let msg = err.to_string();
    assert!(msg.contains("test:2: attempt to index a nil value (local 'x')"), "{}", msg);

    let err = run(&mut vm, "error({})").unwrap_err();
    assert!(matches!(err.value(), LuaValue::Table(_)));

    let err = run(&mut vm, "error('top', 0)").unwrap_err();
    assert!(matches!(err.value(), LuaValue::String(s) if s.as_bytes() == b"top"));
}

#[test]
fn test_call_with_handler_from_rust() {
    let mut vm = new_vm();
    let f = run(&mut vm, "return function(a) error('fail ' .. a, 0) end").unwrap().remove(0);
    let h = run(&mut vm, "return function(m) return '<' .. m .. '>' end").unwrap().remove(0);
    let err = vm.call_with_handler(f.clone(), Some(h), vec![LuaValue::from("x")]).unwrap_err();
    assert!(matches!(err.value(), LuaValue::String(s) if s.as_bytes() == b"<fail x>"));
    let err = vm.call(f, vec![LuaValue::from("y")]).unwrap_err();
    assert!(matches!(err.value(), LuaValue::String(s) if s.as_bytes() == b"fail y"));
}

#[test]
fn test_syntax_errors() {
    let mut vm = new_vm();
    let err = run(&mut vm, "x = = 1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert!(err.to_string().contains("test:1:"), "{}", err);
    let err = run(&mut vm, "for i = 1 do end").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    let err = run(&mut vm, "local s = 'unclosed").unwrap_err();
    assert!(err.to_string().contains("unfinished string"), "{}", err);
    let err = run(&mut vm, "break").unwrap_err();
    assert!(err.to_string().contains("break"), "{}", err);
    check(
        r#"
        local f, msg = load("return +")
        assert(f == nil and msg:find("unexpected symbol"))
        local g, msg2 = load("x = ", "=chunk")
        assert(g == nil and msg2:find("^chunk:1:"))
        local function nested(n) return "return " .. ("("):rep(n) .. "1" .. (")"):rep(n) end
        assert(load(nested(30))() == 1)
        local deep, msg3 = load(nested(500))
        assert(deep == nil and msg3:find("chunk has too many syntax levels"))
    "#,
    );
}
