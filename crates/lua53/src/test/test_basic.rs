// Core language scenarios and the basic library
use crate::test::{check, new_vm, run};
use crate::*;

#[test]
fn test_fibonacci() {
    let mut vm = new_vm();
    let result = run(
        &mut vm,
        r#"
        local function fib(n)
          if n < 2 then return n end
          return fib(n-1) + fib(n-2)
        end
        return fib(10)
    "#,
    )
    .unwrap();
    assert!(matches!(result[..], [LuaValue::Integer(55)]));
}

#[test]
fn test_closure_counter() {
    let mut vm = new_vm();
    let result = run(
        &mut vm,
        r#"
        local function mk() local x = 0; return function() x = x + 1; return x end end
        local c = mk(); return c(), c(), c()
    "#,
    )
    .unwrap();
    assert!(matches!(
        result[..],
        [LuaValue::Integer(1), LuaValue::Integer(2), LuaValue::Integer(3)]
    ));
}

#[test]
fn test_coroutine_squares() {
    let mut vm = new_vm();
    let result = run(
        &mut vm,
        r#"
        local co = coroutine.create(function() for i=1,3 do coroutine.yield(i*i) end end)
        local a,b,c = ({coroutine.resume(co)})[2], ({coroutine.resume(co)})[2], ({coroutine.resume(co)})[2]
        local last = {coroutine.resume(co)}
        assert(#last == 1 and last[1] == true)
        assert(coroutine.status(co) == "dead")
        return a, b, c
    "#,
    )
    .unwrap();
    assert!(matches!(
        result[..],
        [LuaValue::Integer(1), LuaValue::Integer(4), LuaValue::Integer(9)]
    ));
}

#[test]
fn test_pcall_boom() {
    let mut vm = new_vm();
    let result = run(
        &mut vm,
        r#"
        local ok, err = pcall(function() error("boom") end)
        return ok, err
    "#,
    )
    .unwrap();
    assert!(matches!(result[0], LuaValue::Boolean(false)));
    let LuaValue::String(err) = &result[1] else {
        panic!("expected a string error, got {:?}", result[1]);
    };
    assert!(err.to_str_lossy().ends_with(": boom"), "{}", err.to_str_lossy());
}

#[test]
fn test_index_metatable_and_rawget() {
    let mut vm = new_vm();
    let result = run(
        &mut vm,
        r#"
        local base = {greet = "hi"}
        local t = setmetatable({}, {__index = base})
        return t.greet, rawget(t, "greet")
    "#,
    )
    .unwrap();
    assert_eq!(result.len(), 2);
    assert!(matches!(&result[0], LuaValue::String(s) if s.as_bytes() == b"hi"));
    assert!(result[1].is_nil());
}

#[test]
fn test_float_step_loop() {
    let mut vm = new_vm();
    let result = run(&mut vm, "local s = 0.0; for i = 0.0, 1.0, 0.25 do s = s + i end; return s").unwrap();
    assert!(matches!(result[..], [LuaValue::Float(f)] if (f - 2.5).abs() < 1e-12));
}

#[test]
fn test_numeric_for_edges() {
    check(
        r#"
        local n = 0
        for i = 1, 0 do n = n + 1 end
        assert(n == 0)
        for i = 10, 1, -3 do n = n + i end
        assert(n == 10 + 7 + 4 + 1)
        n = 0
        for i = 9223372036854775806, 9223372036854775807 do n = n + 1 end
        assert(n == 2)
        local ok, err = pcall(function() for i = 1, 10, 0 do end end)
        assert(not ok and err:find("'for' step is zero"))
        local ok2, err2 = pcall(function() for i = "a", 2 do end end)
        assert(not ok2 and err2:find("'for' initial value must be a number"))
    "#,
    );
}

#[test]
fn test_type_and_conversions() {
    check(
        r#"
        assert(type(nil) == "nil" and type(1) == "number" and type("") == "string")
        assert(type({}) == "table" and type(print) == "function")
        assert(type(coroutine.create(print)) == "thread")
        assert(tostring(10) == "10" and tostring(1.5) == "1.5" and tostring(2^53) == "9.007199254741e+15")
        assert(tostring(nil) == "nil" and tostring(true) == "true")
        assert(tostring(3.0) == "3.0" and tostring(-0.0) == "-0.0")
        assert(tonumber("0x10") == 16 and tonumber("  12  ") == 12 and tonumber("1e2") == 100.0)
        assert(tonumber("z", 36) == 35 and tonumber("ff", 16) == 255 and tonumber("8", 8) == nil)
        assert(tonumber("abc") == nil and tonumber({}) == nil)
        assert(10 // 3 == 3 and 10.0 // 3 == 3.0 and -7 // 2 == -4 and -7 % 3 == 2)
        assert(7 / 2 == 3.5 and 2^10 == 1024.0 and 3 | 4 == 7 and 1 << 63 == -9223372036854775807 - 1)
        assert("10" + 5 == 15 and "3" * "4" == 12 and 10 .. "" == "10")
        assert(#"hello" == 5 and -(-3) == 3 and ~0 == -1)
    "#,
    );
}

#[test]
fn test_select_and_varargs() {
    check(
        r##"
        local function f(...) return select("#", ...) end
        assert(f() == 0 and f(nil) == 1 and f(1, nil, nil) == 3)
        assert(select(2, "a", "b", "c") == "b")
        assert(select(-1, "a", "b", "c") == "c")
        local function pack2(...) return {...} end
        local t = pack2(1, 2, 3)
        assert(#t == 3)
        local ok, err = pcall(select, 0, 1)
        assert(not ok and err:find("bad argument #1 to 'select' %(index out of range%)"))
    "##,
    );
}

#[test]
fn test_raw_functions() {
    check(
        r#"
        local t = setmetatable({}, {
            __index = function() return "meta" end,
            __newindex = function() error("blocked") end,
            __len = function() return 42 end,
            __eq = function() return true end,
        })
        assert(t.x == "meta" and rawget(t, "x") == nil)
        rawset(t, "x", 1)
        assert(t.x == 1)
        assert(#t == 42 and rawlen(t) == 0 and rawlen("abc") == 3)
        local u = setmetatable({}, getmetatable(t))
        assert(t == u and not rawequal(t, u) and rawequal(t, t))
    "#,
    );
}

#[test]
fn test_pairs_and_ipairs() {
    check(
        r#"
        local t = {10, 20, 30, x = 1, y = 2}
        local n, sum = 0, 0
        for k, v in pairs(t) do n = n + 1; sum = sum + v end
        assert(n == 5 and sum == 63)

        local seq = {}
        for i, v in ipairs({1, 2, nil, 4}) do seq[#seq + 1] = v end
        assert(#seq == 2)

        local proxy = setmetatable({}, {__index = function(_, i) if i <= 3 then return i * 10 end end})
        local got = 0
        for i, v in ipairs(proxy) do got = got + v end
        assert(got == 60)

        local custom = setmetatable({}, {__pairs = function(t) return function(_, k) if not k then return 1, "one" end end, t, nil end})
        for k, v in pairs(custom) do assert(k == 1 and v == "one") end

        local k, v = next({})
        assert(k == nil)
        local ok, err = pcall(next, {}, "missing")
        assert(not ok)
    "#,
    );
}

#[test]
fn test_goto_and_blocks() {
    check(
        r#"
        local i, out = 1, {}
        ::top::
        if i <= 3 then
            out[#out + 1] = i
            i = i + 1
            goto top
        end
        assert(#out == 3)

        for j = 1, 3 do
            for k = 1, 3 do
                if k == 2 then goto continue end
                out[#out + 1] = j * 10 + k
                ::continue::
            end
        end
        assert(#out == 9)

        local x = 0
        repeat local y = x; x = x + 1 until y >= 2
        assert(x == 3)
    "#,
    );
}

#[test]
fn test_goto_into_local_scope_is_rejected() {
    let mut vm = new_vm();
    let err = run(&mut vm, "goto f; local x; ::f:: print(x)").unwrap_err();
    assert!(err.to_string().contains("jumps into the scope of local 'x'"), "{}", err);
}

#[test]
fn test_determinism_across_vms() {
    let src = "local t = {} for i = 1, 100 do t[i] = i * i end local s = 0 for _, v in ipairs(t) do s = s + v end return s";
    let a = run(&mut new_vm(), src).unwrap();
    let b = run(&mut new_vm(), src).unwrap();
    assert!(matches!((&a[..], &b[..]), ([LuaValue::Integer(x)], [LuaValue::Integer(y)]) if x == y && *x == 338350));
}

#[test]
fn test_version_and_globals() {
    let mut vm = new_vm();
    vm.set_global("answer", LuaValue::Integer(42));
    let result = run(&mut vm, "assert(_VERSION == 'Lua 5.3') return answer, _G.answer").unwrap();
    assert!(matches!(result[..], [LuaValue::Integer(42), LuaValue::Integer(42)]));
}
