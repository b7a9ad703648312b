// Tests for coroutine library functions
use crate::test::{check, new_vm, run};
use crate::*;

#[test]
fn test_coroutine_create_resume() {
    check(
        r#"
        local co = coroutine.create(function(a, b)
            local c = coroutine.yield(a + b)
            local d, e = coroutine.yield(c * 2)
            return d + e
        end)
        assert(type(co) == "thread")
        local ok, v = coroutine.resume(co, 1, 2)
        assert(ok and v == 3)
        ok, v = coroutine.resume(co, 10)
        assert(ok and v == 20)
        ok, v = coroutine.resume(co, 4, 5)
        assert(ok and v == 9)
        assert(coroutine.status(co) == "dead")
        local ok2, err = coroutine.resume(co)
        assert(not ok2 and err == "cannot resume dead coroutine")
    "#,
    );
}

#[test]
fn test_coroutine_status() {
    check(
        r#"
        local co
        co = coroutine.create(function()
            assert(coroutine.status(co) == "running")
            coroutine.yield()
        end)
        assert(coroutine.status(co) == "suspended")
        coroutine.resume(co)
        assert(coroutine.status(co) == "suspended")
        coroutine.resume(co)
        assert(coroutine.status(co) == "dead")

        local outer
        outer = coroutine.create(function()
            local inner = coroutine.create(function()
                assert(coroutine.status(outer) == "normal")
            end)
            assert(coroutine.resume(inner))
        end)
        assert(coroutine.resume(outer))
    "#,
    );
}

#[test]
fn test_coroutine_errors() {
    check(
        r#"
        local co = coroutine.create(function() error("oops") end)
        local ok, err = coroutine.resume(co)
        assert(not ok and err:find("oops"))
        assert(coroutine.status(co) == "dead")

        local co2 = coroutine.create(function() error({code = 7}) end)
        local ok2, e2 = coroutine.resume(co2)
        assert(not ok2 and e2.code == 7)

        local self_resume
        self_resume = coroutine.create(function() return coroutine.resume(self_resume) end)
        local ok3, inner_ok, inner_err = coroutine.resume(self_resume)
        assert(ok3 and not inner_ok and inner_err == "cannot resume non-suspended coroutine")

        local okr, msg = pcall(coroutine.resume, 42)
        assert(not okr and msg:find("coroutine expected"))
    "#,
    );
}

#[test]
fn test_coroutine_wrap() {
    check(
        r#"
        local gen = coroutine.wrap(function(n)
            for i = 1, n do coroutine.yield(i) end
            return "done"
        end)
        assert(gen(3) == 1 and gen() == 2 and gen() == 3 and gen() == "done")
        local ok, err = pcall(gen)
        assert(not ok and err:find("cannot resume dead coroutine"))

        local bad = coroutine.wrap(function() error("inner") end)
        local ok2, err2 = pcall(bad)
        assert(not ok2 and err2:find("inner"))
    "#,
    );
}

#[test]
fn test_running_and_isyieldable() {
    check(
        r#"
        local main, ismain = coroutine.running()
        assert(type(main) == "thread" and ismain == true)
        assert(coroutine.isyieldable() == false)
        local co = coroutine.create(function()
            local me, m = coroutine.running()
            assert(type(me) == "thread" and m == false)
            assert(coroutine.isyieldable())
            return me
        end)
        local ok, me = coroutine.resume(co)
        assert(ok and me == co)
    "#,
    );
}

#[test]
fn test_yield_outside_coroutine() {
    check(
        r#"
        local ok, err = pcall(coroutine.yield, 1)
        assert(not ok and err:find("attempt to yield from outside a coroutine"))
    "#,
    );
}

#[test]
fn test_yield_across_pcall() {
    check(
        r#"
        local co = coroutine.create(function()
            local ok, v = pcall(function()
                local x = coroutine.yield("inside")
                return x * 2
            end)
            coroutine.yield(ok and v)
            local ok2, err = pcall(function()
                coroutine.yield("again")
                error("late")
            end)
            return ok2, err
        end)
        local _, a = coroutine.resume(co)
        assert(a == "inside")
        local _, b = coroutine.resume(co, 21)
        assert(b == 42)
        local _, c = coroutine.resume(co)
        assert(c == "again")
        local ok, ok2, err = coroutine.resume(co)
        assert(ok and ok2 == false and err:find("late"))
    "#,
    );
}

#[test]
fn test_yield_inside_metamethods() {
    check(
        r#"
        local function yielder(event) return function() return coroutine.yield(event) end end
        local mt = {}
        for _, e in ipairs({"__index", "__add", "__unm", "__len", "__lt", "__le", "__eq", "__concat"}) do
            mt[e] = yielder(e)
        end
        mt.__newindex = function(t, k, v) rawset(t, k, coroutine.yield("__newindex") .. v) end
        local a, b = setmetatable({}, mt), setmetatable({}, mt)

        local co = coroutine.wrap(function()
            local r = {}
            r.index = a.x
            r.add = a + 1
            r.unm = -a
            r.len = #a
            r.lt = a < b
            r.le = a <= b
            r.eq = a == b
            r.ne = a ~= b
            r.cat = "x" .. a .. "y"
            a.k = "v"
            r.set = rawget(a, "k")
            if a < b then r.branch = "then" else r.branch = "else" end
            return r
        end)

        assert(co() == "__index")
        assert(co(10) == "__add")
        assert(co(11) == "__unm")
        assert(co(-1) == "__len")
        assert(co(5) == "__lt")
        assert(co(true) == "__le")
        assert(co(false) == "__eq")
        assert(co(true) == "__eq")
        assert(co(true) == "__concat")
        assert(co("A") == "__newindex")
        assert(co("new-") == "__lt")
        local r = co(nil)
        assert(r.index == 10 and r.add == 11 and r.unm == -1 and r.len == 5)
        assert(r.lt == true and r.le == false and r.eq == true and r.ne == false)
        assert(r.cat == "xA" and r.set == "new-v" and r.branch == "else")
    "#,
    );
}

#[test]
fn test_yield_inside_concat_chain() {
    check(
        r#"
        local mt = {__concat = function(x, y) return coroutine.yield(y) end}
        local a = setmetatable({}, mt)
        local co = coroutine.wrap(function() return "x" .. 1 .. a .. 2 .. 3 end)
        assert(co() == "23")
        assert(co("M") == "x1M")

        local b = setmetatable({}, mt)
        co = coroutine.wrap(function() return a .. "-" .. b end)
        assert(co() == b)
        assert(co("Q") == "Q")
        assert(co("R") == "R")
    "#,
    );
}

#[test]
fn test_yield_inside_le_fallback_and_native_handler() {
    check(
        r#"
        local mt = {__lt = function(x, y) return coroutine.yield("lt") end}
        local c, d = setmetatable({}, mt), setmetatable({}, mt)
        local co = coroutine.wrap(function() return c <= d, c <= d end)
        assert(co() == "lt")
        assert(co(true) == "lt")
        local r1, r2 = co(false)
        assert(r1 == false and r2 == true)

        local t = setmetatable({}, {__index = coroutine.yield})
        co = coroutine.wrap(function() return t.foo + 1 end)
        local obj, key = co()
        assert(obj == t and key == "foo")
        assert(co(41) == 42)
    "#,
    );
}

#[test]
fn test_yield_inside_caught_metamethod_error() {
    check(
        r#"
        local mt = {__index = function(t, k)
            local v = coroutine.yield(k)
            if v == nil then error("no " .. k) end
            return v
        end}
        local t = setmetatable({}, mt)
        local co = coroutine.wrap(function()
            local ok, err = pcall(function() return t.a end)
            return ok, err, t.b
        end)
        assert(co() == "a")
        assert(co(nil) == "b")
        local ok, err, b = co(2)
        assert(ok == false and err:find("no a") and b == 2)
    "#,
    );
}

#[test]
fn test_yield_across_native_call_is_rejected() {
    check(
        r#"
        local t = setmetatable({}, {__tostring = function() return coroutine.yield("s") end})
        local co = coroutine.create(function() return tostring(t) end)
        local ok, err = coroutine.resume(co)
        assert(not ok and err:find("attempt to yield across a C%-call boundary"))
    "#,
    );
}

#[test]
fn test_generators_interleave() {
    check(
        r#"
        local function range(n)
            return coroutine.wrap(function() for i = 1, n do coroutine.yield(i) end end)
        end
        local a, b = range(3), range(3)
        local out = {}
        for i = 1, 3 do out[#out + 1] = a() * 10 + b() end
        assert(out[1] == 11 and out[2] == 22 and out[3] == 33)
        local sum = 0
        for v in range(4) do sum = sum + v end
        assert(sum == 10)
    "#,
    );
}

#[test]
fn test_resume_from_rust() {
    let mut vm = new_vm();
    let body = run(&mut vm, "return function(x) while true do x = coroutine.yield(x * 2) end end")
        .unwrap()
        .remove(0);
    let co = vm.new_thread(body);
    for i in 1..=3 {
        let r = vm.resume(&co, vec![LuaValue::Integer(i)]).unwrap();
        assert!(matches!(r[..], [LuaValue::Integer(v)] if v == i * 2));
    }
    assert_eq!(vm.status(&co), "suspended");
}
