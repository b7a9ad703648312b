// Debug library: frame inspection, hooks, upvalues and tracebacks
use crate::test::{check, new_vm, run};

#[test]
fn test_getinfo_levels_and_functions() {
    check(
        r#"
        local function where()
            local info = debug.getinfo(1, "Sl")
            return info.short_src, info.currentline, info.what
        end
        local src, line, what = where()
        assert(src == "test" and line == 3 and what == "Lua")

        local main = debug.getinfo(1, "S")
        assert(main.what == "main" and main.linedefined == 0)

        local function f(a, b, ...) end
        local fi = debug.getinfo(f)
        assert(fi.what == "Lua" and fi.linedefined == 12 and fi.lastlinedefined == 12)
        assert(fi.nparams == 2 and fi.isvararg == true and fi.nups == 0)
        assert(fi.func == f and fi.source == "=test")

        local ci = debug.getinfo(print)
        assert(ci.what == "C" and ci.short_src == "[C]" and ci.currentline == -1)

        assert(debug.getinfo(100) == nil)
        local ok, err = pcall(debug.getinfo, 1, "?")
        assert(not ok and err:find("invalid option"))

        local lines = debug.getinfo(where, "L").activelines
        assert(lines[3] and lines[4] and not lines[1])
    "#,
    );
}

#[test]
fn test_getinfo_names() {
    check(
        r#"
        local function named()
            local i = debug.getinfo(1, "n")
            return i.name, i.namewhat
        end
        local n, w = named()
        assert(n == "named" and w == "local")
        function global_fn() return debug.getinfo(1, "n").namewhat end
        assert(global_fn() == "global")
        local obj = {}
        function obj:method() local i = debug.getinfo(1, "n") return i end
        local mi = obj:method()
        assert(mi.name == "method" and mi.namewhat == "method")
        local function tail() return debug.getinfo(1, "t").istailcall end
        local function caller() return tail() end
        assert(caller() == true)
    "#,
    );
}

#[test]
fn test_getlocal_and_setlocal() {
    check(
        r#"
        local function probe(a, b)
            local c = a + b
            local names = {}
            local i = 1
            while true do
                local name, value = debug.getlocal(1, i)
                if not name then break end
                names[#names + 1] = name
                i = i + 1
            end
            return names
        end
        local names = probe(1, 2)
        assert(names[1] == "a" and names[2] == "b" and names[3] == "c")

        local function change()
            local x = 1
            debug.setlocal(1, 1, 42)
            return x
        end
        assert(change() == 42)

        local function outer()
            local secret = "s"
            local function peek()
                local n, v = debug.getlocal(2, 1)
                return n, v
            end
            local n, v = peek()
            return n, v
        end
        local name, value = outer()
        assert(name == "secret" and value == "s")

        assert(debug.getlocal(probe, 1) == "a" and debug.getlocal(probe, 2) == "b")
        assert(debug.getlocal(probe, 3) == nil)

        local function va(...) local n, v = debug.getlocal(1, -2) return n, v end
        local vn, vv = va("x", "y")
        assert(vn == "(*vararg)" and vv == "y")

        local ok, err = pcall(debug.getlocal, 50, 1)
        assert(not ok and err:find("level out of range"))
    "#,
    );
}

#[test]
fn test_upvalue_functions() {
    check(
        r#"
        local a, b = 1, 2
        local function f() return a + b end
        local function g() return a end
        local n1, v1 = debug.getupvalue(f, 1)
        local n2, v2 = debug.getupvalue(f, 2)
        assert(n1 == "a" and v1 == 1 and n2 == "b" and v2 == 2)
        assert(debug.getupvalue(f, 3) == nil)
        assert(debug.setupvalue(f, 2, 10) == "b")
        assert(f() == 11 and b == 10)

        assert(debug.upvalueid(f, 1) == debug.upvalueid(g, 1))
        assert(debug.upvalueid(f, 1) ~= debug.upvalueid(f, 2))
        local ok, err = pcall(debug.upvalueid, f, 5)
        assert(not ok and err:find("invalid upvalue index"))

        local x, y = "x", "y"
        local function fx() return x end
        local function fy() return y end
        debug.upvaluejoin(fx, 1, fy, 1)
        assert(fx() == "y")
        y = "changed"
        assert(fx() == "changed")
    "#,
    );
}

#[test]
fn test_hooks() {
    check(
        r#"
        local lines = {}
        local function on_line(event, line) lines[#lines + 1] = line end
        local function work()
            local s = 0
            s = s + 1
            return s
        end
        debug.sethook(on_line, "l")
        work()
        debug.sethook()
        local seen = {}
        for _, l in ipairs(lines) do seen[l] = true end
        assert(seen[5] and seen[6] and seen[7])
        assert(debug.gethook() == nil)

        local calls, returns = 0, 0
        debug.sethook(function(event)
            if event == "call" then calls = calls + 1 elseif event == "return" then returns = returns + 1 end
        end, "cr")
        work()
        debug.sethook()
        assert(calls >= 1 and returns >= 1)

        local counted = 0
        debug.sethook(function(event) if event == "count" then counted = counted + 1 end end, "", 10)
        for i = 1, 100 do end
        debug.sethook()
        assert(counted > 0)

        local h = function() end
        debug.sethook(h, "lc", 5)
        local fh, mask, count = debug.gethook()
        debug.sethook()
        assert(fh == h and mask == "cl" and count == 5)
    "#,
    );
}

#[test]
fn test_hook_error_cancels_execution() {
    check(
        r#"
        local ok, err = pcall(function()
            debug.sethook(function() debug.sethook() error("stop here") end, "l")
            local x = 1
            return x
        end)
        debug.sethook()
        assert(not ok and err:find("stop here"))
    "#,
    );
}

#[test]
fn test_traceback() {
    check(
        r#"
        local function lvl2() local tb = debug.traceback("msg") return tb end
        local function lvl1() return lvl2() end
        local tb = lvl1()
        assert(tb:find("^msg\nstack traceback:\n"))
        assert(tb:find("test:2: in "))
        assert(tb:find("main chunk"))
        assert(debug.traceback(nil):find("^stack traceback:"))
        local t = {}
        assert(debug.traceback(t) == t)

        local co = coroutine.create(function() local x = 1 coroutine.yield() end)
        coroutine.resume(co)
        local ctb = debug.traceback(co)
        assert(ctb:find("stack traceback:") and ctb:find("test:12:"))
        local info = debug.getinfo(co, 1, "l")
        assert(info and info.currentline == 12)
    "#,
    );
}

#[test]
fn test_debug_metatables_and_registry() {
    check(
        r#"
        local mt = {__index = function(n, k) return k end}
        debug.setmetatable(0, mt)
        assert((5).foo == "foo")
        assert(debug.getmetatable(1) == mt)
        debug.setmetatable(0, nil)
        assert(debug.getmetatable(1) == nil)
        local p = setmetatable({}, {__metatable = false})
        assert(getmetatable(p) == false and type(debug.getmetatable(p)) == "table")
        assert(type(debug.getregistry()) == "table")
        local ok, err = pcall(debug.setmetatable, {}, 1)
        assert(not ok and err:find("nil or table expected"))
    "#,
    );
}

#[test]
fn test_uncaught_error_carries_traceback() {
    let mut vm = new_vm();
    let err = run(&mut vm, "local function boom() error('deep') end\nboom()").unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("test:1: deep\nstack traceback:"), "{}", text);
    assert!(text.contains("in local 'boom'") || text.contains("in function"), "{}", text);
}
