// Table library and table semantics
use crate::test::check;

#[test]
fn test_table_insert_remove() {
    check(
        r#"
        local t = {}
        table.insert(t, "a")
        table.insert(t, "c")
        table.insert(t, 2, "b")
        assert(#t == 3 and t[1] == "a" and t[2] == "b" and t[3] == "c")
        table.insert(t, 4, "d")
        assert(t[4] == "d")
        assert(table.remove(t) == "d" and #t == 3)
        assert(table.remove(t, 1) == "a" and t[1] == "b" and #t == 2)
        assert(table.remove({}) == nil)
        local e = {}
        assert(table.remove(e, 0) == nil and table.remove(e, 1) == nil)

        local ok, err = pcall(table.insert, {1, 2}, 5, "x")
        assert(not ok and err:find("bad argument #2 to 'table.insert' %(position out of bounds%)"))
        ok, err = pcall(table.insert, {}, 1, 2, 3)
        assert(not ok and err:find("wrong number of arguments to 'insert'"))
        ok, err = pcall(table.remove, {1, 2}, 7)
        assert(not ok and err:find("position out of bounds"))
    "#,
    );
}

#[test]
fn test_table_concat() {
    check(
        r#"
        assert(table.concat({1, 2, 3}) == "123")
        assert(table.concat({"a", "b", "c"}, ", ") == "a, b, c")
        assert(table.concat({"a", "b", "c"}, "-", 2) == "b-c")
        assert(table.concat({"a", "b", "c"}, "-", 2, 2) == "b")
        assert(table.concat({}, "x") == "" and table.concat({"a"}, "-", 3, 2) == "")
        assert(table.concat({1.5, "x"}) == "1.5x")
        local ok, err = pcall(table.concat, {1, {}, 3})
        assert(not ok and err:find("invalid value %(at index 2%) in table for 'concat'"))
    "#,
    );
}

#[test]
fn test_table_pack_unpack() {
    check(
        r##"
        local p = table.pack(1, nil, 3)
        assert(p.n == 3 and p[1] == 1 and p[2] == nil and p[3] == 3)
        assert(table.pack().n == 0)
        local a, b, c = table.unpack({1, 2, 3})
        assert(a == 1 and b == 2 and c == 3)
        local x, y = table.unpack({1, 2, 3}, 2)
        assert(x == 2 and y == 3)
        assert(select("#", table.unpack({}, 1, 3)) == 3)
        assert(select("#", table.unpack({1, 2}, 3, 2)) == 0)
        local u1, u2 = unpack({"u", "v"})
        assert(u1 == "u" and u2 == "v")
        local ok, err = pcall(table.unpack, {}, 1, 1e8)
        assert(not ok and err:find("too many results to unpack"))
    "##,
    );
}

#[test]
fn test_length_and_borders() {
    check(
        r#"
        local t = {1, 2, 3, nil, 5}
        local n = #t
        assert(n == 3 or n == 5)
        local s = {}
        for i = 1, 100 do s[i] = i end
        assert(#s == 100)
        s[100] = nil
        assert(#s == 99)
        local h = {}
        h[1] = 1; h[2] = 2; h[3] = 3
        assert(#h == 3)
    "#,
    );
}

#[test]
fn test_table_keys() {
    check(
        r#"
        local t = {}
        t[1.0] = "float one"
        assert(t[1] == "float one")
        t[2^53] = "big"
        assert(t[9007199254740992] == "big")
        t["1"] = "string one"
        assert(t[1] == "float one" and t["1"] == "string one")
        local k = {}
        t[k] = "table key"
        assert(t[k] == "table key")
        t[true] = "bool"
        assert(t[true] == "bool")
        local ok, err = pcall(function() t[nil] = 1 end)
        assert(not ok and err:find("index is nil"))
        ok, err = pcall(function() t[0/0] = 1 end)
        assert(not ok and err:find("index is NaN"))
        assert(t[nil] == nil)
    "#,
    );
}

#[test]
fn test_next_after_clearing() {
    check(
        r#"
        local t = {}
        for i = 1, 10 do t["k" .. i] = i end
        for k in pairs(t) do t[k] = nil end
        assert(next(t) == nil)
        local count = 0
        local u = {a = 1, b = 2, c = 3}
        for k, v in pairs(u) do
            if v == 2 then u[k] = nil end
            count = count + 1
        end
        assert(count == 3 and u.b == nil)
    "#,
    );
}

#[test]
fn test_table_constructors() {
    check(
        r#"
        local t = {[1] = "a", "b", x = 1, ["y"] = 2; 3}
        assert(t[1] == "b" and t[2] == 3 and t.x == 1 and t.y == 2)
        local src = "return {" .. string.rep("1,", 300) .. "}"
        local big = load(src)()
        assert(#big == 300)
        local function f() return 1, 2, 3 end
        local m = {f(), f()}
        assert(#m == 4)
        local n = {f(), (f())}
        assert(#n == 2)
    "#,
    );
}
