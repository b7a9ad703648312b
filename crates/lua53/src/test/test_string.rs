// String library and pattern matching
use crate::test::check;

#[test]
fn test_string_basics() {
    check(
        r#"
        assert(string.len("abc") == 3 and ("abc"):len() == 3)
        assert(("hello"):sub(2, 4) == "ell" and ("hello"):sub(-3) == "llo")
        assert(("hello"):sub(0) == "hello" and ("hello"):sub(10) == "" and ("hello"):sub(3, 2) == "")
        assert(("MiXeD"):upper() == "MIXED" and ("MiXeD"):lower() == "mixed")
        assert(("ab"):rep(3) == "ababab" and ("ab"):rep(3, ",") == "ab,ab,ab" and ("x"):rep(0) == "")
        assert(("abc"):reverse() == "cba")
        local a, b, c = ("ABC"):byte(1, -1)
        assert(a == 65 and b == 66 and c == 67)
        assert(("A"):byte() == 65 and ("abc"):byte(10) == nil)
        assert(string.char(72, 105) == "Hi" and string.char() == "")
        local ok, err = pcall(string.char, 256)
        assert(not ok and err:find("value out of range"))
        assert(("x"):len() == 1 and #"\0a\0" == 3)
    "#,
    );
}

#[test]
fn test_string_find_and_match() {
    check(
        r#"
        assert(("hello world"):find("wor") == 7)
        local s, e = ("hello world"):find("o w")
        assert(s == 5 and e == 7)
        assert(("a.b"):find(".", 1, true) == 2)
        assert(("abc"):find("b", -1) == nil)
        assert(("abc"):find("") == 1)
        local s2, e2, cap = ("key=val"):find("(%w+)=")
        assert(s2 == 1 and e2 == 4 and cap == "key")

        assert(("hello 123"):match("%d+") == "123")
        local k, v = ("name = Lua"):match("(%w+)%s*=%s*(%w+)")
        assert(k == "name" and v == "Lua")
        assert(("abc"):match("()b()") == 2)
        assert(("  trim  "):match("^%s*(.-)%s*$") == "trim")
        assert(("[[x]]"):match("%b[]") == "[[x]]")
        assert(("THE (quick) fox"):find("%f[%a]%a+%f[%A]") == 1)
        assert(("aaa"):match("a-b") == nil and ("aaab"):match("a-b") == "aaab")
        assert(("abab"):match("(ab)%1") == "ab")
        assert(("x"):match("[%a_][%w_]*") == "x" and ("-5"):match("^[+-]?%d+$") == "-5")
    "#,
    );
}

#[test]
fn test_string_gmatch() {
    check(
        r#"
        local words = {}
        for w in ("one two three"):gmatch("%a+") do words[#words + 1] = w end
        assert(#words == 3 and words[3] == "three")
        local t = {}
        for k, v in ("a=1, b=2"):gmatch("(%w+)=(%w+)") do t[k] = tonumber(v) end
        assert(t.a == 1 and t.b == 2)
        local n = 0
        for _ in ("abc"):gmatch("") do n = n + 1 end
        assert(n == 4)
    "#,
    );
}

#[test]
fn test_string_gsub() {
    check(
        r#"
        local r, n = ("hello world"):gsub("o", "0")
        assert(r == "hell0 w0rld" and n == 2)
        assert(("hello"):gsub("l", "L", 1) == "heLlo")
        assert(("abc"):gsub("%w", "%0%0") == "aabbcc")
        assert(("hello world"):gsub("(%w+) (%w+)", "%2 %1") == "world hello")
        assert(("$name is $age"):gsub("%$(%w+)", {name = "Bob", age = 42}) == "Bob is 42")
        assert(("1 2 3"):gsub("%d", function(d) return d * 2 end) == "2 4 6")
        assert(("keep"):gsub("%w+", function() return nil end) == "keep")
        assert(("abc"):gsub("", "-") == "-a-b-c-")
        assert(("  x"):gsub("^%s+", "") == "x")
        local ok, err = pcall(string.gsub, "abc", "(", "x")
        assert(not ok and err:find("unfinished capture"))
        local ok2, err2 = pcall(string.gsub, "abc", "%w", "%9")
        assert(not ok2 and err2:find("invalid capture index"))
        local ok3, err3 = pcall(string.gsub, "abc", "%w", function() return {} end)
        assert(not ok3 and err3:find("invalid replacement value %(a table%)"))
        local ok4, err4 = pcall(string.gsub, "abc", "a", true)
        assert(not ok4 and err4:find("string/function/table expected"))
    "#,
    );
}

#[test]
fn test_pattern_errors() {
    check(
        r#"
        local ok, err = pcall(string.find, "a", "%")
        assert(not ok and err:find("malformed pattern %(ends with '%%'%)"))
        ok, err = pcall(string.find, "a", "[a")
        assert(not ok and err:find("missing ']'"))
        ok, err = pcall(string.match, "a", "%b")
        assert(not ok and err:find("missing arguments to '%%b'"))
        ok, err = pcall(string.match, "a", "a)")
        assert(not ok and err:find("invalid pattern capture"))
        ok, err = pcall(string.gsub, "a)", "a)", "b")
        assert(not ok and err:find("invalid pattern capture"))
        ok, err = pcall(function() for _ in string.gmatch("a)", "a)") do end end)
        assert(not ok and err:find("invalid pattern capture"))
        assert(string.find("xa)", "a)") == 2)
    "#,
    );
}

#[test]
fn test_string_format() {
    check(
        r#"
        assert(string.format("%d items", 3) == "3 items")
        assert(string.format("%5d|%-5d|%05d", 42, 42, 42) == "   42|42   |00042")
        assert(string.format("%x %X %o", 255, 255, 8) == "ff FF 10")
        assert(string.format("%.2f", 3.14159) == "3.14")
        assert(string.format("%e", 12345.678) == "1.234568e+04")
        assert(string.format("%g %g", 0.1, 1e20) == "0.1 1e+20")
        assert(string.format("%s %s %s", "a", 1, true) == "a 1 true")
        assert(string.format("%10.3s|", "abcdef") == "       abc|")
        assert(string.format("%c%c", 76, 117) == "Lu")
        assert(string.format("%%") == "%")
        assert(string.format("%q", 'a "quoted"\n') == '"a \\"quoted\\"\\\n"')
        assert(string.format("%q", 10) == "10")
        assert(string.format("%a", 1.0) == "0x1p+0")
        assert(string.format("%d", 3.0) == "3")
        local ok, err = pcall(string.format, "%d", 3.5)
        assert(not ok and err:find("number has no integer representation"))
        ok, err = pcall(string.format, "%y", 1)
        assert(not ok and err:find("invalid option '%%y' to 'format'"))
        ok, err = pcall(string.format, "%d")
        assert(not ok and err:find("no value"))
        local t = setmetatable({}, {__tostring = function() return "obj" end})
        assert(string.format("%s", t) == "obj")
    "#,
    );
}

#[test]
fn test_string_metatable_and_coercion() {
    check(
        r#"
        local s = "text"
        assert(s:upper() == "TEXT" and ("%d"):format(7) == "7")
        assert(getmetatable("").__index == string)
        assert(string.len(123) == 3 and ("10"):rep(2) == "1010")
        assert(("x"):rep(3, "") == "xxx")
        local ok = pcall(string.rep)
        assert(not ok)
    "#,
    );
}

#[test]
fn test_string_dump_and_load() {
    check(
        r#"
        local function add(a, b) return a + b end
        local bin = string.dump(add)
        assert(bin:sub(1, 4) == "\27Lua")
        local f = load(bin, "add", "b")
        assert(f(2, 3) == 5)
        local ok, err = pcall(string.dump, print)
        assert(not ok and err:find("unable to dump given function"))
    "#,
    );
}
