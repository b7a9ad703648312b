// Closures and upvalues
use crate::test::check;

#[test]
fn test_shared_upvalue() {
    check(
        r#"
        local function pair()
            local n = 0
            local function inc() n = n + 1 return n end
            local function get() return n end
            return inc, get
        end
        local inc, get = pair()
        inc(); inc()
        assert(get() == 2)
        local inc2, get2 = pair()
        inc2()
        assert(get2() == 1 and get() == 2)
    "#,
    );
}

#[test]
fn test_fresh_upvalue_per_iteration() {
    check(
        r#"
        local fs = {}
        for i = 1, 3 do fs[i] = function() return i end end
        assert(fs[1]() == 1 and fs[2]() == 2 and fs[3]() == 3)

        local gs = {}
        local j = 1
        while j <= 3 do
            local k = j
            gs[j] = function() k = k + 10 return k end
            j = j + 1
        end
        assert(gs[1]() == 11 and gs[1]() == 21 and gs[2]() == 12)
    "#,
    );
}

#[test]
fn test_upvalue_survives_frame() {
    check(
        r#"
        local function outer()
            local a, b = 1, 2
            local function mid()
                return function() a = a + b return a end
            end
            return mid()
        end
        local f = outer()
        assert(f() == 3 and f() == 5)
    "#,
    );
}

#[test]
fn test_recursive_local_function() {
    check(
        r#"
        local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end
        assert(fact(20) == 2432902008176640000)
        local even, odd
        function even(n) if n == 0 then return true end return odd(n - 1) end
        function odd(n) if n == 0 then return false end return even(n - 1) end
        assert(even(10) and odd(7))
    "#,
    );
}

#[test]
fn test_varargs_and_multiple_results() {
    check(
        r##"
        local function three() return 1, 2, 3 end
        local t = {three(), three()}
        assert(#t == 4)
        local a, b, c, d = three()
        assert(a == 1 and c == 3 and d == nil)
        local function tail(...) return select("#", ...), ... end
        local n, x = tail(three())
        assert(n == 3 and x == 1)
        assert((three()) == 1)
    "##,
    );
}

#[test]
fn test_deep_tail_calls() {
    check(
        r#"
        local function loop(n, acc) if n == 0 then return acc end return loop(n - 1, acc + 1) end
        assert(loop(100000, 0) == 100000)
    "#,
    );
}

#[test]
fn test_methods_and_self() {
    check(
        r#"
        local Account = {}
        Account.__index = Account
        function Account.new(b) return setmetatable({balance = b}, Account) end
        function Account:deposit(v) self.balance = self.balance + v return self end
        local acc = Account.new(10):deposit(5):deposit(1)
        assert(acc.balance == 16)
    "#,
    );
}
