// Integration tests for the SandJS engine
//
// These tests verify the engine's behavior by compiling and running
// complete scripts and checking the results. Tests cover:
// - Arithmetic, comparison, bitwise and logical operators
// - Variables, scoping and name resolution
// - Control flow (if/else, loops, switch, break/continue)
// - Functions, recursion, closures and closure isolation
// - Constructors, methods and the prototype fallback
// - Host bindings, the instruction watchdog and error reporting

use sandjs::{Context, ExecOptions, Value, VM};

fn run(code: &str) -> Value {
    VM::new().run(code).unwrap_or_else(|e| panic!("script failed: {}\n{}", code, e))
}

fn num(n: f64) -> Value {
    Value::Number(n)
}

fn s(text: &str) -> Value {
    Value::string(text)
}

fn nums(ns: &[f64]) -> Value {
    Value::array(ns.iter().map(|n| Value::Number(*n)).collect())
}

// === Seed scenarios ===

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(run("2 + 3 * 4"), num(14.0));
    assert_eq!(run("(2 + 3) * 4"), num(20.0));
    assert_eq!(run("10 % 3"), num(1.0));
    assert_eq!(run("-3 + +\"4\""), num(1.0));
}

#[test]
fn test_variables_and_functions() {
    assert_eq!(run("var x=5; function f(n){ return n*n; } f(x)+x"), num(30.0));
}

#[test]
fn test_closure_isolation() {
    let code = "function mk(i){ var c=i; return function(){ c++; return c; }; } \
                var a=mk(10); var b=mk(100); [a(),a(),b(),a(),b()]";
    assert_eq!(run(code), nums(&[11.0, 12.0, 101.0, 13.0, 102.0]));
}

#[test]
fn test_closures_have_distinct_ids() {
    let code = "function mk(i){ var c=i; return function(){ return c; }; } [mk(1), mk(2)]";
    let result = run(code);
    match result {
        Value::Array(items) => {
            let items = items.lock().unwrap();
            match (&items[0], &items[1]) {
                (Value::Function(a), Value::Function(b)) => {
                    assert_ne!(a.closure_id(), 0);
                    assert_ne!(b.closure_id(), 0);
                    assert_ne!(a.closure_id(), b.closure_id());
                }
                other => panic!("expected two functions, got {:?}", other),
            }
        }
        other => panic!("expected an array, got {:?}", other),
    }
}

#[test]
fn test_recursion() {
    let factorial = "function fact(n){ if (n <= 1) { return 1; } return n * fact(n-1); } fact(5)";
    assert_eq!(run(factorial), num(120.0));

    let fib = "function fib(n){ if (n < 2) { return n; } return fib(n-1) + fib(n-2); } \
               var out = []; \
               for (var i = 0; i < 10; i++) { out.push(fib(i)); } \
               out";
    assert_eq!(run(fib), nums(&[0.0, 1.0, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 34.0]));
}

#[test]
fn test_host_bindings() {
    let mut vm = VM::new();
    let context: Context = vec![
        ("name".to_string(), Value::string("x")),
        (
            "greet".to_string(),
            Value::native("greet", |args, _this| {
                let n = args.first().map(|v| v.coerce_string()).unwrap_or_default();
                Ok(Value::string(format!("hi {}", n)))
            }),
        ),
    ];
    assert_eq!(vm.run_with("greet(name)", context).unwrap(), s("hi x"));
}

#[test]
fn test_compound_assignment_to_array_element() {
    assert_eq!(run("var a=[5]; a[0] |= 3; a[0]"), num(7.0));
}

#[test]
fn test_budget_error_on_infinite_loop() {
    let mut vm = VM::new();
    vm.set_max_instructions(10_000);
    let err = vm.run("while (true) {}").unwrap_err();
    assert!(err.is_budget(), "expected budget error, got {}", err);
}

#[test]
fn test_budget_is_exact() {
    // "1" compiles to exactly PushConst + Halt
    let mut vm = VM::new();
    let program = vm.compile("1").unwrap();
    assert_eq!(
        vm.execute_with(&program, Context::new(), ExecOptions { max_instructions: Some(2) })
            .unwrap(),
        num(1.0)
    );
    let err = vm
        .execute_with(&program, Context::new(), ExecOptions { max_instructions: Some(1) })
        .unwrap_err();
    assert!(err.is_budget());
}

// === Boundary behaviors ===

#[test]
fn test_out_of_range_element_set_extends_the_array() {
    assert_eq!(
        run("var a=[1]; a[3]=9; [a.length, a[1], a[3]]"),
        Value::array(vec![num(4.0), Value::Undefined, num(9.0)])
    );
}

#[test]
fn test_string_prototype_fallback() {
    assert_eq!(run("\"abc\".length"), num(3.0));
    assert_eq!(run("\"abc\".toUpperCase()"), s("ABC"));
    assert_eq!(run("var f = \"abc\".toUpperCase; f()"), s("ABC"));
    assert_eq!(run("\"hello world\".indexOf(\"world\")"), num(6.0));
    assert_eq!(run("\"a,b,c\".split(\",\").length"), num(3.0));
    assert_eq!(run("\"abcdef\".slice(1, -1)"), s("bcde"));
    assert_eq!(run("\"ab\"[1]"), s("b"));
}

#[test]
fn test_sibling_function_references() {
    assert_eq!(run("function f(){ return g(); } function g(){ return 7; } f()"), num(7.0));

    let nested = "function outer(){ \
                      function a(){ return 1; } \
                      function b(){ return a() + 1; } \
                      return b(); \
                  } outer()";
    assert_eq!(run(nested), num(2.0));
}

#[test]
fn test_returned_closure_captures_loop_variable_at_return() {
    // Shallow copy at return time: the closure sees the final value of
    // the induction variable, not per-iteration bindings
    let code = "function mk(){ var i; for (i = 0; i < 5; i++) {} \
                return function(){ return i; }; } mk()()";
    assert_eq!(run(code), num(5.0));
}

// === Operators ===

#[test]
fn test_bitwise_operators() {
    assert_eq!(run("5 & 3"), num(1.0));
    assert_eq!(run("5 | 3"), num(7.0));
    assert_eq!(run("5 ^ 3"), num(6.0));
    assert_eq!(run("1 << 4"), num(16.0));
    assert_eq!(run("-16 >> 2"), num(-4.0));
    assert_eq!(run("-1 >>> 28"), num(15.0));
    assert_eq!(run("~0"), num(-1.0));
    assert_eq!(run("\"12\" & 6"), num(4.0));
}

#[test]
fn test_division_follows_float_rules() {
    assert_eq!(run("1 / 0"), num(f64::INFINITY));
    assert_eq!(run("-1 / 0"), num(f64::NEG_INFINITY));
    match run("0 / 0") {
        Value::Number(n) => assert!(n.is_nan()),
        other => panic!("expected NaN, got {:?}", other),
    }
}

#[test]
fn test_division_by_container_is_a_tag_error() {
    let err = VM::new().run("[1,2] / 2").unwrap_err();
    assert!(err.is_runtime());
}

#[test]
fn test_equality_is_strict() {
    assert_eq!(run("1 == \"1\""), Value::Bool(false));
    assert_eq!(run("1 === 1"), Value::Bool(true));
    assert_eq!(run("null == undefined"), Value::Bool(false));
    assert_eq!(run("\"a\" != \"b\""), Value::Bool(true));
    // reference equality for containers
    assert_eq!(run("var a = [1]; var b = [1]; a == b"), Value::Bool(false));
    assert_eq!(run("var a = [1]; var b = a; a == b"), Value::Bool(true));
}

#[test]
fn test_comparisons() {
    assert_eq!(run("2 < 10"), Value::Bool(true));
    assert_eq!(run("\"abc\" < \"abd\""), Value::Bool(true));
    assert_eq!(run("\"10\" < \"9\""), Value::Bool(true));
    assert_eq!(run("NaN < 1"), Value::Bool(false));
    assert_eq!(run("NaN >= 1"), Value::Bool(false));
}

#[test]
fn test_logical_operators_return_operands() {
    assert_eq!(run("0 || 5"), num(5.0));
    assert_eq!(run("3 || 5"), num(3.0));
    assert_eq!(run("1 && 2"), num(2.0));
    assert_eq!(run("0 && 2"), num(0.0));
    // short-circuit must not evaluate the right side
    assert_eq!(run("null && neverDefined"), Value::Null);
    assert_eq!(run("1 || neverDefined"), num(1.0));
}

#[test]
fn test_typeof() {
    assert_eq!(run("typeof 1"), s("number"));
    assert_eq!(run("typeof \"x\""), s("string"));
    assert_eq!(run("typeof true"), s("boolean"));
    assert_eq!(run("typeof undefined"), s("undefined"));
    assert_eq!(run("typeof null"), s("object"));
    assert_eq!(run("typeof {}"), s("object"));
    assert_eq!(run("typeof []"), s("object"));
    assert_eq!(run("typeof function(){}"), s("function"));
    assert_eq!(run("typeof Math.abs"), s("function"));
}

#[test]
fn test_conditional_and_sequence() {
    assert_eq!(run("1 ? \"a\" : \"b\""), s("a"));
    assert_eq!(run("0 ? \"a\" : \"b\""), s("b"));
    assert_eq!(run("var x = (1, 2, 3); x"), num(3.0));
}

#[test]
fn test_update_expressions() {
    assert_eq!(run("var i=5; [i++, i, ++i, i]"), nums(&[5.0, 6.0, 7.0, 7.0]));
    assert_eq!(run("var i=5; [i--, i, --i, i]"), nums(&[5.0, 4.0, 3.0, 3.0]));
    assert_eq!(run("var a=[1]; [a[0]++, a[0], --a[0], a[0]]"), nums(&[1.0, 2.0, 1.0, 1.0]));
    assert_eq!(run("var o={n:1}; o.n++; ++o.n; o.n"), num(3.0));
}

#[test]
fn test_compound_assignment_forms() {
    assert_eq!(run("var x=10; x += 5; x -= 3; x *= 2; x /= 4; x"), num(6.0));
    assert_eq!(run("var x=7; x %= 4; x"), num(3.0));
    assert_eq!(run("var x=1; x <<= 4; x >>= 1; x"), num(8.0));
    assert_eq!(run("var o={n:1}; o.n += 41; o.n"), num(42.0));
}

// === Control flow ===

#[test]
fn test_if_else_chains() {
    let code = "function grade(n){ \
                    if (n >= 90) { return \"A\"; } \
                    else if (n >= 80) { return \"B\"; } \
                    else { return \"C\"; } \
                } [grade(95), grade(85), grade(10)]";
    assert_eq!(run(code), Value::array(vec![s("A"), s("B"), s("C")]));
}

#[test]
fn test_while_and_do_while() {
    assert_eq!(run("var n=0; while (n < 5) { n++; } n"), num(5.0));
    assert_eq!(run("var n=10; do { n++; } while (false); n"), num(11.0));
}

#[test]
fn test_for_with_break_and_continue() {
    let code = "var total = 0; \
                for (var i = 0; i < 10; i++) { \
                    if (i % 2 == 0) { continue; } \
                    if (i > 7) { break; } \
                    total += i; \
                } total";
    // 1 + 3 + 5 + 7
    assert_eq!(run(code), num(16.0));
}

#[test]
fn test_for_without_clauses() {
    assert_eq!(run("var i=0; for (;;) { i++; if (i == 3) { break; } } i"), num(3.0));
}

#[test]
fn test_for_in_over_object_and_array() {
    assert_eq!(
        run("var o={a:1,b:2,c:3}; var ks=[]; for (var k in o) { ks.push(k); } ks"),
        Value::array(vec![s("a"), s("b"), s("c")])
    );
    assert_eq!(
        run("var a=[10,20]; var ks=[]; for (var k in a) { ks.push(k); } ks"),
        Value::array(vec![s("0"), s("1")])
    );
    assert_eq!(
        run("var o={x:1,y:2}; var sum=0; for (var k in o) { sum += o[k]; } sum"),
        num(3.0)
    );
}

#[test]
fn test_nested_for_in() {
    let code = "var o={a:{n:1},b:{n:2}}; var total=0; \
                for (var k in o) { for (var k2 in o[k]) { total += o[k][k2]; } } total";
    assert_eq!(run(code), num(3.0));
}

#[test]
fn test_switch_fallthrough_and_default() {
    let fallthrough = "var r=[]; \
                       switch (2) { \
                           case 1: r.push(1); \
                           case 2: r.push(2); \
                           case 3: r.push(3); break; \
                           case 4: r.push(4); \
                       } r";
    assert_eq!(run(fallthrough), nums(&[2.0, 3.0]));

    let with_default = "function pick(n){ \
                            switch (n) { case 1: return \"one\"; default: return \"many\"; } \
                        } [pick(1), pick(5)]";
    assert_eq!(run(with_default), Value::array(vec![s("one"), s("many")]));

    // strict matching: no coercion between the discriminant and tests
    assert_eq!(
        run("var r=\"none\"; switch (\"1\") { case 1: r=\"num\"; break; } r"),
        s("none")
    );
}

#[test]
fn test_break_in_switch_binds_to_the_switch() {
    let code = "var out = []; \
                for (var i = 0; i < 3; i++) { \
                    switch (i) { case 1: break; default: out.push(i); } \
                } out";
    assert_eq!(run(code), nums(&[0.0, 2.0]));
}

// === Objects, arrays, constructors ===

#[test]
fn test_object_literals() {
    assert_eq!(run("var o = {a: 1, b: {c: 2}}; o.a + o.b.c"), num(3.0));
    assert_eq!(run("var k = \"dyn\"; var o = {[k]: 5}; o.dyn"), num(5.0));
    assert_eq!(run("var o = {1: \"one\"}; o[1]"), s("one"));
    assert_eq!(run("({}).missing"), Value::Undefined);
}

#[test]
fn test_chained_assignment() {
    assert_eq!(run("var o={}; var p={}; o.x = p.y = 5; [o.x, p.y]"), nums(&[5.0, 5.0]));
}

#[test]
fn test_array_methods() {
    assert_eq!(run("var a=[1,2]; a.push(3); a.length"), num(3.0));
    assert_eq!(run("var a=[1,2,3]; a.pop()"), num(3.0));
    assert_eq!(run("var a=[1,2,3]; a.shift(); a.join(\"-\")"), s("2-3"));
    assert_eq!(run("var a=[2,3]; a.unshift(1); a[0]"), num(1.0));
    assert_eq!(run("[1,2,3].indexOf(2)"), num(1.0));
    assert_eq!(run("[1,2,3].indexOf(9)"), num(-1.0));
    assert_eq!(run("[1,2,3].slice(1).join(\",\")"), s("2,3"));
    assert_eq!(run("[1,2].concat([3,4]).length"), num(4.0));
    assert_eq!(run("var a=[1,2,3]; a.reverse(); a.join(\"\")"), s("321"));
    assert_eq!(run("[1,2,3].includes(2)"), Value::Bool(true));
    assert_eq!(run("[1,2][5]"), Value::Undefined);
}

#[test]
fn test_constructors() {
    let code = "function Point(x, y){ this.x = x; this.y = y; } \
                var p = new Point(1, 2); p.x + p.y";
    assert_eq!(run(code), num(3.0));

    // an explicit object return replaces the instance
    assert_eq!(run("function C(){ return {v: 9}; } new C().v"), num(9.0));
    // a primitive return keeps the instance
    assert_eq!(run("function C(){ this.v = 1; return 5; } new C().v"), num(1.0));
    // well-known constructors dispatch to the host equivalents
    assert_eq!(run("new Array(3).length"), num(3.0));
    assert_eq!(run("new String(42)"), s("42"));
}

#[test]
fn test_methods_bind_this() {
    let code = "var o = { n: 41, get: function(){ return this.n + 1; } }; o.get()";
    assert_eq!(run(code), num(42.0));

    let nested = "var counter = { n: 0, bump: function(){ this.n++; return this.n; } }; \
                  counter.bump(); counter.bump()";
    assert_eq!(run(nested), num(2.0));
}

#[test]
fn test_constructor_methods_via_prototype_object() {
    let code = "function Stack(){ this.items = []; } \
                var st = new Stack(); \
                st.items.push(1); st.items.push(2); \
                st.items.length";
    assert_eq!(run(code), num(2.0));
}

#[test]
fn test_arguments_binding() {
    assert_eq!(run("function f(){ return arguments.length; } f(1, 2, 3)"), num(3.0));
    assert_eq!(run("function f(a){ return arguments[1]; } f(1, 99)"), num(99.0));
    // missing parameters default to undefined
    assert_eq!(run("function f(a, b){ return typeof b; } f(1)"), s("undefined"));
}

// === Built-ins ===

#[test]
fn test_math_builtins() {
    assert_eq!(run("Math.max(1, 9, 3)"), num(9.0));
    assert_eq!(run("Math.min(4, -2)"), num(-2.0));
    assert_eq!(run("Math.floor(2.7)"), num(2.0));
    assert_eq!(run("Math.ceil(2.1)"), num(3.0));
    assert_eq!(run("Math.abs(-5)"), num(5.0));
    assert_eq!(run("Math.pow(2, 10)"), num(1024.0));
    assert_eq!(run("Math.sqrt(81)"), num(9.0));
    assert_eq!(run("Math.round(2.5)"), num(3.0));
    assert_eq!(run("Math.floor(Math.PI)"), num(3.0));
    assert_eq!(run("var r = Math.random(); r >= 0 && r < 1"), Value::Bool(true));
}

#[test]
fn test_parse_and_coercion_builtins() {
    assert_eq!(run("parseInt(\"42px\")"), num(42.0));
    assert_eq!(run("parseInt(\"ff\", 16)"), num(255.0));
    assert_eq!(run("parseFloat(\"2.5rem\")"), num(2.5));
    assert_eq!(run("isNaN(parseFloat(\"x\"))"), Value::Bool(true));
    assert_eq!(run("isFinite(1 / 0)"), Value::Bool(false));
    assert_eq!(run("Number(\"3\") + 1"), num(4.0));
    assert_eq!(run("String(42) + \"!\""), s("42!"));
    assert_eq!(run("Boolean(0)"), Value::Bool(false));
    assert_eq!(run("Array(1, 2, 3).length"), num(3.0));
}

#[test]
fn test_json_builtins() {
    assert_eq!(run("JSON.parse(\"[1,2]\")[1]"), num(2.0));
    assert_eq!(run("JSON.parse(\"{\\\"a\\\": 5}\").a"), num(5.0));
    assert_eq!(run("JSON.stringify({a: 1, b: [true, null]})"), s("{\"a\":1,\"b\":[true,null]}"));
}

#[test]
fn test_static_constructor_properties() {
    assert_eq!(run("Object.keys({a:1,b:2}).length"), num(2.0));
    assert_eq!(run("Object.values({a:1,b:2})[1]"), num(2.0));
    assert_eq!(run("Array.isArray([])"), Value::Bool(true));
    assert_eq!(run("Array.isArray({})"), Value::Bool(false));
    assert_eq!(run("String.fromCharCode(104, 105)"), s("hi"));
    assert_eq!(run("Number.isInteger(4)"), Value::Bool(true));
    assert_eq!(run("Number.isInteger(4.5)"), Value::Bool(false));
}

#[test]
fn test_number_methods() {
    assert_eq!(run("(3.14159).toFixed(2)"), s("3.14"));
    assert_eq!(run("(255).toString(16)"), s("ff"));
    assert_eq!(run("(8).toString(2)"), s("1000"));
}

#[test]
fn test_template_literals() {
    assert_eq!(run("var x = 2; `a${x + 1}b`"), s("a3b"));
    assert_eq!(run("var who = \"world\"; `hello ${who}!`"), s("hello world!"));
    assert_eq!(run("`${1}${2}`"), s("12"));
}

#[test]
fn test_regex_literals() {
    assert_eq!(run("/ab+c/.test(\"xabbc\")"), Value::Bool(true));
    assert_eq!(run("/ab+c/.test(\"xac\")"), Value::Bool(false));
    assert_eq!(run("/[A-Z]/i.test(\"q\")"), Value::Bool(true));
    assert_eq!(run("\"a1b2\".replace(/[0-9]/g, \"\")"), s("ab"));
    assert_eq!(run("/a(b)c/.exec(\"abc\")[1]"), s("b"));
    assert_eq!(run("/x/.source"), s("x"));
}

// === VM lifecycle ===

#[test]
fn test_globals_persist_across_runs() {
    let mut vm = VM::new();
    vm.run("var counter = 1;").unwrap();
    vm.run("counter += 10;").unwrap();
    assert_eq!(vm.run("counter").unwrap(), num(11.0));
}

#[test]
fn test_context_entries_persist() {
    let mut vm = VM::new();
    let context: Context = vec![("seed".to_string(), num(7.0))];
    assert_eq!(vm.run_with("seed", context).unwrap(), num(7.0));
    assert_eq!(vm.run("seed + 1").unwrap(), num(8.0));
}

#[test]
fn test_reset_clears_user_globals_and_keeps_builtins() {
    let mut vm = VM::new();
    vm.run("var mine = 1;").unwrap();
    assert_eq!(vm.run("mine").unwrap(), num(1.0));

    vm.reset();
    let err = vm.run("mine").unwrap_err();
    assert!(err.is_runtime());
    assert!(err.message.contains("mine"), "unexpected message: {}", err.message);

    // built-ins are re-seeded
    assert_eq!(vm.run("Math.abs(-1)").unwrap(), num(1.0));
}

#[test]
fn test_reset_then_run_is_deterministic() {
    let code = "var xs = []; for (var i = 3; i > 0; i--) { xs.push(i * 2); } xs.join(\",\")";
    let mut vm = VM::new();
    let first = vm.run(code).unwrap();
    vm.reset();
    let second = vm.run(code).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_compile_once_execute_many() {
    let mut vm = VM::new();
    let program = vm.compile("var n = 2; n * 21").unwrap();
    assert_eq!(vm.execute(&program).unwrap(), num(42.0));
    assert_eq!(vm.execute(&program).unwrap(), num(42.0));
}

#[test]
fn test_state_reporting() {
    let mut vm = VM::new();
    let before = vm.state();
    assert!(!before.initialized);
    assert_eq!(before.call_depth, 0);

    vm.run("var answer = 42;").unwrap();
    let after = vm.state();
    assert!(after.initialized);
    assert!(after.global_names.iter().any(|n| n == "answer"));
    assert!(after.global_names.iter().any(|n| n == "Math"));
    assert_eq!(after.call_depth, 0);
}

#[test]
fn test_final_expression_is_the_result() {
    assert_eq!(run("1; 2; 3"), num(3.0));
    // a trailing declaration leaves no value
    assert_eq!(run("1; var x = 2;"), Value::Undefined);
}

// === Errors ===

#[test]
fn test_undefined_variable_reports_pc_and_suggestion() {
    let err = VM::new().run("var count = 1; coutn").unwrap_err();
    assert!(err.is_runtime());
    assert!(err.message.contains("coutn"));
    assert_eq!(err.opcode.as_deref(), Some("LOAD"));
    assert!(err.pc.is_some());
    assert_eq!(err.suggestion.as_deref(), Some("count"));
    // debug symbols are on by default, so the location is mapped
    assert!(err.location.is_some());
}

#[test]
fn test_call_of_non_callable() {
    let err = VM::new().run("var x = 5; x()").unwrap_err();
    assert!(err.is_runtime());
}

#[test]
fn test_property_access_on_nullish() {
    let err = VM::new().run("var o = null; o.x").unwrap_err();
    assert!(err.is_runtime());

    let err = VM::new().run("var u; u.x").unwrap_err();
    assert!(err.is_runtime());
}

#[test]
fn test_throw_surfaces_as_runtime_error() {
    let err = VM::new().run("throw \"boom\";").unwrap_err();
    assert!(err.is_runtime());
    assert!(err.message.contains("boom"), "unexpected message: {}", err.message);
}

#[test]
fn test_try_catch_is_accepted_and_ignored() {
    let code = "var x = 0; try { x = 1; } catch (e) { x = 2; } finally { x = x + 10; } x";
    assert_eq!(run(code), num(11.0));
}

#[test]
fn test_host_function_failures_become_runtime_errors() {
    let mut vm = VM::new();
    let context: Context = vec![(
        "explode".to_string(),
        Value::native("explode", |_args, _this| Err("kaboom".to_string())),
    )];
    let err = vm.run_with("explode()", context).unwrap_err();
    assert!(err.is_runtime());
    assert!(err.message.contains("kaboom"));
}

#[test]
fn test_unsupported_syntax_is_a_compile_error() {
    let err = VM::new().run("var = 1;").unwrap_err();
    assert!(err.is_compile());

    let err = VM::new().run("break;").unwrap_err();
    assert!(err.is_compile());

    let err = VM::new().run("1 = 2;").unwrap_err();
    assert!(err.is_compile());
}

// === Larger programs ===

#[test]
fn test_string_building_program() {
    let code = "function pad(n){ return n < 10 ? \"0\" + n : \"\" + n; } \
                var parts = []; \
                for (var i = 8; i < 12; i++) { parts.push(pad(i)); } \
                parts.join(\":\")";
    assert_eq!(run(code), s("08:09:10:11"));
}

#[test]
fn test_object_graph_program() {
    let code = "function Node(id){ this.id = id; this.edges = []; } \
                var a = new Node(\"a\"); var b = new Node(\"b\"); \
                a.edges.push(b); b.edges.push(a); \
                a.edges[0].edges[0].id";
    assert_eq!(run(code), s("a"));
}

#[test]
fn test_counter_factory_program() {
    let code = "function counter(start, step){ \
                    var value = start; \
                    return function(){ value += step; return value; }; \
                } \
                var tens = counter(0, 10); \
                var ones = counter(100, 1); \
                [tens(), tens(), ones(), tens(), ones()]";
    assert_eq!(run(code), nums(&[10.0, 20.0, 101.0, 30.0, 102.0]));
}

#[test]
fn test_shared_array_mutation_through_closure() {
    // Shallow capture copies the handle, so pushes through the closure
    // stay visible through the captured array's elements
    let code = "function mk(){ var xs = [1]; \
                    return function(n){ xs.push(n); return xs.length; }; } \
                var f = mk(); f(2); f(3)";
    assert_eq!(run(code), num(3.0));
}
