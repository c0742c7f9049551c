// ABOUTME: Pipe-chain behavior: injection, captures, dispatch, destructuring, slices

use pretty_assertions::assert_eq;
use rill::{execute, parse, Callbacks, RillError, RuntimeContext, RuntimeContextOptions, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn eval_source(source: &str) -> Value {
    let ast = parse(source).unwrap_or_else(|e| panic!("parse failed: {}", e));
    let mut ctx = RuntimeContext::default();
    execute(&ast, &mut ctx)
        .unwrap_or_else(|e| panic!("execution failed: {}", e))
        .value
}

fn eval_error(source: &str) -> RillError {
    let ast = parse(source).unwrap_or_else(|e| panic!("parse failed: {}", e));
    let mut ctx = RuntimeContext::default();
    execute(&ast, &mut ctx).expect_err("expected an error")
}

#[test]
fn test_auto_injection_through_log_and_method() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        callbacks: Callbacks {
            on_log: Some(Rc::new(move |v: &Value| {
                sink.borrow_mut().push(format!("{}", v));
            })),
        },
        ..Default::default()
    })
    .unwrap();

    let ast = parse(r#""hello" -> log -> .len"#).unwrap();
    let result = execute(&ast, &mut ctx).unwrap();
    assert_eq!(result.value, Value::Num(5.0));
    assert_eq!(*seen.borrow(), vec!["hello".to_string()]);
}

#[test]
fn test_triple_quote_opening_newline_skip() {
    assert_eq!(
        eval_source("\"\"\"\nhello\n\"\"\""),
        Value::Str("hello\n".to_string())
    );
}

#[test]
fn test_dict_dispatch_with_default() {
    assert_eq!(
        eval_source(r#""red" -> [red: "stop", green: "go", default: "unknown"]"#),
        Value::Str("stop".to_string())
    );
    assert_eq!(
        eval_source(r#""blue" -> [red: "stop", green: "go", default: "unknown"]"#),
        Value::Str("unknown".to_string())
    );
}

#[test]
fn test_dict_dispatch_without_match_or_default_errors() {
    let err = eval_error(r#""blue" -> [red: "stop"]"#);
    assert_eq!(err.id().as_str(), "RILL-R009");
}

#[test]
fn test_dict_dispatch_callable_entry_receives_pipe_value() {
    assert_eq!(
        eval_source(r#""shout" -> [shout: |s| { $s.upper() }, default: "?"]"#),
        Value::Str("SHOUT".to_string())
    );
}

#[test]
fn test_existence_check_in_conditional() {
    let source = "[type: \"blocked\"] :> $r\n($r.?type) ? \"has\" ! \"no\"";
    assert_eq!(eval_source(source), Value::Str("has".to_string()));

    let source = "[type: \"blocked\"] :> $r\n($r.?missing) ? \"has\" ! \"no\"";
    assert_eq!(eval_source(source), Value::Str("no".to_string()));
}

#[test]
fn test_capture_terminator_and_snapshot() {
    let ast = parse("5 :> $n\n$n + 1").unwrap();
    let mut ctx = RuntimeContext::default();
    let result = execute(&ast, &mut ctx).unwrap();
    assert_eq!(result.value, Value::Num(6.0));
    assert_eq!(result.variables.get("n"), Some(&Value::Num(5.0)));
}

#[test]
fn test_inline_capture_passes_value_through() {
    let ast = parse("5 :> $n -> type").unwrap();
    let mut ctx = RuntimeContext::default();
    let result = execute(&ast, &mut ctx).unwrap();
    assert_eq!(result.value, Value::Str("number".to_string()));
    assert_eq!(result.variables.get("n"), Some(&Value::Num(5.0)));
}

#[test]
fn test_fat_arrow_capture_synonym() {
    assert_eq!(eval_source("5 => $n\n$n"), Value::Num(5.0));
}

#[test]
fn test_typed_capture_enforced() {
    assert_eq!(eval_source("5 :> $n: number\n$n"), Value::Num(5.0));
    let err = eval_error("5 :> $n: string");
    assert_eq!(err.id().as_str(), "RILL-R001");
}

#[test]
fn test_type_lock_on_recapture() {
    let err = eval_error("5 :> $x\n\"text\" :> $x");
    assert_eq!(err.id().as_str(), "RILL-R001");
    // same type re-capture is fine
    assert_eq!(eval_source("5 :> $x\n6 :> $x\n$x"), Value::Num(6.0));
}

#[test]
fn test_pipe_value_restored_after_nested_chain() {
    // the grouped chain rebinds `$` internally; the outer `$` is intact
    assert_eq!(
        eval_source(r#""hi" -> "{($ -> .upper())}-{$}""#),
        Value::Str("HI-hi".to_string())
    );
}

#[test]
fn test_undefined_variable() {
    let err = eval_error("$nope");
    assert_eq!(err.id().as_str(), "RILL-R005");
}

#[test]
fn test_unknown_function() {
    let err = eval_error("5 -> frobnicate");
    assert_eq!(err.id().as_str(), "RILL-R006");
}

#[test]
fn test_unknown_method() {
    let err = eval_error("5 -> .frobnicate()");
    assert_eq!(err.id().as_str(), "RILL-R007");
}

#[test]
fn test_destructure_positional() {
    assert_eq!(eval_source("[1, 2] -> [$a, $b]\n$a + $b"), Value::Num(3.0));
}

#[test]
fn test_destructure_ignore_and_rest() {
    assert_eq!(
        eval_source("[1, 2, 3, 4] -> [_, $b, *$rest]\n$rest"),
        Value::Tuple(vec![Value::Num(3.0), Value::Num(4.0)])
    );
}

#[test]
fn test_destructure_named_from_dict() {
    assert_eq!(
        eval_source("[kind: \"ok\", count: 2] -> [kind: $k]\n$k"),
        Value::Str("ok".to_string())
    );
}

#[test]
fn test_destructure_passes_value_through() {
    assert_eq!(
        eval_source("[1, 2] -> [$a, $b] -> .len"),
        Value::Num(2.0)
    );
}

#[test]
fn test_destructure_too_short_errors() {
    let err = eval_error("[1] -> [$a, $b]");
    assert_eq!(err.id().as_str(), "RILL-R002");
}

#[test]
fn test_slice_pipe_target_and_access() {
    assert_eq!(
        eval_source(r#""hello" -> [1:3]"#),
        Value::Str("el".to_string())
    );
    assert_eq!(
        eval_source("[1, 2, 3, 4] :> $xs\n$xs[::2]"),
        Value::Tuple(vec![Value::Num(1.0), Value::Num(3.0)])
    );
    assert_eq!(
        eval_source("[1, 2, 3, 4] :> $xs\n$xs[::-1]"),
        Value::Tuple(vec![
            Value::Num(4.0),
            Value::Num(3.0),
            Value::Num(2.0),
            Value::Num(1.0)
        ])
    );
    assert_eq!(
        eval_source("\"hello\" :> $s\n$s[-3:]"),
        Value::Str("llo".to_string())
    );
}

#[test]
fn test_type_assert_and_check_targets() {
    assert_eq!(eval_source("5 -> :number"), Value::Num(5.0));
    let err = eval_error("5 -> :string");
    assert_eq!(err.id().as_str(), "RILL-R001");

    assert_eq!(eval_source("5 -> ?string"), Value::Bool(false));
    assert_eq!(eval_source("5 -> ?number"), Value::Bool(true));
}

#[test]
fn test_string_template_as_pipe_target() {
    assert_eq!(
        eval_source(r#"5 -> "value: {$}""#),
        Value::Str("value: 5".to_string())
    );
}

#[test]
fn test_block_as_pipe_target() {
    assert_eq!(eval_source("5 -> { $ + 1 }"), Value::Num(6.0));
}

#[test]
fn test_closure_chain_target() {
    assert_eq!(eval_source("5 -> |x| { $x * 3 }"), Value::Num(15.0));
}

#[test]
fn test_field_access_chain() {
    assert_eq!(
        eval_source("[items: [[name: \"a\"], [name: \"b\"]]] :> $d\n$d.items[1].name"),
        Value::Str("b".to_string())
    );
}

#[test]
fn test_field_alternatives() {
    assert_eq!(
        eval_source("[title: \"T\"] :> $d\n$d.name|title"),
        Value::Str("T".to_string())
    );
}

#[test]
fn test_variable_keyed_and_computed_access() {
    assert_eq!(
        eval_source("[a: 1, b: 2] :> $d\n\"b\" :> $k\n$d.$k"),
        Value::Num(2.0)
    );
    assert_eq!(
        eval_source("[ab: 7] :> $d\n$d.(\"a\" + \"b\")"),
        Value::Num(7.0)
    );
}

#[test]
fn test_missing_field_errors() {
    let err = eval_error("[a: 1] :> $d\n$d.b");
    assert_eq!(err.id().as_str(), "RILL-R009");
}

#[test]
fn test_coalesce_on_empty_and_missing() {
    assert_eq!(
        eval_source("[a: \"\"] :> $d\n$d.a ?? \"fallback\""),
        Value::Str("fallback".to_string())
    );
    assert_eq!(
        eval_source("[a: 1] :> $d\n$d.missing ?? 42"),
        Value::Num(42.0)
    );
    assert_eq!(
        eval_source("[a: 7] :> $d\n$d.a ?? 42"),
        Value::Num(7.0)
    );
}

#[test]
fn test_interpolation_evaluates_expressions() {
    assert_eq!(
        eval_source(r#""2 + 2 = {2 + 2}""#),
        Value::Str("2 + 2 = 4".to_string())
    );
    assert_eq!(
        eval_source("[n: 3] :> $d\n\"total {$d.n}\""),
        Value::Str("total 3".to_string())
    );
}

#[test]
fn test_escaped_braces_in_templates() {
    assert_eq!(
        eval_source(r#""{{not interpolated}}""#),
        Value::Str("{not interpolated}".to_string())
    );
}

#[test]
fn test_arithmetic_and_comparison() {
    assert_eq!(eval_source("2 + 3 * 4"), Value::Num(14.0));
    assert_eq!(eval_source("(2 + 3) * 4"), Value::Num(20.0));
    assert_eq!(eval_source("10 % 3"), Value::Num(1.0));
    assert_eq!(eval_source("\"a\" + \"b\""), Value::Str("ab".to_string()));
    assert_eq!(eval_source("1 < 2 && 2 < 3"), Value::Bool(true));
    assert_eq!(eval_source("!true || false"), Value::Bool(false));
    assert_eq!(eval_source("[1, 2] == [1, 2]"), Value::Bool(true));
}

#[test]
fn test_division_by_zero() {
    let err = eval_error("1 / 0");
    assert_eq!(err.id().as_str(), "RILL-R002");
}

#[test]
fn test_mixed_type_arithmetic_rejected() {
    let err = eval_error("\"a\" + 1");
    assert_eq!(err.id().as_str(), "RILL-R002");
}

#[test]
fn test_pass_keeps_pipe_value() {
    assert_eq!(eval_source("5 -> pass"), Value::Num(5.0));
}

#[test]
fn test_spread_in_tuple_and_args() {
    assert_eq!(
        eval_source("[1, 2] :> $xs\n[*$xs, 3]"),
        Value::Tuple(vec![Value::Num(1.0), Value::Num(2.0), Value::Num(3.0)])
    );
}

#[test]
fn test_spread_in_dict_literal() {
    assert_eq!(
        eval_source("[a: 1] :> $d\n[*$d, b: 2] :> $e\n$e.a + $e.b"),
        Value::Num(3.0)
    );
}

#[test]
fn test_assert_passes_and_fails() {
    assert_eq!(eval_source("5 -> assert($ > 1)"), Value::Num(5.0));
    let err = eval_error("5 -> assert($ > 10, \"too small\")");
    assert_eq!(err.id().as_str(), "RILL-R014");
}

#[test]
fn test_error_expression_halts() {
    let err = eval_error("error(\"boom\")");
    assert_eq!(err.id().as_str(), "RILL-R014");
    assert!(format!("{}", err).contains("boom"));
}

#[test]
fn test_statement_value_threads_to_next_statement() {
    assert_eq!(eval_source("5\n$ + 1"), Value::Num(6.0));
}

#[test]
fn test_empty_dict_literal() {
    assert_eq!(eval_source("[:]"), Value::Dict(Default::default()));
    assert_eq!(eval_source("[:] -> .empty()"), Value::Bool(true));
}
