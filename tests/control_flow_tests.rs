// ABOUTME: Conditionals, loops, iteration limits, collection operators, iterators

use pretty_assertions::assert_eq;
use rill::{execute, parse, RillError, RuntimeContext, Value};

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

fn nums(values: &[f64]) -> Value {
    Value::Tuple(values.iter().map(|n| Value::Num(*n)).collect())
}

#[test]
fn test_conditional_branches() {
    assert_eq!(
        eval_source("(1 > 2) ? \"a\" ! \"b\""),
        Value::Str("b".to_string())
    );
    assert_eq!(
        eval_source("(2 > 1) ? \"a\" ! \"b\""),
        Value::Str("a".to_string())
    );
}

#[test]
fn test_truthiness_follows_emptiness() {
    assert_eq!(eval_source("\"\" ? \"t\" ! \"f\""), Value::Str("f".to_string()));
    assert_eq!(eval_source("0 ? \"t\" ! \"f\""), Value::Str("f".to_string()));
    assert_eq!(eval_source("[] ? \"t\" ! \"f\""), Value::Str("f".to_string()));
    assert_eq!(eval_source("5 ? \"t\" ! \"f\""), Value::Str("t".to_string()));
    // callables are always truthy
    assert_eq!(
        eval_source("|| { $ } :> $f\n$f ? \"t\" ! \"f\""),
        Value::Str("t".to_string())
    );
}

#[test]
fn test_absent_else_yields_empty_of_then_type() {
    assert_eq!(eval_source("(1 > 2) ? 5"), Value::Num(0.0));
    assert_eq!(eval_source("(1 > 2) ? \"x\""), Value::Str(String::new()));
}

#[test]
fn test_while_loop() {
    assert_eq!(eval_source("0 -> ($ < 5) @ { $ + 1 }"), Value::Num(5.0));
}

#[test]
fn test_while_loop_body_break() {
    assert_eq!(
        eval_source("0 -> ($ < 100) @ { ($ >= 3) ? break ! ($ + 1) }"),
        Value::Num(3.0)
    );
}

#[test]
fn test_do_while_runs_at_least_once() {
    assert_eq!(eval_source("0 -> @ { $ + 1 } ? ($ < 3)"), Value::Num(3.0));
    // condition false immediately still runs the body once
    assert_eq!(eval_source("10 -> @ { $ + 1 } ? ($ < 3)"), Value::Num(11.0));
}

#[test]
fn test_iteration_limit_annotation() {
    let err = eval_error("^(limit: 3) 0 -> ($ < 100) @ { $ + 1 }");
    assert_eq!(err.id().as_str(), "RILL-R013");
    let RillError::Runtime(runtime) = err else {
        panic!("expected runtime error");
    };
    let context = runtime.context.expect("limit errors carry context");
    assert_eq!(context["limit"], 3);
    assert!(context["iterations"].as_u64().unwrap() > 3);
}

#[test]
fn test_limit_annotation_floors() {
    let err = eval_error("^(limit: 2.9) 0 -> ($ < 100) @ { $ + 1 }");
    let RillError::Runtime(runtime) = err else {
        panic!("expected runtime error");
    };
    assert_eq!(runtime.context.unwrap()["limit"], 2);
}

#[test]
fn test_each_collects_results() {
    assert_eq!(eval_source("[1, 2, 3] -> each { $ * 2 }"), nums(&[2.0, 4.0, 6.0]));
}

#[test]
fn test_each_with_accumulator() {
    assert_eq!(eval_source("[1, 2, 3] -> each(0) { $@ + $ }"), Value::Num(6.0));
}

#[test]
fn test_fold_with_and_without_init() {
    assert_eq!(eval_source("[1, 2, 3] -> fold(10) { $@ + $ }"), Value::Num(16.0));
    assert_eq!(eval_source("[1, 2, 3] -> fold { $@ + $ }"), Value::Num(6.0));
    assert_eq!(eval_source("[] -> fold { $@ + $ }"), Value::Str(String::new()));
}

#[test]
fn test_map_and_filter() {
    assert_eq!(eval_source("[1, 2] -> map |x| { $x * 10 }"), nums(&[10.0, 20.0]));
    assert_eq!(
        eval_source("[1, 2, 3, 4] -> filter { $ > 2 }"),
        nums(&[3.0, 4.0])
    );
}

#[test]
fn test_break_in_sequential_each_ends_loop_with_value() {
    assert_eq!(
        eval_source("[1, 2, 3] -> each { ($ == 2) ? break ! $ }"),
        Value::Num(2.0)
    );
}

#[test]
fn test_break_escapes_parallel_map() {
    // map has parallel semantics and does not catch break; it escapes to
    // the top and errors
    let err = eval_error("[1, 2, 3] -> map { ($ == 2) ? break ! ($ * 2) }");
    assert_eq!(err.id().as_str(), "RILL-R002");
    assert!(format!("{}", err).contains("break"));
}

#[test]
fn test_string_iterates_by_character() {
    assert_eq!(
        eval_source("\"abc\" -> map { $.upper() }"),
        Value::Tuple(vec![
            Value::Str("A".to_string()),
            Value::Str("B".to_string()),
            Value::Str("C".to_string())
        ])
    );
}

#[test]
fn test_dict_iterates_entries_ascending() {
    assert_eq!(
        eval_source("[b: 2, a: 1] -> each { $ }"),
        Value::Tuple(vec![
            Value::Tuple(vec![Value::Str("a".to_string()), Value::Num(1.0)]),
            Value::Tuple(vec![Value::Str("b".to_string()), Value::Num(2.0)]),
        ])
    );
}

#[test]
fn test_accumulator_unavailable_outside_fold() {
    let err = eval_error("$@");
    assert_eq!(err.id().as_str(), "RILL-R005");
}

#[test]
fn test_range_iterator() {
    assert_eq!(eval_source("range(0, 4) -> each { $ }"), nums(&[0.0, 1.0, 2.0, 3.0]));
    assert_eq!(eval_source("range(1, 7, 2) -> each { $ }"), nums(&[1.0, 3.0, 5.0]));
    assert_eq!(eval_source("range(4, 0, -2) -> each { $ }"), nums(&[4.0, 2.0]));
}

#[test]
fn test_repeat_iterator() {
    assert_eq!(
        eval_source("repeat(\"x\", 3) -> each { $ }"),
        Value::Tuple(vec![
            Value::Str("x".to_string()),
            Value::Str("x".to_string()),
            Value::Str("x".to_string())
        ])
    );
}

#[test]
fn test_first_method_returns_positioned_iterator() {
    assert_eq!(eval_source("[5, 6] -> .first() :> $it\n$it.value"), Value::Num(5.0));
    assert_eq!(eval_source("[5, 6] -> .first() -> each { $ }"), nums(&[5.0, 6.0]));
    assert_eq!(
        eval_source("[] -> .first() :> $it\n$it.done"),
        Value::Bool(true)
    );
}

#[test]
fn test_user_defined_iterator_is_driven() {
    let source = "[done: false, value: 1, next: || { [done: true] }] -> each { $ }";
    assert_eq!(eval_source(source), nums(&[1.0]));
}

#[test]
fn test_filter_commutes_with_each_on_preserving_bodies() {
    // filtering before or after an each over a predicate-preserving body
    // gives the same result
    let a = eval_source("[1, 2, 3, 4] -> filter { $ > 2 } -> each { $ * 2 }");
    let b = eval_source("[1, 2, 3, 4] -> each { $ * 2 } -> filter { $ > 4 }");
    assert_eq!(a, b);
}

#[test]
fn test_loop_scope_does_not_leak_iteration_bindings() {
    let ast = parse("0 -> ($ < 2) @ { $ + 1 :> $step -> pass }").unwrap();
    let mut ctx = RuntimeContext::default();
    let result = execute(&ast, &mut ctx).unwrap();
    // `$step` was captured inside the loop body block, not at the top level
    assert!(!result.variables.contains_key("step"));
    assert_eq!(result.value, Value::Num(2.0));
}
