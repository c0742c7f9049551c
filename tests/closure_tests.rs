// ABOUTME: Closure semantics: scoping, parameters, unpacking, bound dicts, reflection

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

#[test]
fn test_basic_invocation() {
    assert_eq!(
        eval_source("|x, y| { $x + $y } :> $add\n$add(2, 3)"),
        Value::Num(5.0)
    );
}

#[test]
fn test_defining_scope_is_a_snapshot() {
    // `$k` is captured after the closure literal, so it is not in the
    // closure's defining scope
    let err = eval_error("|x| { $x * $k } :> $f\n10 :> $k\n$f(3)");
    assert_eq!(err.id().as_str(), "RILL-R005");

    // captured before the literal, it resolves
    assert_eq!(
        eval_source("10 :> $k\n|x| { $x * $k } :> $f\n$f(3)"),
        Value::Num(30.0)
    );
}

#[test]
fn test_lookup_roots_at_defining_scope_not_call_site() {
    // the block shadows nothing for the closure: its `$base` comes from
    // the top level where the closure was defined
    let source = "1 :> $base\n|| { $base } :> $f\n{ 99 :> $inner\n$f() }";
    assert_eq!(eval_source(source), Value::Num(1.0));
}

#[test]
fn test_invocation_does_not_leak_into_defining_scope() {
    let ast = parse("|x| { $x :> $local\n$local } :> $f\n$f(5)").unwrap();
    let mut ctx = RuntimeContext::default();
    let result = execute(&ast, &mut ctx).unwrap();
    assert_eq!(result.value, Value::Num(5.0));
    assert!(!result.variables.contains_key("local"));
    assert!(!result.variables.contains_key("x"));
}

#[test]
fn test_defaults_fill_missing_arguments() {
    assert_eq!(
        eval_source("|x, y ?? 10| { $x + $y } :> $f\n$f(1)"),
        Value::Num(11.0)
    );
    assert_eq!(
        eval_source("|x, y ?? 10| { $x + $y } :> $f\n$f(1, 2)"),
        Value::Num(3.0)
    );
}

#[test]
fn test_missing_argument_without_default_errors() {
    let err = eval_error("|x, y| { $x } :> $f\n$f(1)");
    assert_eq!(err.id().as_str(), "RILL-R001");
}

#[test]
fn test_too_many_arguments_errors() {
    let err = eval_error("|x| { $x } :> $f\n$f(1, 2)");
    assert_eq!(err.id().as_str(), "RILL-R001");
}

#[test]
fn test_parameter_type_checked() {
    let err = eval_error("|x: number| { $x } :> $f\n$f(\"s\")");
    assert_eq!(err.id().as_str(), "RILL-R001");
    assert_eq!(
        eval_source("|x: number| { $x } :> $f\n$f(4)"),
        Value::Num(4.0)
    );
}

#[test]
fn test_single_tuple_unpacks_positionally() {
    assert_eq!(
        eval_source("|a, b| { $a + $b } :> $f\n[1, 2] -> $f()"),
        Value::Num(3.0)
    );
}

#[test]
fn test_single_param_takes_tuple_whole() {
    assert_eq!(
        eval_source("|t| { $t.len } :> $f\n$f([1, 2, 3])"),
        Value::Num(3.0)
    );
}

#[test]
fn test_named_arguments() {
    assert_eq!(
        eval_source("|a, b| { $a - $b } :> $f\n$f(b: 1, a: 10)"),
        Value::Num(9.0)
    );
}

#[test]
fn test_unknown_named_argument_rejected() {
    let err = eval_error("|a| { $a } :> $f\n$f(zzz: 1)");
    assert_eq!(err.id().as_str(), "RILL-R002");
}

#[test]
fn test_parameterless_body_inherits_pipe_value() {
    assert_eq!(eval_source("\"hi\" -> || { $ }"), Value::Str("hi".to_string()));
}

#[test]
fn test_parameters_clear_pipe_value() {
    assert_eq!(
        eval_source("\"ctx\" -> |x| { $ }"),
        Value::Str(String::new())
    );
}

#[test]
fn test_dollar_parameter_dual_binds() {
    assert_eq!(eval_source("|$| { $ } :> $f\n$f(42)"), Value::Num(42.0));
}

#[test]
fn test_return_terminator_exits_closure() {
    let source = "|x| { ($x > 0) ? ($x -> return)\n\"negative\" } :> $f\n$f(5)";
    assert_eq!(eval_source(source), Value::Num(5.0));
    let source = "|x| { ($x > 0) ? ($x -> return)\n\"negative\" } :> $f\n$f(-1)";
    assert_eq!(eval_source(source), Value::Str("negative".to_string()));
}

#[test]
fn test_return_outside_closure_errors() {
    let err = eval_error("5 -> return");
    assert_eq!(err.id().as_str(), "RILL-R002");
}

#[test]
fn test_bound_dict_injected_for_bare_call() {
    let source = "[greeting: \"hi\", greet: |self| { $self.greeting }] :> $obj\n$obj.greet()";
    assert_eq!(eval_source(source), Value::Str("hi".to_string()));
}

#[test]
fn test_bound_dict_becomes_pipe_value() {
    let source = "[name: \"rill\", show: || { $.name }] :> $o\n$o.show()";
    assert_eq!(eval_source(source), Value::Str("rill".to_string()));
}

#[test]
fn test_closure_annotations_from_statement_frame() {
    assert_eq!(
        eval_source("^(doc: \"adds one\") |x| { $x + 1 } :> $f\n$f.^doc"),
        Value::Str("adds one".to_string())
    );
}

#[test]
fn test_missing_annotation_errors_and_coalesces() {
    let err = eval_error("|x| { $x } :> $f\n$f.^doc");
    assert_eq!(err.id().as_str(), "RILL-R008");
    assert_eq!(
        eval_source("|x| { $x } :> $f\n$f.^doc ?? \"none\""),
        Value::Str("none".to_string())
    );
}

#[test]
fn test_annotation_read_on_non_closure_errors() {
    let err = eval_error("5 :> $n\n$n.^doc");
    assert_eq!(err.id().as_str(), "RILL-R002");
}

#[test]
fn test_params_reflection() {
    let source = "|x: number ^(hint: \"count\"), y| { $x } :> $f\n$f.params";
    let value = eval_source(source);
    let Value::Dict(params) = value else {
        panic!("expected dict, got {:?}", value);
    };
    let Some(Value::Dict(x)) = params.get("x") else {
        panic!("missing param x");
    };
    assert_eq!(x.get("type"), Some(&Value::Str("number".to_string())));
    let Some(Value::Dict(annotations)) = x.get("__annotations") else {
        panic!("missing annotations on x");
    };
    assert_eq!(
        annotations.get("hint"),
        Some(&Value::Str("count".to_string()))
    );
    assert_eq!(params.get("y"), Some(&Value::Dict(Default::default())));
}

#[test]
fn test_params_on_non_closure_errors() {
    let err = eval_error("5 :> $n\n$n.params");
    assert_eq!(err.id().as_str(), "RILL-R002");
}

#[test]
fn test_script_callables_compare_structurally() {
    let a = eval_source("|x: number| { $x + 1 }");
    let b = eval_source("|x: number| { $x + 1 }");
    let c = eval_source("|x: number| { $x + 2 }");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_nested_closures_capture_lexically() {
    let source = "|x| { |y| { $x + $y } } :> $outer\n$outer(10) :> $inner\n$inner(5)";
    assert_eq!(eval_source(source), Value::Num(15.0));
}

#[test]
fn test_annotation_spread() {
    let source =
        "[doc: \"spread doc\"] :> $meta\n^(*$meta) |x| { $x } :> $f\n$f.^doc";
    assert_eq!(eval_source(source), Value::Str("spread doc".to_string()));
}

#[test]
fn test_inner_annotation_overrides_outer() {
    // the closure literal sees the statement's own frame merged over the
    // enclosing block's frame
    let source = "^(tag: \"outer\") {\n^(tag: \"inner\") || { $ } :> $f\n$f.^tag\n}";
    assert_eq!(eval_source(source), Value::Str("inner".to_string()));
}
