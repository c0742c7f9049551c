// ABOUTME: Host surface: registration, validation, observability, cancellation, stepping

use pretty_assertions::assert_eq;
use rill::{
    documentation_coverage, execute, get_functions, parse, CancelSignal, FunctionDef,
    Observability, ParamDef, RillError, RuntimeContext, RuntimeContextOptions, Stepper,
    TypedFunction, Value,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

fn ctx_with(functions: Vec<(String, FunctionDef)>) -> RuntimeContext {
    RuntimeContext::new(RuntimeContextOptions {
        functions,
        ..Default::default()
    })
    .unwrap()
}

fn run_in(ctx: &mut RuntimeContext, source: &str) -> Result<Value, RillError> {
    let ast = parse(source)?;
    execute(&ast, ctx).map(|r| r.value)
}

#[test]
fn test_raw_function_receives_injected_pipe_value() {
    let mut ctx = ctx_with(vec![(
        "echo".to_string(),
        FunctionDef::Raw(Box::new(|args| Ok(args[0].clone()))),
    )]);
    assert_eq!(
        run_in(&mut ctx, "\"x\" -> echo").unwrap(),
        Value::Str("x".to_string())
    );
}

#[test]
fn test_typed_function_validates_before_dispatch() {
    let called = Rc::new(Cell::new(false));
    let witness = Rc::clone(&called);
    let mut ctx = ctx_with(vec![(
        "double".to_string(),
        FunctionDef::Typed(TypedFunction {
            params: vec![ParamDef {
                name: "n".to_string(),
                type_name: Some("number".to_string()),
                description: None,
                default: None,
            }],
            f: Box::new(move |args| {
                witness.set(true);
                let Value::Num(n) = &args[0] else {
                    return Err("not a number".to_string());
                };
                Ok(Value::Num(n * 2.0))
            }),
            description: Some("doubles a number".to_string()),
            return_type: Some("number".to_string()),
        }),
    )]);

    let err = run_in(&mut ctx, "\"s\" -> double").unwrap_err();
    assert_eq!(err.id().as_str(), "RILL-R001");
    assert!(!called.get(), "host fn must not run on a type error");

    assert_eq!(run_in(&mut ctx, "5 -> double").unwrap(), Value::Num(10.0));
    assert!(called.get());
}

#[test]
fn test_typed_function_defaults_apply() {
    let mut ctx = ctx_with(vec![(
        "greet".to_string(),
        FunctionDef::Typed(TypedFunction {
            params: vec![ParamDef {
                name: "who".to_string(),
                type_name: Some("string".to_string()),
                description: None,
                default: Some(Value::Str("world".to_string())),
            }],
            f: Box::new(|args| Ok(Value::Str(format!("hello {}", args[0])))),
            description: None,
            return_type: Some("string".to_string()),
        }),
    )]);
    assert_eq!(
        run_in(&mut ctx, "greet()").unwrap(),
        Value::Str("hello world".to_string())
    );
    assert_eq!(
        run_in(&mut ctx, "greet(\"rill\")").unwrap(),
        Value::Str("hello rill".to_string())
    );
}

#[test]
fn test_zero_param_typed_function_skips_injection() {
    let mut ctx = ctx_with(vec![(
        "version".to_string(),
        FunctionDef::Typed(TypedFunction {
            params: vec![],
            f: Box::new(|args| {
                if !args.is_empty() {
                    return Err("expected no arguments".to_string());
                }
                Ok(Value::Str("1.0".to_string()))
            }),
            description: None,
            return_type: Some("string".to_string()),
        }),
    )]);
    assert_eq!(
        run_in(&mut ctx, "\"ignored\" -> version").unwrap(),
        Value::Str("1.0".to_string())
    );
}

#[test]
fn test_host_error_carries_function_name() {
    let mut ctx = ctx_with(vec![(
        "explode".to_string(),
        FunctionDef::Raw(Box::new(|_args| Err("kaboom".to_string()))),
    )]);
    let err = run_in(&mut ctx, "explode()").unwrap_err();
    assert_eq!(err.id().as_str(), "RILL-R002");
    let text = format!("{}", err);
    assert!(text.contains("explode"));
    assert!(text.contains("kaboom"));
}

#[test]
fn test_observability_events_fire_in_order() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let push = |tag: &'static str, events: &Rc<RefCell<Vec<String>>>| {
        let events = Rc::clone(events);
        move |detail: String| events.borrow_mut().push(format!("{}:{}", tag, detail))
    };

    let step_start = push("start", &events);
    let step_end = push("end", &events);
    let host_call = push("host", &events);
    let fn_return = push("return", &events);
    let capture = push("capture", &events);

    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        functions: vec![(
            "shout".to_string(),
            FunctionDef::Raw(Box::new(|args| {
                Ok(Value::Str(format!("{}", args[0]).to_uppercase()))
            })),
        )],
        observability: Observability {
            on_step_start: Some(Rc::new(move |index, _span| step_start(index.to_string()))),
            on_step_end: Some(Rc::new(move |index, _value, _elapsed| {
                step_end(index.to_string())
            })),
            on_host_call: Some(Rc::new(move |name, _args| host_call(name.to_string()))),
            on_function_return: Some(Rc::new(move |name, _value| fn_return(name.to_string()))),
            on_capture: Some(Rc::new(move |name, _value| capture(name.to_string()))),
            on_error: None,
        },
        ..Default::default()
    })
    .unwrap();

    run_in(&mut ctx, "\"hi\" -> shout :> $loud").unwrap();
    let seen = events.borrow().clone();
    assert_eq!(
        seen,
        vec![
            "start:0".to_string(),
            "host:shout".to_string(),
            "return:shout".to_string(),
            "capture:loud".to_string(),
            "end:0".to_string(),
        ]
    );
}

#[test]
fn test_on_error_fires_once_with_the_surfaced_error() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        observability: Observability {
            on_error: Some(Rc::new(move |e| {
                sink.borrow_mut().push(e.id.as_str().to_string());
            })),
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();
    let err = run_in(&mut ctx, "$missing").unwrap_err();
    assert_eq!(err.id().as_str(), "RILL-R005");
    assert_eq!(*seen.borrow(), vec!["RILL-R005".to_string()]);
}

#[test]
fn test_auto_exception_on_string_statement_value() {
    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        auto_exceptions: vec!["(?i)^error:".to_string()],
        ..Default::default()
    })
    .unwrap();
    let err = run_in(&mut ctx, "\"ERROR: model refused\"").unwrap_err();
    assert_eq!(err.id().as_str(), "RILL-R012");
    let RillError::Runtime(runtime) = err else {
        panic!("expected runtime error");
    };
    let context = runtime.context.unwrap();
    assert_eq!(context["pattern"], "(?i)^error:");
    assert_eq!(context["value"], "ERROR: model refused");

    // non-string and non-matching values pass
    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        auto_exceptions: vec!["(?i)^error:".to_string()],
        ..Default::default()
    })
    .unwrap();
    assert_eq!(
        run_in(&mut ctx, "\"all good\"").unwrap(),
        Value::Str("all good".to_string())
    );
}

#[test]
fn test_cancellation_aborts_before_statements() {
    let signal = CancelSignal::new();
    signal.cancel();
    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        signal: Some(signal),
        ..Default::default()
    })
    .unwrap();
    let err = run_in(&mut ctx, "1 + 1").unwrap_err();
    assert_eq!(err.id().as_str(), "RILL-R011");
}

#[test]
fn test_timeout_on_slow_host_call() {
    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        timeout: Some(1),
        functions: vec![(
            "slow".to_string(),
            FunctionDef::Raw(Box::new(|_args| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(Value::Str("done".to_string()))
            })),
        )],
        ..Default::default()
    })
    .unwrap();
    let err = run_in(&mut ctx, "slow()").unwrap_err();
    assert_eq!(err.id().as_str(), "RILL-R010");
    assert!(format!("{}", err).contains("slow"));
}

#[test]
fn test_initial_variables_are_bound() {
    let mut ctx = RuntimeContext::new(RuntimeContextOptions {
        variables: BTreeMap::from([("seed".to_string(), Value::Num(7.0))]),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(run_in(&mut ctx, "$seed * 2").unwrap(), Value::Num(14.0));
}

#[test]
fn test_stepper_walks_statements() {
    let ast = parse("1\n$ + 1\n$ * 10").unwrap();
    let ctx = RuntimeContext::default();
    let mut stepper = Stepper::new(&ast, ctx);

    assert_eq!(stepper.total(), 3);
    assert!(!stepper.done());
    assert_eq!(stepper.step().unwrap(), Some(Value::Num(1.0)));
    assert_eq!(stepper.index(), 1);
    assert_eq!(stepper.step().unwrap(), Some(Value::Num(2.0)));
    assert_eq!(stepper.step().unwrap(), Some(Value::Num(20.0)));
    assert!(stepper.done());
    assert_eq!(stepper.step().unwrap(), None);
    assert_eq!(stepper.into_result().value, Value::Num(20.0));
}

#[test]
fn test_stepper_surfaces_errors() {
    let ast = parse("1\n$missing").unwrap();
    let ctx = RuntimeContext::default();
    let mut stepper = Stepper::new(&ast, ctx);
    stepper.step().unwrap();
    let err = stepper.step().unwrap_err();
    assert_eq!(err.id().as_str(), "RILL-R005");
}

#[test]
fn test_get_functions_reports_script_callables_as_any() {
    let mut ctx = RuntimeContext::default();
    run_in(&mut ctx, "|x: number| { $x } :> $double").unwrap();
    let functions = get_functions(&ctx);
    let info = functions.iter().find(|f| f.name == "double").unwrap();
    assert_eq!(info.return_type, "any");
    assert_eq!(info.params.len(), 1);
    assert_eq!(info.params[0].type_name.as_deref(), Some("number"));
}

#[test]
fn test_documentation_coverage_rounding() {
    let described = |text: &str| Some(text.to_string());
    let ctx = RuntimeContext::new(RuntimeContextOptions {
        functions: vec![
            (
                "a".to_string(),
                FunctionDef::Typed(TypedFunction {
                    params: vec![],
                    f: Box::new(|_| Ok(Value::Num(0.0))),
                    description: described("documented"),
                    return_type: None,
                }),
            ),
            (
                "b".to_string(),
                FunctionDef::Typed(TypedFunction {
                    params: vec![],
                    f: Box::new(|_| Ok(Value::Num(0.0))),
                    description: None,
                    return_type: None,
                }),
            ),
            (
                "c".to_string(),
                FunctionDef::Typed(TypedFunction {
                    params: vec![],
                    f: Box::new(|_| Ok(Value::Num(0.0))),
                    description: None,
                    return_type: None,
                }),
            ),
        ],
        ..Default::default()
    })
    .unwrap();
    let report = documentation_coverage(&ctx);
    assert_eq!(report.total, 3);
    assert_eq!(report.documented, 1);
    assert_eq!(report.percentage, 33.33);
}
