// ABOUTME: Callable invocation: closures, builtins, and host functions

use super::expr::eval_expr;
use super::{eval_body, in_child_scope};
use crate::ast::{Arg, ClosureLit};
use crate::context::RuntimeContext;
use crate::error::{EvalResult, Flow, RuntimeError};
use crate::span::Span;
use crate::value::{type_matches, Callable, HostFn, RuntimeFn, ScriptFn, ScriptParam, Value};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

/// Evaluated arguments of one call.
pub(crate) struct ArgValues {
    pub positional: Vec<Value>,
    pub named: IndexMap<String, Value>,
}

impl ArgValues {
    pub fn empty() -> Self {
        ArgValues {
            positional: Vec::new(),
            named: IndexMap::new(),
        }
    }

    pub fn positional(values: Vec<Value>) -> Self {
        ArgValues {
            positional: values,
            named: IndexMap::new(),
        }
    }
}

pub(crate) fn eval_args(args: &[Arg], ctx: &mut RuntimeContext) -> Result<ArgValues, Flow> {
    let mut out = ArgValues::empty();
    for arg in args {
        match arg {
            Arg::Pos(expr) => out.positional.push(eval_expr(expr, ctx)?),
            Arg::Named { name, value, .. } => {
                let v = eval_expr(value, ctx)?;
                out.named.insert(name.clone(), v);
            }
            Arg::Spread { expr, span } => match eval_expr(expr, ctx)? {
                Value::Tuple(items) => out.positional.extend(items),
                Value::Args(map) => out.named.extend(map),
                Value::Dict(map) => out.named.extend(map),
                other => {
                    return Err(Flow::Error(RuntimeError::operation(
                        format!("cannot spread {} into arguments", other.type_name()),
                        Some(*span),
                    )));
                }
            },
        }
    }
    Ok(out)
}

/// Evaluate a closure literal into a script callable. Closure-level
/// annotations come from the current frame; parameter annotations are
/// evaluated here, once.
pub(crate) fn make_closure(lit: &ClosureLit, ctx: &mut RuntimeContext) -> EvalResult {
    let mut params = Vec::new();
    for p in &lit.params {
        let mut annotations = BTreeMap::new();
        for arg in &p.annotations {
            match arg {
                crate::ast::AnnotationArg::Named { name, value, .. } => {
                    let v = eval_expr(value, ctx)?;
                    annotations.insert(name.clone(), v);
                }
                crate::ast::AnnotationArg::Spread { expr, span } => match eval_expr(expr, ctx)? {
                    Value::Dict(map) => annotations.extend(map),
                    Value::Args(map) => annotations.extend(map),
                    other => {
                        return Err(Flow::Error(RuntimeError::operation(
                            format!("cannot spread {} into annotations", other.type_name()),
                            Some(*span),
                        )));
                    }
                },
            }
        }
        params.push(ScriptParam {
            name: p.name.clone(),
            type_name: p.type_name.clone(),
            default: p.default.clone(),
            annotations,
        });
    }
    Ok(Value::Callable(Callable::Script(Rc::new(ScriptFn {
        params,
        body: Rc::new(lit.body.clone()),
        // a snapshot: names captured in the enclosing scope after this
        // literal are not visible at call time
        defining_scope: ctx.scope.snapshot(),
        annotations: ctx.current_annotations(),
        bound_dict: None,
    }))))
}

pub(crate) fn call_function_by_name(
    name: &str,
    args: &[Arg],
    ctx: &mut RuntimeContext,
    span: Span,
    auto_inject: bool,
) -> EvalResult {
    let Some(callable) = ctx.functions.get(name).cloned() else {
        return Err(Flow::Error(RuntimeError::unknown_function(name, Some(span))));
    };
    let mut argv = eval_args(args, ctx)?;
    if auto_inject
        && argv.positional.is_empty()
        && argv.named.is_empty()
        && wants_injection(&callable)
    {
        argv.positional.push(ctx.pipe_value.clone());
    }
    call_callable(&callable, argv, ctx, span)
}

/// The pipe value is auto-injected into zero-argument pipe targets unless
/// the callee is a typed host function declaring no parameters.
fn wants_injection(callable: &Callable) -> bool {
    match callable {
        Callable::Host(host) => host.params.as_ref().map(|p| !p.is_empty()).unwrap_or(true),
        _ => true,
    }
}

pub(crate) fn call_value(
    value: Value,
    argv: ArgValues,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    match value {
        Value::Callable(callable) => call_callable(&callable, argv, ctx, span),
        other => Err(Flow::Error(RuntimeError::not_callable(
            other.type_name(),
            Some(span),
        ))),
    }
}

pub(crate) fn call_callable(
    callable: &Callable,
    argv: ArgValues,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    match callable {
        Callable::Script(script) => call_script(script, argv, ctx, span),
        Callable::Runtime(f) => call_runtime(f, argv, ctx, span),
        Callable::Host(host) => call_host(host, argv, ctx, span),
    }
}

/// Dispatch a named method with an explicit receiver. A callable stored
/// under that name in a dict receiver wins over the registry (except for
/// the reserved dict trio), so dict-bound callables are invocable as
/// `$d.fn()`.
pub(crate) fn call_method(
    name: &str,
    receiver: Value,
    mut args: Vec<Value>,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    if let Value::Dict(map) = &receiver {
        if !matches!(name, "keys" | "values" | "entries") {
            if let Some(Value::Callable(callable)) = map.get(name) {
                let callable = callable.clone();
                return call_callable(&callable, ArgValues::positional(args), ctx, span);
            }
        }
    }
    let Some(method) = ctx.methods.get(name).cloned() else {
        return Err(Flow::Error(RuntimeError::unknown_method(name, Some(span))));
    };
    args.insert(0, receiver);
    call_callable(&method, ArgValues::positional(args), ctx, span)
}

// ============================================================================
// Script callables
// ============================================================================

fn call_script(
    script: &Rc<ScriptFn>,
    mut argv: ArgValues,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    ctx.check_cancelled(Some(span))?;

    // A dict-bound callable invoked bare receives its dict.
    if argv.positional.is_empty() && argv.named.is_empty() && !script.params.is_empty() {
        if let Some(bound) = &script.bound_dict {
            argv.positional.push(Value::Dict(bound.clone()));
        }
    }

    // A single tuple unpacks positionally across a multi-parameter list; a
    // single args-mapping unpacks by name.
    if argv.named.is_empty() && argv.positional.len() == 1 {
        match &argv.positional[0] {
            Value::Tuple(items) if script.params.len() > 1 => {
                argv.positional = items.clone();
            }
            Value::Args(map) => {
                argv.named = map.clone();
                argv.positional.clear();
            }
            _ => {}
        }
    }

    if !argv.named.is_empty() && !argv.positional.is_empty() {
        return Err(Flow::Error(RuntimeError::operation(
            "cannot mix positional and named arguments",
            Some(span),
        )));
    }
    if argv.positional.len() > script.params.len() {
        return Err(Flow::Error(RuntimeError::arity(
            "<closure>",
            script.params.len(),
            argv.positional.len(),
            Some(span),
        )));
    }
    for key in argv.named.keys() {
        if !script.params.iter().any(|p| &p.name == key) {
            return Err(Flow::Error(RuntimeError::operation(
                format!("unknown parameter `{}`", key),
                Some(span),
            )));
        }
    }

    let saved_scope = ctx.scope.clone();
    let saved_pipe = ctx.pipe_value.clone();
    let result = run_script_call(script, argv, ctx, span);
    ctx.scope = saved_scope;
    ctx.pipe_value = saved_pipe;

    let value = match result {
        Ok(v) => v,
        Err(Flow::Return(v)) => v,
        Err(other) => return Err(other),
    };
    if let Some(on_function_return) = ctx.observability.on_function_return.clone() {
        on_function_return("<closure>", &value);
    }
    Ok(value)
}

fn run_script_call(
    script: &Rc<ScriptFn>,
    argv: ArgValues,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    let call_scope = script.defining_scope.child();
    ctx.scope = call_scope.clone();

    let mut dollar_param: Option<Value> = None;
    for (i, param) in script.params.iter().enumerate() {
        let supplied = if argv.named.is_empty() {
            argv.positional.get(i).cloned()
        } else {
            argv.named.get(&param.name).cloned()
        };
        let value = match supplied {
            Some(v) => v,
            None => match &param.default {
                Some(default) => eval_expr(default, ctx)?,
                None => {
                    return Err(Flow::Error(RuntimeError::arity(
                        "<closure>",
                        script.params.len(),
                        argv.positional.len(),
                        Some(span),
                    )));
                }
            },
        };
        if let Some(declared) = &param.type_name {
            if !type_matches(declared, &value) {
                return Err(Flow::Error(RuntimeError::type_mismatch(
                    declared,
                    value.type_name(),
                    Some(span),
                )));
            }
        }
        call_scope.define(&param.name, value.clone());
        if param.name == "$" {
            dollar_param = Some(value);
        }
    }

    // Pipe value inside the body: the bound dict if present; a `$` parameter
    // dual-binds; a parameterless body inherits the caller's; explicit
    // parameters otherwise clear it so nothing leaks in.
    ctx.pipe_value = if let Some(dollar) = dollar_param {
        dollar
    } else if let Some(bound) = &script.bound_dict {
        Value::Dict(bound.clone())
    } else if script.params.is_empty() {
        ctx.pipe_value.clone()
    } else {
        Value::empty_string()
    };

    eval_body(&script.body, ctx)
}

// ============================================================================
// Runtime builtins
// ============================================================================

fn call_runtime(
    f: &Rc<RuntimeFn>,
    argv: ArgValues,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    if !argv.named.is_empty() {
        return Err(Flow::Error(RuntimeError::operation(
            format!("`{}` takes positional arguments only", f.name),
            Some(span),
        )));
    }
    ctx.check_cancelled(Some(span))?;
    let result = (f.f)(&argv.positional, ctx).map_err(|e| Flow::Error(e.with_span(span)))?;
    if let Some(on_function_return) = ctx.observability.on_function_return.clone() {
        on_function_return(&f.name, &result);
    }
    Ok(result)
}

// ============================================================================
// Host functions
// ============================================================================

fn call_host(
    host: &Rc<HostFn>,
    argv: ArgValues,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    ctx.check_cancelled(Some(span))?;
    let args = validate_host_args(host, argv, span)?;

    if let Some(on_host_call) = ctx.observability.on_host_call.clone() {
        on_host_call(&host.name, &args);
    }
    log::debug!("host call `{}` ({} args)", host.name, args.len());

    let started = Instant::now();
    let result = (host.f)(&args).map_err(|message| {
        Flow::Error(RuntimeError::operation(
            format!("{}: {}", host.name, message),
            Some(span),
        ))
    })?;
    if let Some(timeout) = ctx.timeout {
        if started.elapsed() > timeout {
            return Err(Flow::Error(RuntimeError::timeout(
                &host.name,
                timeout.as_millis(),
                Some(span),
            )));
        }
    }

    if let Some(on_function_return) = ctx.observability.on_function_return.clone() {
        on_function_return(&host.name, &result);
    }
    Ok(result)
}

/// Typed host functions get arity, defaults, and per-parameter type checks
/// before the native function runs; raw ones take their args untouched.
fn validate_host_args(
    host: &Rc<HostFn>,
    mut argv: ArgValues,
    span: Span,
) -> Result<Vec<Value>, Flow> {
    let Some(params) = &host.params else {
        if !argv.named.is_empty() {
            return Err(Flow::Error(RuntimeError::operation(
                format!("`{}` takes positional arguments only", host.name),
                Some(span),
            )));
        }
        return Ok(argv.positional);
    };

    if argv.positional.len() > params.len() {
        return Err(Flow::Error(RuntimeError::arity(
            &host.name,
            params.len(),
            argv.positional.len(),
            Some(span),
        )));
    }

    let mut args = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let supplied = argv
            .positional
            .get(i)
            .cloned()
            .or_else(|| argv.named.shift_remove(&param.name));
        let value = match supplied.or_else(|| param.default.clone()) {
            Some(v) => v,
            None => {
                return Err(Flow::Error(RuntimeError::arity(
                    &host.name,
                    params.len(),
                    i,
                    Some(span),
                )));
            }
        };
        if let Some(declared) = &param.type_name {
            if !type_matches(declared, &value) {
                return Err(Flow::Error(RuntimeError::new(
                    crate::error::ids::TYPE_MISMATCH,
                    format!(
                        "{}: parameter `{}` expects {}, got {}",
                        host.name,
                        param.name,
                        declared,
                        value.type_name()
                    ),
                    Some(span),
                )));
            }
        }
        args.push(value);
    }
    if let Some(unknown) = argv.named.keys().next() {
        return Err(Flow::Error(RuntimeError::operation(
            format!("{}: unknown parameter `{}`", host.name, unknown),
            Some(span),
        )));
    }
    Ok(args)
}

/// Run an op body or callable against one element (used by the collection
/// operators): callables with parameters get the element as an argument,
/// parameterless bodies see it as `$`.
pub(crate) fn apply_to_element(
    body_callable: &Value,
    element: Value,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    match body_callable {
        Value::Callable(Callable::Script(script)) if !script.params.is_empty() => call_callable(
            &Callable::Script(Rc::clone(script)),
            ArgValues::positional(vec![element]),
            ctx,
            span,
        ),
        Value::Callable(callable) => {
            let saved = ctx.pipe_value.clone();
            ctx.pipe_value = element;
            let result = call_callable(callable, ArgValues::empty(), ctx, span);
            ctx.pipe_value = saved;
            result
        }
        other => Err(Flow::Error(RuntimeError::not_callable(
            other.type_name(),
            Some(span),
        ))),
    }
}

/// Run a block body against one element with a fresh scope and `$` bound to
/// the element.
pub(crate) fn apply_block_to_element(
    body: &crate::ast::Body,
    element: Value,
    ctx: &mut RuntimeContext,
) -> EvalResult {
    let saved = ctx.pipe_value.clone();
    ctx.pipe_value = element;
    let result = in_child_scope(ctx, |ctx| eval_body(body, ctx));
    ctx.pipe_value = saved;
    result
}
