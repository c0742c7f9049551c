// ABOUTME: Tree-walking evaluator: statement loop, annotation frames, auto-exceptions

mod access;
mod calls;
mod control;
mod expr;
mod pipes;

pub(crate) use expr::eval_expr;
pub(crate) use pipes::eval_pipe_chain;

use crate::ast::{AnnotationArg, Body, Stmt};
use crate::context::RuntimeContext;
use crate::error::{EvalResult, Flow, RillError, RuntimeError};
use crate::value::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Outcome of a completed execution: the final statement's value and a
/// snapshot of the top-level captures.
#[derive(Debug)]
pub struct ExecutionResult {
    pub value: Value,
    pub variables: BTreeMap<String, Value>,
}

/// Run a parsed program against a fresh context.
pub fn execute(ast: &Body, ctx: &mut RuntimeContext) -> Result<ExecutionResult, RillError> {
    let mut value = Value::empty_string();
    for (index, stmt) in ast.statements.iter().enumerate() {
        match eval_statement(stmt, index, ctx) {
            Ok(v) => {
                ctx.pipe_value = v.clone();
                value = v;
            }
            Err(flow) => return Err(surface(flow, ctx)),
        }
    }
    Ok(ExecutionResult {
        value,
        variables: ctx.top_level_bindings(),
    })
}

/// Convert an escaping `Flow` into the host-facing error, firing `onError`.
pub(crate) fn surface(flow: Flow, ctx: &RuntimeContext) -> RillError {
    let err = match flow {
        Flow::Error(e) => e,
        Flow::Break(_) => RuntimeError::operation("break outside of a loop", None),
        Flow::Return(_) => RuntimeError::operation("return outside of a function", None),
    };
    if let Some(on_error) = ctx.observability.on_error.clone() {
        on_error(&err);
    }
    RillError::Runtime(err)
}

/// Evaluate the statements of a body in order, threading the pipe value.
/// An empty body passes the current pipe value through.
pub(crate) fn eval_body(body: &Body, ctx: &mut RuntimeContext) -> EvalResult {
    let mut value = ctx.pipe_value.clone();
    for (index, stmt) in body.statements.iter().enumerate() {
        value = eval_statement(stmt, index, ctx)?;
        ctx.pipe_value = value.clone();
    }
    Ok(value)
}

pub(crate) fn eval_statement(
    stmt: &Stmt,
    index: usize,
    ctx: &mut RuntimeContext,
) -> EvalResult {
    ctx.check_cancelled(Some(stmt.span))?;
    log::trace!("statement {} at {}", index, stmt.span);

    let pushed = if stmt.annotations.is_empty() {
        false
    } else {
        let frame = build_annotation_frame(&stmt.annotations, ctx)?;
        ctx.annotations.push(frame);
        true
    };

    let result = run_statement(stmt, index, ctx);

    if pushed {
        ctx.annotations.pop();
    }
    result
}

fn run_statement(stmt: &Stmt, index: usize, ctx: &mut RuntimeContext) -> EvalResult {
    if let Some(on_step_start) = ctx.observability.on_step_start.clone() {
        on_step_start(index, stmt.span);
    }
    let started = Instant::now();

    let value = eval_pipe_chain(&stmt.chain, ctx)?;

    if let Some(on_step_end) = ctx.observability.on_step_end.clone() {
        on_step_end(index, &value, started.elapsed());
    }

    if let Value::Str(text) = &value {
        for (pattern, regex) in &ctx.auto_exceptions {
            if regex.is_match(text) {
                return Err(Flow::Error(RuntimeError::auto_exception(
                    pattern,
                    text,
                    Some(stmt.span),
                )));
            }
        }
    }

    Ok(value)
}

/// Evaluate annotation arguments into one frame, merged over the enclosing
/// frame so inner annotations override outer ones.
fn build_annotation_frame(
    annotations: &[AnnotationArg],
    ctx: &mut RuntimeContext,
) -> Result<BTreeMap<String, Value>, Flow> {
    let mut frame = ctx.current_annotations();
    for arg in annotations {
        match arg {
            AnnotationArg::Named { name, value, .. } => {
                let v = eval_expr(value, ctx)?;
                frame.insert(name.clone(), v);
            }
            AnnotationArg::Spread { expr, span } => match eval_expr(expr, ctx)? {
                Value::Dict(map) => frame.extend(map),
                Value::Args(map) => frame.extend(map),
                other => {
                    return Err(Flow::Error(RuntimeError::operation(
                        format!("cannot spread {} into annotations", other.type_name()),
                        Some(*span),
                    )));
                }
            },
        }
    }
    Ok(frame)
}

/// Builtin-facing view of [`control::collection_items`], with the control
/// flow carrier unwrapped (no loop body runs here, so only errors escape).
pub(crate) fn collection_items_for_builtins(
    value: Value,
    ctx: &mut RuntimeContext,
) -> Result<Vec<Value>, RuntimeError> {
    match control::collection_items(value, ctx, crate::span::Span::default()) {
        Ok(items) => Ok(items),
        Err(Flow::Error(e)) => Err(e),
        Err(_) => Err(RuntimeError::operation(
            "iterator produced unexpected control flow",
            None,
        )),
    }
}

/// Run `f` in a fresh child scope, restoring the previous scope afterwards.
pub(crate) fn in_child_scope<T>(
    ctx: &mut RuntimeContext,
    f: impl FnOnce(&mut RuntimeContext) -> EvalResult<T>,
) -> EvalResult<T> {
    let saved = ctx.scope.clone();
    ctx.scope = saved.child();
    let result = f(ctx);
    ctx.scope = saved;
    result
}
