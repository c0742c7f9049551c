// ABOUTME: Loops, collection operators, and the iterator protocol

use super::calls::{apply_block_to_element, apply_to_element, call_callable, make_closure, ArgValues};
use super::expr::eval_expr;
use crate::ast::{Expr, OpBody};
use crate::context::RuntimeContext;
use crate::error::{EvalResult, Flow, RuntimeError};
use crate::span::Span;
use crate::value::Value;
use std::collections::BTreeMap;

const DEFAULT_ITERATION_LIMIT: u64 = 10_000;

/// The per-loop iteration ceiling from the `limit` annotation: floored to a
/// positive integer, defaulting when absent, non-numeric, or non-positive.
fn loop_limit(ctx: &RuntimeContext) -> u64 {
    match ctx.annotation("limit") {
        Some(Value::Num(n)) if n >= 1.0 => n.floor() as u64,
        _ => DEFAULT_ITERATION_LIMIT,
    }
}

/// `init -> (cond) @ { body }`
pub(crate) fn eval_while(
    cond: &Expr,
    body: &Expr,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    let limit = loop_limit(ctx);
    let mut iterations: u64 = 0;
    loop {
        ctx.check_cancelled(Some(span))?;
        let condition = eval_expr(cond, ctx)?;
        if !condition.truthy() {
            break;
        }
        iterations += 1;
        if iterations > limit {
            return Err(Flow::Error(RuntimeError::iteration_limit(
                limit, iterations, Some(span),
            )));
        }
        match eval_expr(body, ctx) {
            Ok(value) => ctx.pipe_value = value,
            Err(Flow::Break(value)) => {
                ctx.pipe_value = value;
                break;
            }
            Err(other) => return Err(other),
        }
    }
    Ok(ctx.pipe_value.clone())
}

/// `init -> @ { body } ? (cond)` — body runs at least once.
pub(crate) fn eval_do_while(
    body: &Expr,
    cond: &Expr,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    let limit = loop_limit(ctx);
    let mut iterations: u64 = 0;
    loop {
        ctx.check_cancelled(Some(span))?;
        iterations += 1;
        if iterations > limit {
            return Err(Flow::Error(RuntimeError::iteration_limit(
                limit, iterations, Some(span),
            )));
        }
        match eval_expr(body, ctx) {
            Ok(value) => ctx.pipe_value = value,
            Err(Flow::Break(value)) => {
                ctx.pipe_value = value;
                break;
            }
            Err(other) => return Err(other),
        }
        let condition = eval_expr(cond, ctx)?;
        if !condition.truthy() {
            break;
        }
    }
    Ok(ctx.pipe_value.clone())
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectionOp {
    Each,
    Map,
    Filter,
    Fold,
}

/// Shared driver for `each` / `map` / `filter` / `fold`. The input
/// collection is the current pipe value. `each` and `fold` are sequential
/// and catch `break`; `map` and `filter` have parallel semantics and let it
/// escape.
pub(crate) fn eval_collection_op(
    op: CollectionOp,
    init: Option<&Expr>,
    body: &OpBody,
    ctx: &mut RuntimeContext,
    span: Span,
) -> EvalResult {
    let input = ctx.pipe_value.clone();
    let items = collection_items(input, ctx, span)?;

    // A closure body is built once; a block body is re-entered per element.
    let body_callable = match body {
        OpBody::Closure(lit) => Some(make_closure(lit, ctx)?),
        OpBody::Block(_) => None,
    };
    let mut run = |element: Value, ctx: &mut RuntimeContext| -> EvalResult {
        match (&body_callable, body) {
            (Some(callable), _) => apply_to_element(callable, element, ctx, span),
            (None, OpBody::Block(block)) => apply_block_to_element(block, element, ctx),
            (None, OpBody::Closure(_)) => unreachable!("closure body built above"),
        }
    };

    match op {
        CollectionOp::Each | CollectionOp::Fold => {
            let has_accumulator = init.is_some() || op == CollectionOp::Fold;
            if has_accumulator {
                let saved_acc = ctx.acc_value.take();
                let result = (|| {
                    let mut items = items.into_iter();
                    let mut acc = match init {
                        Some(expr) => eval_expr(expr, ctx)?,
                        // fold without an initializer seeds from the first
                        // element
                        None => match items.next() {
                            Some(first) => first,
                            None => return Ok(Value::empty_string()),
                        },
                    };
                    for element in items {
                        ctx.acc_value = Some(acc.clone());
                        match run(element, ctx) {
                            Ok(value) => acc = value,
                            Err(Flow::Break(value)) => {
                                acc = value;
                                break;
                            }
                            Err(other) => return Err(other),
                        }
                    }
                    Ok(acc)
                })();
                ctx.acc_value = saved_acc;
                result
            } else {
                let mut results = Vec::new();
                for element in items {
                    match run(element, ctx) {
                        Ok(value) => results.push(value),
                        Err(Flow::Break(value)) => return Ok(value),
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Tuple(results))
            }
        }
        CollectionOp::Map => {
            let mut results = Vec::new();
            for element in items {
                results.push(run(element, ctx)?);
            }
            Ok(Value::Tuple(results))
        }
        CollectionOp::Filter => {
            let mut kept = Vec::new();
            for element in items {
                let keep = run(element.clone(), ctx)?;
                if keep.truthy() {
                    kept.push(element);
                }
            }
            Ok(Value::Tuple(kept))
        }
    }
}

/// Materialize the elements of an iterable value: tuples and vectors by
/// element, strings by character, dicts by ascending `[key, value]` entry —
/// unless the dict speaks the iterator protocol, in which case it is driven.
pub(crate) fn collection_items(
    value: Value,
    ctx: &mut RuntimeContext,
    span: Span,
) -> Result<Vec<Value>, Flow> {
    match value {
        Value::Tuple(items) => Ok(items),
        Value::Vector(items) => Ok(items.into_iter().map(Value::Num).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Args(map) => Ok(map
            .into_iter()
            .map(|(k, v)| Value::Tuple(vec![Value::Str(k), v]))
            .collect()),
        Value::Dict(map) => {
            if is_iterator(&map) {
                drive_iterator(map, ctx, span)
            } else {
                Ok(map
                    .into_iter()
                    .map(|(k, v)| Value::Tuple(vec![Value::Str(k), v]))
                    .collect())
            }
        }
        other => Err(Flow::Error(RuntimeError::operation(
            format!("cannot iterate over {}", other.type_name()),
            Some(span),
        ))),
    }
}

/// A value speaks the iterator protocol iff it is a dict with a boolean
/// `done` and a callable `next`.
pub(crate) fn is_iterator(map: &BTreeMap<String, Value>) -> bool {
    matches!(map.get("done"), Some(Value::Bool(_)))
        && matches!(map.get("next"), Some(Value::Callable(_)))
}

/// Drive a protocol iterator to exhaustion. `next` returns the successor
/// state dict; the cap guards against protocol states that never finish.
fn drive_iterator(
    mut state: BTreeMap<String, Value>,
    ctx: &mut RuntimeContext,
    span: Span,
) -> Result<Vec<Value>, Flow> {
    let limit = loop_limit(ctx);
    let mut items = Vec::new();
    let mut steps: u64 = 0;
    loop {
        ctx.check_cancelled(Some(span))?;
        match state.get("done") {
            Some(Value::Bool(true)) => break,
            Some(Value::Bool(false)) => {}
            _ => {
                return Err(Flow::Error(RuntimeError::operation(
                    "iterator `done` must be a boolean",
                    Some(span),
                )));
            }
        }
        steps += 1;
        if steps > limit {
            return Err(Flow::Error(RuntimeError::iteration_limit(
                limit, steps, Some(span),
            )));
        }
        items.push(
            state
                .get("value")
                .cloned()
                .unwrap_or_else(Value::empty_string),
        );
        let next = match state.get("next") {
            Some(Value::Callable(callable)) => callable.clone(),
            _ => {
                return Err(Flow::Error(RuntimeError::operation(
                    "iterator `next` must be callable",
                    Some(span),
                )));
            }
        };
        match call_callable(&next, ArgValues::empty(), ctx, span)? {
            Value::Dict(next_state) => state = next_state,
            other => {
                return Err(Flow::Error(RuntimeError::operation(
                    format!("iterator `next` must return an iterator, got {}", other.type_name()),
                    Some(span),
                )));
            }
        }
    }
    Ok(items)
}
