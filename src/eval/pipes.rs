// ABOUTME: Pipe-chain evaluation: targets, captures, dict dispatch, destructuring

use super::access::{eval_slice_bounds, slice_value};
use super::calls::{call_value, ArgValues};
use super::expr::{eval_expr, eval_postfix};
use crate::ast::{
    DictEntry, Expr, Pattern, PatternElement, PipeChain, PipeTarget, Terminator,
};
use crate::context::RuntimeContext;
use crate::error::{EvalResult, Flow, RuntimeError};
use crate::span::Span;
use crate::value::{type_matches, Value};
use std::collections::BTreeMap;

/// Evaluate a chain: head, then each target in order, with `$` threading
/// through. The caller's `$` is restored afterwards no matter what — pipe
/// chains never leak their pipe value.
pub(crate) fn eval_pipe_chain(chain: &PipeChain, ctx: &mut RuntimeContext) -> EvalResult {
    let saved = ctx.pipe_value.clone();
    let result = run_chain(chain, ctx);
    ctx.pipe_value = saved;
    result
}

fn run_chain(chain: &PipeChain, ctx: &mut RuntimeContext) -> EvalResult {
    let head = eval_expr(&chain.head, ctx)?;
    ctx.pipe_value = head;

    for target in &chain.pipes {
        ctx.check_cancelled(Some(chain.span))?;
        let next = eval_pipe_target(target, ctx)?;
        ctx.pipe_value = next;
    }

    match &chain.terminator {
        Some(Terminator::Capture {
            name,
            type_name,
            span,
        }) => {
            let value = ctx.pipe_value.clone();
            capture(name, type_name.as_deref(), value, ctx, *span)?;
        }
        Some(Terminator::Break { .. }) => {
            return Err(Flow::Break(ctx.pipe_value.clone()));
        }
        Some(Terminator::Return { .. }) => {
            return Err(Flow::Return(ctx.pipe_value.clone()));
        }
        None => {}
    }

    Ok(ctx.pipe_value.clone())
}

/// Store `value` under `name` with type-lock enforcement and the capture
/// event.
fn capture(
    name: &str,
    type_name: Option<&str>,
    value: Value,
    ctx: &mut RuntimeContext,
    span: Span,
) -> Result<(), Flow> {
    if let Some(declared) = type_name {
        if !type_matches(declared, &value) {
            return Err(Flow::Error(RuntimeError::type_mismatch(
                declared,
                value.type_name(),
                Some(span),
            )));
        }
    }
    ctx.scope.set(name, value.clone(), Some(span))?;
    if let Some(on_capture) = ctx.observability.on_capture.clone() {
        on_capture(name, &value);
    }
    Ok(())
}

fn eval_pipe_target(target: &PipeTarget, ctx: &mut RuntimeContext) -> EvalResult {
    match target {
        PipeTarget::Capture {
            name,
            type_name,
            span,
        } => {
            let value = ctx.pipe_value.clone();
            capture(name, type_name.as_deref(), value, ctx, *span)?;
            Ok(ctx.pipe_value.clone())
        }
        PipeTarget::Destructure(pattern) => {
            destructure(ctx.pipe_value.clone(), pattern, ctx)?;
            Ok(ctx.pipe_value.clone())
        }
        PipeTarget::Slice(slice) => {
            let bounds = eval_slice_bounds(slice, ctx)?;
            slice_value(ctx.pipe_value.clone(), bounds, slice.span)
        }
        PipeTarget::TypeAssert { type_name, span } => {
            let value = ctx.pipe_value.clone();
            if !type_matches(type_name, &value) {
                return Err(Flow::Error(RuntimeError::type_mismatch(
                    type_name,
                    value.type_name(),
                    Some(*span),
                )));
            }
            Ok(value)
        }
        PipeTarget::TypeCheck { type_name, .. } => Ok(Value::Bool(type_matches(
            type_name,
            &ctx.pipe_value.clone(),
        ))),
        PipeTarget::Expr(expr) => eval_target_expr(expr, ctx),
    }
}

/// Evaluate a pipe-target expression with the auto-injection rules: a dict
/// literal dispatches on `$`; a zero-argument call gets `$` appended; a
/// closure literal is invoked with `$`.
fn eval_target_expr(expr: &Expr, ctx: &mut RuntimeContext) -> EvalResult {
    match expr {
        Expr::DictLit { entries, span } => dict_dispatch(entries, ctx, *span),
        Expr::HostCall { name, args, span } => {
            super::calls::call_function_by_name(name, args, ctx, *span, true)
        }
        Expr::Postfix { primary, ops, .. } => eval_postfix(primary, ops, ctx, true),
        Expr::Closure(lit) => {
            let callable = super::calls::make_closure(lit, ctx)?;
            let pipe = ctx.pipe_value.clone();
            let argv = if lit.params.is_empty() {
                ArgValues::empty()
            } else {
                ArgValues::positional(vec![pipe])
            };
            call_value(callable, argv, ctx, lit.span)
        }
        _ => eval_expr(expr, ctx),
    }
}

/// `value -> [k1: v1, ..., default: v]`: look `$` up (format-coerced) among
/// the keys; the matched entry is evaluated lazily, and a callable result
/// is invoked with `$`.
fn dict_dispatch(entries: &[DictEntry], ctx: &mut RuntimeContext, span: Span) -> EvalResult {
    let key = format!("{}", ctx.pipe_value);

    let mut matched: Option<&Expr> = None;
    let mut fallback: Option<&Expr> = None;
    let mut spread_hit: Option<Value> = None;
    let mut spread_fallback: Option<Value> = None;

    for entry in entries {
        match entry {
            DictEntry::KeyValue { key: k, value, .. } => {
                if *k == key && matched.is_none() {
                    matched = Some(value);
                } else if k == "default" && fallback.is_none() {
                    fallback = Some(value);
                }
            }
            DictEntry::Spread { expr, span } => {
                let spread = eval_expr(expr, ctx)?;
                let map: BTreeMap<String, Value> = match spread {
                    Value::Dict(map) => map,
                    Value::Args(map) => map.into_iter().collect(),
                    other => {
                        return Err(Flow::Error(RuntimeError::operation(
                            format!("cannot spread {} into a dispatch table", other.type_name()),
                            Some(*span),
                        )));
                    }
                };
                if spread_hit.is_none() {
                    spread_hit = map.get(&key).cloned();
                }
                if spread_fallback.is_none() {
                    spread_fallback = map.get("default").cloned();
                }
            }
        }
    }

    let outcome = if let Some(expr) = matched {
        eval_expr(expr, ctx)?
    } else if let Some(value) = spread_hit {
        value
    } else if let Some(expr) = fallback {
        eval_expr(expr, ctx)?
    } else if let Some(value) = spread_fallback {
        value
    } else {
        return Err(Flow::Error(RuntimeError::missing_field(&key, Some(span))));
    };

    match outcome {
        Value::Callable(_) => {
            let pipe = ctx.pipe_value.clone();
            super::calls::apply_to_element(&outcome, pipe, ctx, span)
        }
        value => Ok(value),
    }
}

/// Bind a pattern against the pipe value. The value itself passes through
/// the chain unchanged.
fn destructure(value: Value, pattern: &Pattern, ctx: &mut RuntimeContext) -> Result<(), Flow> {
    match &value {
        Value::Tuple(items) => destructure_sequence(items, pattern, ctx),
        Value::Str(s) => {
            let chars: Vec<Value> = s.chars().map(|c| Value::Str(c.to_string())).collect();
            destructure_sequence(&chars, pattern, ctx)
        }
        Value::Dict(map) => {
            let entries: BTreeMap<String, Value> = map.clone();
            destructure_mapping(&entries, pattern, ctx)
        }
        Value::Args(map) => {
            let entries: BTreeMap<String, Value> = map.clone().into_iter().collect();
            destructure_mapping(&entries, pattern, ctx)
        }
        other => Err(Flow::Error(RuntimeError::operation(
            format!("cannot destructure {}", other.type_name()),
            Some(pattern.span),
        ))),
    }
}

fn destructure_sequence(
    items: &[Value],
    pattern: &Pattern,
    ctx: &mut RuntimeContext,
) -> Result<(), Flow> {
    let mut index = 0usize;
    let mut elements = pattern.elements.iter().peekable();
    while let Some(element) = elements.next() {
        match element {
            PatternElement::Bind { name, span } => {
                let Some(item) = items.get(index) else {
                    return Err(short_input(pattern, items.len()));
                };
                capture(name, None, item.clone(), ctx, *span)?;
                index += 1;
            }
            PatternElement::Ignore { .. } => {
                if index >= items.len() {
                    return Err(short_input(pattern, items.len()));
                }
                index += 1;
            }
            PatternElement::Nested(nested) => {
                let Some(item) = items.get(index) else {
                    return Err(short_input(pattern, items.len()));
                };
                destructure(item.clone(), nested, ctx)?;
                index += 1;
            }
            PatternElement::Rest { name, span } => {
                if elements.peek().is_some() {
                    return Err(Flow::Error(RuntimeError::operation(
                        "rest binding must be the last pattern element",
                        Some(*span),
                    )));
                }
                if let Some(name) = name {
                    let rest: Vec<Value> = items[index.min(items.len())..].to_vec();
                    capture(name, None, Value::Tuple(rest), ctx, *span)?;
                }
                return Ok(());
            }
            PatternElement::Named { span, .. } => {
                return Err(Flow::Error(RuntimeError::operation(
                    "named bindings require a dict input",
                    Some(*span),
                )));
            }
        }
    }
    Ok(())
}

fn destructure_mapping(
    entries: &BTreeMap<String, Value>,
    pattern: &Pattern,
    ctx: &mut RuntimeContext,
) -> Result<(), Flow> {
    let mut taken: Vec<&str> = Vec::new();
    let mut elements = pattern.elements.iter().peekable();
    while let Some(element) = elements.next() {
        match element {
            PatternElement::Named { key, name, span } => {
                let Some(found) = entries.get(key) else {
                    return Err(Flow::Error(RuntimeError::missing_field(key, Some(*span))));
                };
                capture(name, None, found.clone(), ctx, *span)?;
                taken.push(key);
            }
            // A bare `$name` on a dict binds the same-named key.
            PatternElement::Bind { name, span } => {
                let Some(found) = entries.get(name) else {
                    return Err(Flow::Error(RuntimeError::missing_field(name, Some(*span))));
                };
                capture(name, None, found.clone(), ctx, *span)?;
                taken.push(name);
            }
            PatternElement::Rest { name, span } => {
                if elements.peek().is_some() {
                    return Err(Flow::Error(RuntimeError::operation(
                        "rest binding must be the last pattern element",
                        Some(*span),
                    )));
                }
                if let Some(name) = name {
                    let rest: BTreeMap<String, Value> = entries
                        .iter()
                        .filter(|(k, _)| !taken.contains(&k.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    capture(name, None, Value::Dict(rest), ctx, *span)?;
                }
                return Ok(());
            }
            PatternElement::Ignore { .. } => {}
            PatternElement::Nested(nested) => {
                return Err(Flow::Error(RuntimeError::operation(
                    "nested patterns require a sequence input",
                    Some(nested.span),
                )));
            }
        }
    }
    Ok(())
}

fn short_input(pattern: &Pattern, len: usize) -> Flow {
    Flow::Error(RuntimeError::operation(
        format!(
            "destructuring needs at least {} elements, input has {}",
            pattern
                .elements
                .iter()
                .filter(|e| !matches!(e, PatternElement::Rest { .. }))
                .count(),
            len
        ),
        Some(pattern.span),
    ))
}
