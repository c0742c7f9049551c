// ABOUTME: Field access, indexing, slices, existence checks, and reflection

use super::calls::call_method;
use super::expr::eval_expr;
use crate::ast::{Access, SliceExpr};
use crate::context::RuntimeContext;
use crate::error::{EvalResult, Flow, RuntimeError};
use crate::span::Span;
use crate::value::{Callable, Value};
use std::collections::BTreeMap;

pub(crate) fn apply_access(
    value: Value,
    access: &Access,
    ctx: &mut RuntimeContext,
) -> EvalResult {
    match access {
        Access::Field { name, span } => field_access(value, name, ctx, *span),
        Access::FieldVar { name, span } => {
            let key = ctx
                .scope
                .get(name)
                .ok_or_else(|| RuntimeError::undefined_variable(name, Some(*span)))?;
            field_access(value, &format!("{}", key), ctx, *span)
        }
        Access::FieldComputed { expr, span } => {
            let key = eval_expr(expr, ctx)?;
            field_access(value, &format!("{}", key), ctx, *span)
        }
        Access::FieldAlternatives { names, span } => {
            let lookup = |key: &str| match &value {
                Value::Dict(map) => map.get(key).cloned(),
                Value::Args(map) => map.get(key).cloned(),
                _ => None,
            };
            for name in names {
                if let Some(found) = lookup(name) {
                    return Ok(found);
                }
            }
            Err(Flow::Error(RuntimeError::missing_field(
                &names.join("|"),
                Some(*span),
            )))
        }
        Access::Exists { name, .. } => Ok(Value::Bool(match &value {
            Value::Dict(map) => map.contains_key(name),
            Value::Args(map) => map.contains_key(name),
            _ => false,
        })),
        Access::Index { expr, span } => {
            let index = eval_expr(expr, ctx)?;
            index_access(value, index, *span)
        }
        Access::Slice(slice) => {
            let bounds = eval_slice_bounds(slice, ctx)?;
            slice_value(value, bounds, slice.span)
        }
    }
}

/// Dict fields shadow methods, except for the reserved trio
/// (`keys`/`values`/`entries`); on every other receiver a dot-name resolves
/// as a zero-argument method.
fn field_access(value: Value, name: &str, ctx: &mut RuntimeContext, span: Span) -> EvalResult {
    match &value {
        Value::Dict(map) => {
            if matches!(name, "keys" | "values" | "entries") {
                return call_method(name, value.clone(), Vec::new(), ctx, span);
            }
            if let Some(found) = map.get(name) {
                return Ok(found.clone());
            }
            if ctx.methods.contains_key(name) {
                return call_method(name, value.clone(), Vec::new(), ctx, span);
            }
            Err(Flow::Error(RuntimeError::missing_field(name, Some(span))))
        }
        Value::Args(map) => {
            if let Some(found) = map.get(name) {
                return Ok(found.clone());
            }
            if ctx.methods.contains_key(name) {
                return call_method(name, value.clone(), Vec::new(), ctx, span);
            }
            Err(Flow::Error(RuntimeError::missing_field(name, Some(span))))
        }
        Value::Callable(callable) if name == "params" => params_dict(callable, span),
        _ => {
            if ctx.methods.contains_key(name) {
                return call_method(name, value, Vec::new(), ctx, span);
            }
            Err(Flow::Error(RuntimeError::operation(
                format!("cannot access `{}` on {}", name, value.type_name()),
                Some(span),
            )))
        }
    }
}

fn index_access(value: Value, index: Value, span: Span) -> EvalResult {
    match &value {
        Value::Tuple(items) => {
            let i = numeric_index(&index, items.len(), span)?;
            items
                .get(i)
                .cloned()
                .ok_or_else(|| index_out_of_range(i, items.len(), span))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = numeric_index(&index, chars.len(), span)?;
            chars
                .get(i)
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| index_out_of_range(i, chars.len(), span))
        }
        Value::Vector(items) => {
            let i = numeric_index(&index, items.len(), span)?;
            items
                .get(i)
                .map(|n| Value::Num(*n))
                .ok_or_else(|| index_out_of_range(i, items.len(), span))
        }
        Value::Dict(map) => {
            let key = format!("{}", index);
            map.get(&key)
                .cloned()
                .ok_or_else(|| Flow::Error(RuntimeError::missing_field(&key, Some(span))))
        }
        Value::Args(map) => {
            let key = format!("{}", index);
            map.get(&key)
                .cloned()
                .ok_or_else(|| Flow::Error(RuntimeError::missing_field(&key, Some(span))))
        }
        other => Err(Flow::Error(RuntimeError::operation(
            format!("cannot index {}", other.type_name()),
            Some(span),
        ))),
    }
}

fn index_out_of_range(i: usize, len: usize, span: Span) -> Flow {
    Flow::Error(RuntimeError::missing_field(
        &format!("index {} (length {})", i, len),
        Some(span),
    ))
}

/// Resolve a numeric index, counting from the end when negative.
fn numeric_index(index: &Value, len: usize, span: Span) -> Result<usize, Flow> {
    let Value::Num(n) = index else {
        return Err(Flow::Error(RuntimeError::type_mismatch(
            "number",
            index.type_name(),
            Some(span),
        )));
    };
    if n.fract() != 0.0 {
        return Err(Flow::Error(RuntimeError::operation(
            format!("index must be an integer, got {}", n),
            Some(span),
        )));
    }
    let i = *n as i64;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 {
        // still out of range; report as an unsigned miss
        return Ok(usize::MAX);
    }
    Ok(resolved as usize)
}

pub(crate) struct SliceBounds {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: i64,
}

pub(crate) fn eval_slice_bounds(
    slice: &SliceExpr,
    ctx: &mut RuntimeContext,
) -> Result<SliceBounds, Flow> {
    let mut part = |expr: &Option<Box<crate::ast::Expr>>| -> Result<Option<i64>, Flow> {
        match expr {
            None => Ok(None),
            Some(e) => match eval_expr(e, ctx)? {
                Value::Num(n) if n.fract() == 0.0 => Ok(Some(n as i64)),
                other => Err(Flow::Error(RuntimeError::operation(
                    format!("slice bounds must be integers, got {}", other),
                    Some(slice.span),
                ))),
            },
        }
    };
    let start = part(&slice.start)?;
    let stop = part(&slice.stop)?;
    let step = part(&slice.step)?.unwrap_or(1);
    if step == 0 {
        return Err(Flow::Error(RuntimeError::operation(
            "slice step cannot be zero",
            Some(slice.span),
        )));
    }
    Ok(SliceBounds { start, stop, step })
}

/// Python-style slicing over strings, tuples, and vectors.
pub(crate) fn slice_value(value: Value, bounds: SliceBounds, span: Span) -> EvalResult {
    match value {
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), &bounds)
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::Tuple(picked))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice_indices(chars.len(), &bounds)
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::Str(picked))
        }
        Value::Vector(items) => {
            let picked = slice_indices(items.len(), &bounds)
                .into_iter()
                .map(|i| items[i])
                .collect();
            Ok(Value::Vector(picked))
        }
        other => Err(Flow::Error(RuntimeError::operation(
            format!("cannot slice {}", other.type_name()),
            Some(span),
        ))),
    }
}

fn slice_indices(len: usize, bounds: &SliceBounds) -> Vec<usize> {
    let len = len as i64;
    let step = bounds.step;
    let clamp = |i: i64, low: i64, high: i64| i.max(low).min(high);
    let normalize = |i: i64| if i < 0 { i + len } else { i };

    let mut out = Vec::new();
    if step > 0 {
        let start = clamp(bounds.start.map(normalize).unwrap_or(0), 0, len);
        let stop = clamp(bounds.stop.map(normalize).unwrap_or(len), 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = clamp(bounds.start.map(normalize).unwrap_or(len - 1), -1, len - 1);
        let stop = match bounds.stop {
            Some(s) => clamp(normalize(s), -1, len),
            None => -1,
        };
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

/// `callable.^key`: read a closure-level annotation.
pub(crate) fn read_annotation(value: &Value, key: &str, span: Span) -> EvalResult {
    match value {
        Value::Callable(Callable::Script(script)) => script
            .annotations
            .get(key)
            .cloned()
            .ok_or_else(|| Flow::Error(RuntimeError::undefined_annotation(key, Some(span)))),
        other => Err(Flow::Error(RuntimeError::operation(
            format!("annotations are only available on closures, not {}", other.type_name()),
            Some(span),
        ))),
    }
}

/// `callable.params`: parameter name → `{type?, __annotations?}`.
fn params_dict(callable: &Callable, span: Span) -> EvalResult {
    let Callable::Script(script) = callable else {
        return Err(Flow::Error(RuntimeError::operation(
            "`params` is only available on script closures",
            Some(span),
        )));
    };
    let mut out = BTreeMap::new();
    for param in &script.params {
        let mut info = BTreeMap::new();
        if let Some(t) = &param.type_name {
            info.insert("type".to_string(), Value::Str(t.clone()));
        }
        if !param.annotations.is_empty() {
            info.insert(
                "__annotations".to_string(),
                Value::Dict(param.annotations.clone().into_iter().collect()),
            );
        }
        out.insert(param.name.clone(), Value::Dict(info));
    }
    Ok(Value::Dict(out))
}
