//! Core functions: identity, type inspection, logging, JSON, and iterators.

use super::{expect_arity, expect_arity_range, items_of, num_arg, str_arg};
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::value::{Callable, RuntimeFn, Value};
use std::collections::BTreeMap;

pub fn register(functions: &mut BTreeMap<String, Callable>) {
    functions.insert(
        "identity".to_string(),
        RuntimeFn::callable("identity", builtin_identity),
    );
    functions.insert("type".to_string(), RuntimeFn::callable("type", builtin_type));
    functions.insert("log".to_string(), RuntimeFn::callable("log", builtin_log));
    functions.insert("json".to_string(), RuntimeFn::callable("json", builtin_json));
    functions.insert(
        "parse_json".to_string(),
        RuntimeFn::callable("parse_json", builtin_parse_json),
    );
    functions.insert(
        "enumerate".to_string(),
        RuntimeFn::callable("enumerate", builtin_enumerate),
    );
    functions.insert(
        "range".to_string(),
        RuntimeFn::callable("range", builtin_range),
    );
    functions.insert(
        "repeat".to_string(),
        RuntimeFn::callable("repeat", builtin_repeat),
    );
}

fn builtin_identity(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("identity", args, 1)?;
    Ok(args[0].clone())
}

fn builtin_type(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("type", args, 1)?;
    Ok(Value::Str(args[0].type_name().to_string()))
}

/// Fires the host's `onLog` callback and passes the value through unchanged.
fn builtin_log(args: &[Value], ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("log", args, 1)?;
    if let Some(on_log) = ctx.callbacks.on_log.clone() {
        on_log(&args[0]);
    }
    Ok(args[0].clone())
}

// ============================================================================
// JSON
// ============================================================================

/// Convert a value to JSON. Callables inside containers are skipped; a
/// callable at the top level is an error.
pub(super) fn value_to_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Str(s) => Some(serde_json::Value::String(s.clone())),
        Value::Num(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Tuple(items) => Some(serde_json::Value::Array(
            items.iter().filter_map(value_to_json).collect(),
        )),
        Value::Vector(items) => Some(serde_json::Value::Array(
            items
                .iter()
                .filter_map(|n| serde_json::Number::from_f64(*n).map(serde_json::Value::Number))
                .collect(),
        )),
        Value::Args(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if let Some(j) = value_to_json(v) {
                    out.insert(k.clone(), j);
                }
            }
            Some(serde_json::Value::Object(out))
        }
        Value::Dict(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if let Some(j) = value_to_json(v) {
                    out.insert(k.clone(), j);
                }
            }
            Some(serde_json::Value::Object(out))
        }
        Value::Callable(_) => None,
    }
}

/// JSON → value. Objects become dicts, arrays become tuples, and `null`
/// becomes the empty string (there is no null value in the language).
pub(super) fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::empty_string(),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::Tuple(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), json_to_value(v));
            }
            Value::Dict(out)
        }
    }
}

fn builtin_json(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("json", args, 1)?;
    let json = value_to_json(&args[0]).ok_or_else(|| {
        RuntimeError::operation("json: cannot serialize a callable", None)
    })?;
    let text = serde_json::to_string(&json)
        .map_err(|e| RuntimeError::operation(format!("json: {}", e), None))?;
    Ok(Value::Str(text))
}

fn builtin_parse_json(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("parse_json", args, 1)?;
    let text = str_arg("parse_json", args, 0)?;
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RuntimeError::operation(format!("parse_json: {}", e), None))?;
    Ok(json_to_value(&json))
}

// ============================================================================
// Enumeration and iterators
// ============================================================================

/// `[index, element]` pairs over any iterable.
fn builtin_enumerate(args: &[Value], ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("enumerate", args, 1)?;
    let items = items_of(args[0].clone(), ctx)?;
    Ok(Value::Tuple(
        items
            .into_iter()
            .enumerate()
            .map(|(i, v)| Value::Tuple(vec![Value::Num(i as f64), v]))
            .collect(),
    ))
}

/// Build a protocol iterator state: `{done, value?, next}` where `next`
/// returns the successor state.
fn iterator_state(
    done: bool,
    value: Option<Value>,
    next: impl Fn(&[Value], &mut RuntimeContext) -> Result<Value, RuntimeError> + 'static,
) -> Value {
    let mut map = BTreeMap::new();
    map.insert("done".to_string(), Value::Bool(done));
    if let Some(value) = value {
        map.insert("value".to_string(), value);
    }
    map.insert("next".to_string(), RuntimeFn::wrap("next", next));
    Value::Dict(map)
}

fn range_state(current: f64, end: f64, step: f64) -> Value {
    let done = if step > 0.0 {
        current >= end
    } else {
        current <= end
    };
    iterator_state(
        done,
        (!done).then_some(Value::Num(current)),
        move |_args, _ctx| Ok(range_state(current + step, end, step)),
    )
}

fn builtin_range(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity_range("range", args, 2, 3)?;
    let start = num_arg("range", args, 0)?;
    let end = num_arg("range", args, 1)?;
    let step = if args.len() == 3 {
        num_arg("range", args, 2)?
    } else {
        1.0
    };
    if step == 0.0 {
        return Err(RuntimeError::operation("range: step cannot be zero", None));
    }
    Ok(range_state(start, end, step))
}

fn repeat_state(value: Value, remaining: f64) -> Value {
    let done = remaining <= 0.0;
    let payload = value.clone();
    iterator_state(
        done,
        (!done).then_some(value),
        move |_args, _ctx| Ok(repeat_state(payload.clone(), remaining - 1.0)),
    )
}

fn builtin_repeat(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("repeat", args, 2)?;
    let count = num_arg("repeat", args, 1)?;
    Ok(repeat_state(args[0].clone(), count.floor()))
}

/// Iterator over an already-materialized sequence, positioned at `index`.
/// Used by the `first` method.
pub(super) fn sequence_state(items: std::rc::Rc<Vec<Value>>, index: usize) -> Value {
    let done = index >= items.len();
    let value = items.get(index).cloned();
    iterator_state(done, value, move |_args, _ctx| {
        Ok(sequence_state(std::rc::Rc::clone(&items), index + 1))
    })
}
