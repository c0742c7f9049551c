//! Access and utility methods: head, tail, at, first, empty, and the
//! reserved dict trio keys/values/entries.

use super::core::sequence_state;
use super::{expect_arity, expect_arity_range, items_of, num_arg};
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::value::{Callable, RuntimeFn, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

pub fn register(methods: &mut BTreeMap<String, Callable>) {
    methods.insert("head".to_string(), RuntimeFn::callable("head", method_head));
    methods.insert("tail".to_string(), RuntimeFn::callable("tail", method_tail));
    methods.insert("at".to_string(), RuntimeFn::callable("at", method_at));
    methods.insert(
        "first".to_string(),
        RuntimeFn::callable("first", method_first),
    );
    methods.insert(
        "empty".to_string(),
        RuntimeFn::callable("empty", method_empty),
    );
    methods.insert("keys".to_string(), RuntimeFn::callable("keys", method_keys));
    methods.insert(
        "values".to_string(),
        RuntimeFn::callable("values", method_values),
    );
    methods.insert(
        "entries".to_string(),
        RuntimeFn::callable("entries", method_entries),
    );
}

fn method_head(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("head", args, 1)?;
    match &args[0] {
        Value::Str(s) => match s.chars().next() {
            Some(c) => Ok(Value::Str(c.to_string())),
            None => Err(RuntimeError::operation("head: empty string", None)),
        },
        Value::Tuple(items) => items
            .first()
            .cloned()
            .ok_or_else(|| RuntimeError::operation("head: empty tuple", None)),
        Value::Vector(items) => items
            .first()
            .map(|n| Value::Num(*n))
            .ok_or_else(|| RuntimeError::operation("head: empty vector", None)),
        other => Err(RuntimeError::invalid_method_target(
            "head",
            other.type_name(),
            None,
        )),
    }
}

fn method_tail(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("tail", args, 1)?;
    match &args[0] {
        Value::Str(s) => {
            let mut chars = s.chars();
            chars.next();
            Ok(Value::Str(chars.collect()))
        }
        Value::Tuple(items) => Ok(Value::Tuple(items.iter().skip(1).cloned().collect())),
        Value::Vector(items) => Ok(Value::Vector(items.iter().skip(1).copied().collect())),
        other => Err(RuntimeError::invalid_method_target(
            "tail",
            other.type_name(),
            None,
        )),
    }
}

/// Element at an index; negative indices count from the end.
fn method_at(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("at", args, 2)?;
    let index = num_arg("at", args, 1)?;
    if index.fract() != 0.0 {
        return Err(RuntimeError::operation(
            format!("at: index must be an integer, got {}", index),
            None,
        ));
    }
    let pick = |len: usize| -> Option<usize> {
        let i = index as i64;
        let resolved = if i < 0 { i + len as i64 } else { i };
        (0..len as i64).contains(&resolved).then_some(resolved as usize)
    };
    match &args[0] {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            pick(chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| RuntimeError::missing_field(&format!("index {}", index), None))
        }
        Value::Tuple(items) => pick(items.len())
            .map(|i| items[i].clone())
            .ok_or_else(|| RuntimeError::missing_field(&format!("index {}", index), None)),
        Value::Vector(items) => pick(items.len())
            .map(|i| Value::Num(items[i]))
            .ok_or_else(|| RuntimeError::missing_field(&format!("index {}", index), None)),
        other => Err(RuntimeError::invalid_method_target(
            "at",
            other.type_name(),
            None,
        )),
    }
}

/// A protocol iterator positioned at element zero of the receiver.
fn method_first(args: &[Value], ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("first", args, 1)?;
    let items = items_of(args[0].clone(), ctx)?;
    Ok(sequence_state(Rc::new(items), 0))
}

fn method_empty(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity_range("empty", args, 1, 1)?;
    Ok(Value::Bool(args[0].is_empty()))
}

fn dict_entries(name: &str, value: &Value) -> Result<Vec<(String, Value)>, RuntimeError> {
    match value {
        Value::Dict(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Args(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        other => Err(RuntimeError::invalid_method_target(
            name,
            other.type_name(),
            None,
        )),
    }
}

fn method_keys(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("keys", args, 1)?;
    Ok(Value::Tuple(
        dict_entries("keys", &args[0])?
            .into_iter()
            .map(|(k, _)| Value::Str(k))
            .collect(),
    ))
}

fn method_values(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("values", args, 1)?;
    Ok(Value::Tuple(
        dict_entries("values", &args[0])?
            .into_iter()
            .map(|(_, v)| v)
            .collect(),
    ))
}

fn method_entries(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("entries", args, 1)?;
    Ok(Value::Tuple(
        dict_entries("entries", &args[0])?
            .into_iter()
            .map(|(k, v)| Value::Tuple(vec![Value::Str(k), v]))
            .collect(),
    ))
}
