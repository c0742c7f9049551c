//! Conversion methods: str, num, len, trim.

use super::expect_arity;
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::value::{Callable, RuntimeFn, Value};
use std::collections::BTreeMap;

pub fn register(methods: &mut BTreeMap<String, Callable>) {
    methods.insert("str".to_string(), RuntimeFn::callable("str", method_str));
    methods.insert("num".to_string(), RuntimeFn::callable("num", method_num));
    methods.insert("len".to_string(), RuntimeFn::callable("len", method_len));
    methods.insert("trim".to_string(), RuntimeFn::callable("trim", method_trim));
}

fn method_str(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("str", args, 1)?;
    Ok(Value::Str(format!("{}", args[0])))
}

fn method_num(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("num", args, 1)?;
    match &args[0] {
        Value::Num(n) => Ok(Value::Num(*n)),
        Value::Bool(b) => Ok(Value::Num(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Num).map_err(|_| {
            RuntimeError::operation(format!("num: cannot parse `{}` as a number", s), None)
        }),
        other => Err(RuntimeError::invalid_method_target(
            "num",
            other.type_name(),
            None,
        )),
    }
}

fn method_len(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("len", args, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Tuple(items) => items.len(),
        Value::Dict(map) => map.len(),
        Value::Args(map) => map.len(),
        Value::Vector(items) => items.len(),
        other => {
            return Err(RuntimeError::invalid_method_target(
                "len",
                other.type_name(),
                None,
            ));
        }
    };
    Ok(Value::Num(len as f64))
}

fn method_trim(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("trim", args, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::Str(s.trim().to_string())),
        other => Err(RuntimeError::invalid_method_target(
            "trim",
            other.type_name(),
            None,
        )),
    }
}
