//! Comparison methods: eq, ne, lt, gt, le, ge.
//!
//! `eq`/`ne` use deep equality over any pair of values; the ordering
//! methods work on numbers and strings.

use super::expect_arity;
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::value::{Callable, RuntimeFn, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub fn register(methods: &mut BTreeMap<String, Callable>) {
    methods.insert("eq".to_string(), RuntimeFn::callable("eq", method_eq));
    methods.insert("ne".to_string(), RuntimeFn::callable("ne", method_ne));
    methods.insert("lt".to_string(), RuntimeFn::callable("lt", method_lt));
    methods.insert("gt".to_string(), RuntimeFn::callable("gt", method_gt));
    methods.insert("le".to_string(), RuntimeFn::callable("le", method_le));
    methods.insert("ge".to_string(), RuntimeFn::callable("ge", method_ge));
}

fn method_eq(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("eq", args, 2)?;
    Ok(Value::Bool(args[0] == args[1]))
}

fn method_ne(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("ne", args, 2)?;
    Ok(Value::Bool(args[0] != args[1]))
}

fn ordering(name: &str, args: &[Value]) -> Result<Ordering, RuntimeError> {
    expect_arity(name, args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b).ok_or_else(|| {
            RuntimeError::operation(format!("{}: values are not comparable", name), None)
        }),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (a, b) => Err(RuntimeError::operation(
            format!(
                "{}: cannot compare {} with {}",
                name,
                a.type_name(),
                b.type_name()
            ),
            None,
        )),
    }
}

fn method_lt(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering("lt", args)? == Ordering::Less))
}

fn method_gt(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering("gt", args)? == Ordering::Greater))
}

fn method_le(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering("le", args)? != Ordering::Greater))
}

fn method_ge(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(ordering("ge", args)? != Ordering::Less))
}
