// ABOUTME: Expression evaluation: literals, operators, conditionals, blocks, postfix chains

use super::access::{apply_access, read_annotation};
use super::calls::{call_method, call_value, eval_args, make_closure};
use super::control::{eval_collection_op, eval_do_while, eval_while, CollectionOp};
use super::{eval_body, eval_pipe_chain, in_child_scope};
use crate::ast::*;
use crate::context::RuntimeContext;
use crate::error::{ids, EvalResult, Flow, RuntimeError};
use crate::value::{Callable, ScriptFn, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

pub(crate) fn eval_expr(expr: &Expr, ctx: &mut RuntimeContext) -> EvalResult {
    match expr {
        Expr::Str(lit) => eval_string(lit, ctx),
        Expr::Num { value, .. } => Ok(Value::Num(*value)),
        Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
        Expr::TupleLit { items, .. } => eval_tuple_literal(items, ctx),
        Expr::DictLit { entries, .. } => eval_dict_literal(entries, ctx),
        Expr::Closure(lit) => make_closure(lit, ctx),
        Expr::Var(variable) => eval_variable(variable, ctx),
        Expr::HostCall { name, args, span } => {
            super::calls::call_function_by_name(name, args, ctx, *span, false)
        }
        Expr::Postfix { primary, ops, .. } => eval_postfix(primary, ops, ctx, false),
        Expr::Conditional {
            cond,
            then,
            otherwise,
            ..
        } => {
            let condition = eval_expr(cond, ctx)?;
            if condition.truthy() {
                eval_expr(then, ctx)
            } else if let Some(otherwise) = otherwise {
                eval_expr(otherwise, ctx)
            } else {
                Ok(absent_branch_value(then))
            }
        }
        Expr::While { cond, body, span } => eval_while(cond, body, ctx, *span),
        Expr::DoWhile { body, cond, span } => eval_do_while(body, cond, ctx, *span),
        Expr::Block { body, .. } => in_child_scope(ctx, |ctx| eval_body(body, ctx)),
        Expr::Grouped { chain, .. } => eval_pipe_chain(chain, ctx),
        Expr::Each { init, body, span } => {
            eval_collection_op(CollectionOp::Each, init.as_deref(), body, ctx, *span)
        }
        Expr::Map { body, span } => {
            eval_collection_op(CollectionOp::Map, None, body, ctx, *span)
        }
        Expr::Filter { body, span } => {
            eval_collection_op(CollectionOp::Filter, None, body, ctx, *span)
        }
        Expr::Fold { init, body, span } => {
            eval_collection_op(CollectionOp::Fold, init.as_deref(), body, ctx, *span)
        }
        Expr::Spread { span, .. } => Err(Flow::Error(RuntimeError::operation(
            "spread is only valid in argument lists, collections, and annotations",
            Some(*span),
        ))),
        Expr::Assert {
            cond,
            message,
            span,
        } => {
            let value = eval_expr(cond, ctx)?;
            if value.truthy() {
                Ok(ctx.pipe_value.clone())
            } else {
                let message = match message {
                    Some(m) => format!("{}", eval_expr(m, ctx)?),
                    None => "assertion failed".to_string(),
                };
                Err(Flow::Error(RuntimeError::user(message, Some(*span))))
            }
        }
        Expr::Raise { message, span } => {
            let message = eval_expr(message, ctx)?;
            Err(Flow::Error(RuntimeError::user(
                format!("{}", message),
                Some(*span),
            )))
        }
        Expr::Binary { op, lhs, rhs, span } => eval_binary(*op, lhs, rhs, ctx, *span),
        Expr::Unary { op, operand, span } => {
            let value = eval_expr(operand, ctx)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!value.truthy())),
                UnOp::Neg => match value {
                    Value::Num(n) => Ok(Value::Num(-n)),
                    other => Err(Flow::Error(RuntimeError::operation(
                        format!("cannot negate {}", other.type_name()),
                        Some(*span),
                    ))),
                },
            }
        }
        Expr::Coalesce { lhs, rhs, .. } => match eval_expr(lhs, ctx) {
            Ok(value) if value.is_empty() => eval_expr(rhs, ctx),
            Ok(value) => Ok(value),
            // `??` also absorbs a missing field or annotation directly to
            // its left, supplying the default instead.
            Err(Flow::Error(e))
                if e.id == ids::MISSING_FIELD || e.id == ids::UNDEFINED_ANNOTATION =>
            {
                eval_expr(rhs, ctx)
            }
            Err(flow) => Err(flow),
        },
        Expr::Pass { .. } => Ok(ctx.pipe_value.clone()),
        Expr::BreakExpr { .. } => Err(Flow::Break(ctx.pipe_value.clone())),
        Expr::ReturnExpr { .. } => Err(Flow::Return(ctx.pipe_value.clone())),
    }
}

/// The value of a missing else-branch: the empty form of the then-branch
/// when its type is statically apparent, the empty string otherwise.
fn absent_branch_value(then: &Expr) -> Value {
    match then {
        Expr::Num { .. } => Value::Num(0.0),
        Expr::Bool { .. } => Value::Bool(false),
        Expr::TupleLit { .. } => Value::Tuple(Vec::new()),
        Expr::DictLit { .. } => Value::Dict(BTreeMap::new()),
        _ => Value::empty_string(),
    }
}

pub(crate) fn eval_string(lit: &StringLit, ctx: &mut RuntimeContext) -> EvalResult {
    let mut out = String::new();
    for part in &lit.parts {
        match part {
            StringPart::Text(text) => out.push_str(text),
            StringPart::Interp(expr) => {
                let value = eval_expr(expr, ctx)?;
                out.push_str(&format!("{}", value));
            }
        }
    }
    Ok(Value::Str(out))
}

fn eval_tuple_literal(items: &[Arg], ctx: &mut RuntimeContext) -> EvalResult {
    let mut out = Vec::new();
    for item in items {
        match item {
            Arg::Pos(expr) => out.push(eval_expr(expr, ctx)?),
            Arg::Spread { expr, span } => match eval_expr(expr, ctx)? {
                Value::Tuple(items) => out.extend(items),
                Value::Vector(nums) => out.extend(nums.into_iter().map(Value::Num)),
                other => {
                    return Err(Flow::Error(RuntimeError::operation(
                        format!("cannot spread {} into a tuple", other.type_name()),
                        Some(*span),
                    )));
                }
            },
            Arg::Named { span, .. } => {
                return Err(Flow::Error(RuntimeError::operation(
                    "named values are not allowed in a tuple literal",
                    Some(*span),
                )));
            }
        }
    }
    Ok(Value::Tuple(out))
}

pub(crate) fn eval_dict_literal(entries: &[DictEntry], ctx: &mut RuntimeContext) -> EvalResult {
    let mut map = BTreeMap::new();
    for entry in entries {
        match entry {
            DictEntry::KeyValue { key, value, .. } => {
                let v = eval_expr(value, ctx)?;
                map.insert(key.clone(), v);
            }
            DictEntry::Spread { expr, span } => match eval_expr(expr, ctx)? {
                Value::Dict(other) => map.extend(other),
                Value::Args(other) => map.extend(other),
                other => {
                    return Err(Flow::Error(RuntimeError::operation(
                        format!("cannot spread {} into a dict", other.type_name()),
                        Some(*span),
                    )));
                }
            },
        }
    }
    Ok(Value::Dict(bind_dict_callables(map)))
}

/// Attach the containing dict to each callable value. The snapshot passed
/// as the back-reference holds the unbound callables, so no cycle forms.
fn bind_dict_callables(map: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    if !map
        .values()
        .any(|v| matches!(v, Value::Callable(Callable::Script(_))))
    {
        return map;
    }
    let snapshot = map.clone();
    map.into_iter()
        .map(|(key, value)| match value {
            Value::Callable(Callable::Script(script)) => {
                let bound = ScriptFn {
                    params: script.params.clone(),
                    body: Rc::clone(&script.body),
                    defining_scope: script.defining_scope.clone(),
                    annotations: script.annotations.clone(),
                    bound_dict: Some(snapshot.clone()),
                };
                (key, Value::Callable(Callable::Script(Rc::new(bound))))
            }
            other => (key, other),
        })
        .collect()
}

pub(crate) fn eval_variable(variable: &Variable, ctx: &mut RuntimeContext) -> EvalResult {
    let mut value = match &variable.kind {
        VarKind::Named(name) => ctx
            .scope
            .get(name)
            .ok_or_else(|| RuntimeError::undefined_variable(name, Some(variable.span)))?,
        VarKind::Pipe => ctx.pipe_value.clone(),
        VarKind::Accumulator => ctx.acc_value.clone().ok_or_else(|| {
            RuntimeError::new(
                ids::UNDEFINED_VARIABLE,
                "no accumulator in scope; `$@` is only available in fold/each bodies",
                Some(variable.span),
            )
        })?,
    };
    for access in &variable.accesses {
        value = apply_access(value, access, ctx)?;
    }
    Ok(value)
}

/// Evaluate a postfix chain. `inject_pipe` auto-appends the pipe value to a
/// zero-argument trailing invoke (the pipe-target rule).
pub(crate) fn eval_postfix(
    primary: &Expr,
    ops: &[PostfixOp],
    ctx: &mut RuntimeContext,
    inject_pipe: bool,
) -> EvalResult {
    let mut value = eval_expr(primary, ctx)?;
    for (i, op) in ops.iter().enumerate() {
        let last = i == ops.len() - 1;
        value = match op {
            PostfixOp::Method { name, args, span } => {
                let argv = eval_args(args, ctx)?;
                call_method(name, value, argv.positional, ctx, *span)?
            }
            PostfixOp::Invoke { args, span } => {
                let mut argv = eval_args(args, ctx)?;
                // parameterless closures inherit `$` instead of receiving it
                let takes_args = !matches!(
                    &value,
                    Value::Callable(Callable::Script(s)) if s.params.is_empty()
                );
                if inject_pipe
                    && last
                    && takes_args
                    && argv.positional.is_empty()
                    && argv.named.is_empty()
                {
                    argv.positional.push(ctx.pipe_value.clone());
                }
                call_value(value, argv, ctx, *span)?
            }
            PostfixOp::Annotation { key, span } => read_annotation(&value, key, *span)?,
            PostfixOp::Access(access) => apply_access(value, access, ctx)?,
        };
    }
    Ok(value)
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut RuntimeContext,
    span: crate::span::Span,
) -> EvalResult {
    // Logical operators short-circuit; everything else is strict.
    match op {
        BinOp::And => {
            let left = eval_expr(lhs, ctx)?;
            if !left.truthy() {
                return Ok(Value::Bool(false));
            }
            let right = eval_expr(rhs, ctx)?;
            return Ok(Value::Bool(right.truthy()));
        }
        BinOp::Or => {
            let left = eval_expr(lhs, ctx)?;
            if left.truthy() {
                return Ok(Value::Bool(true));
            }
            let right = eval_expr(rhs, ctx)?;
            return Ok(Value::Bool(right.truthy()));
        }
        _ => {}
    }

    let left = eval_expr(lhs, ctx)?;
    let right = eval_expr(rhs, ctx)?;
    let type_error = |op_name: &str| {
        Flow::Error(RuntimeError::operation(
            format!(
                "cannot apply `{}` to {} and {}",
                op_name,
                left.type_name(),
                right.type_name()
            ),
            Some(span),
        ))
    };

    match op {
        BinOp::Add => match (&left, &right) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (Value::Tuple(a), Value::Tuple(b)) => {
                let mut out = a.clone();
                out.extend(b.clone());
                Ok(Value::Tuple(out))
            }
            _ => Err(type_error("+")),
        },
        BinOp::Sub => match (&left, &right) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a - b)),
            _ => Err(type_error("-")),
        },
        BinOp::Mul => match (&left, &right) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a * b)),
            _ => Err(type_error("*")),
        },
        BinOp::Div => match (&left, &right) {
            (Value::Num(_), Value::Num(b)) if *b == 0.0 => Err(Flow::Error(
                RuntimeError::operation("division by zero", Some(span)),
            )),
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a / b)),
            _ => Err(type_error("/")),
        },
        BinOp::Mod => match (&left, &right) {
            (Value::Num(_), Value::Num(b)) if *b == 0.0 => Err(Flow::Error(
                RuntimeError::operation("modulo by zero", Some(span)),
            )),
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a % b)),
            _ => Err(type_error("%")),
        },
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::Ne => Ok(Value::Bool(left != right)),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(type_error(match op {
                    BinOp::Lt => "<",
                    BinOp::Gt => ">",
                    BinOp::Le => "<=",
                    _ => ">=",
                }));
            };
            let result = match op {
                BinOp::Lt => ordering == std::cmp::Ordering::Less,
                BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinOp::Le => ordering != std::cmp::Ordering::Greater,
                _ => ordering != std::cmp::Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled above"),
    }
}
