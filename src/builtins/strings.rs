//! String methods, including the regex-backed match/replace family.

use super::{expect_arity, expect_arity_range, num_arg, str_arg};
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::value::{Callable, RuntimeFn, Value};
use regex::Regex;
use std::collections::BTreeMap;

pub fn register(methods: &mut BTreeMap<String, Callable>) {
    methods.insert(
        "split".to_string(),
        RuntimeFn::callable("split", method_split),
    );
    methods.insert("join".to_string(), RuntimeFn::callable("join", method_join));
    methods.insert(
        "lines".to_string(),
        RuntimeFn::callable("lines", method_lines),
    );
    methods.insert(
        "starts_with".to_string(),
        RuntimeFn::callable("starts_with", method_starts_with),
    );
    methods.insert(
        "ends_with".to_string(),
        RuntimeFn::callable("ends_with", method_ends_with),
    );
    methods.insert(
        "lower".to_string(),
        RuntimeFn::callable("lower", method_lower),
    );
    methods.insert(
        "upper".to_string(),
        RuntimeFn::callable("upper", method_upper),
    );
    methods.insert(
        "replace".to_string(),
        RuntimeFn::callable("replace", method_replace),
    );
    methods.insert(
        "replace_all".to_string(),
        RuntimeFn::callable("replace_all", method_replace_all),
    );
    methods.insert(
        "contains".to_string(),
        RuntimeFn::callable("contains", method_contains),
    );
    methods.insert(
        "match".to_string(),
        RuntimeFn::callable("match", method_match),
    );
    methods.insert(
        "is_match".to_string(),
        RuntimeFn::callable("is_match", method_is_match),
    );
    methods.insert(
        "index_of".to_string(),
        RuntimeFn::callable("index_of", method_index_of),
    );
    methods.insert(
        "repeat".to_string(),
        RuntimeFn::callable("repeat", method_repeat),
    );
    methods.insert(
        "pad_start".to_string(),
        RuntimeFn::callable("pad_start", method_pad_start),
    );
    methods.insert(
        "pad_end".to_string(),
        RuntimeFn::callable("pad_end", method_pad_end),
    );
}

fn receiver_str<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, RuntimeError> {
    match &args[0] {
        Value::Str(s) => Ok(s),
        other => Err(RuntimeError::invalid_method_target(
            name,
            other.type_name(),
            None,
        )),
    }
}

fn compile(name: &str, pattern: &str) -> Result<Regex, RuntimeError> {
    Regex::new(pattern)
        .map_err(|e| RuntimeError::operation(format!("{}: invalid pattern: {}", name, e), None))
}

fn method_split(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("split", args, 2)?;
    let s = receiver_str("split", args)?;
    let sep = str_arg("split", args, 1)?;
    Ok(Value::Tuple(
        s.split(sep).map(|p| Value::Str(p.to_string())).collect(),
    ))
}

/// Join any sequence, formatting each element.
fn method_join(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("join", args, 2)?;
    let sep = str_arg("join", args, 1)?;
    let parts: Vec<String> = match &args[0] {
        Value::Tuple(items) => items.iter().map(|v| format!("{}", v)).collect(),
        Value::Vector(items) => items.iter().map(|n| format!("{}", Value::Num(*n))).collect(),
        other => {
            return Err(RuntimeError::invalid_method_target(
                "join",
                other.type_name(),
                None,
            ));
        }
    };
    Ok(Value::Str(parts.join(sep)))
}

fn method_lines(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("lines", args, 1)?;
    let s = receiver_str("lines", args)?;
    Ok(Value::Tuple(
        s.lines().map(|l| Value::Str(l.to_string())).collect(),
    ))
}

fn method_starts_with(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("starts_with", args, 2)?;
    let s = receiver_str("starts_with", args)?;
    let prefix = str_arg("starts_with", args, 1)?;
    Ok(Value::Bool(s.starts_with(prefix)))
}

fn method_ends_with(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("ends_with", args, 2)?;
    let s = receiver_str("ends_with", args)?;
    let suffix = str_arg("ends_with", args, 1)?;
    Ok(Value::Bool(s.ends_with(suffix)))
}

fn method_lower(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("lower", args, 1)?;
    Ok(Value::Str(receiver_str("lower", args)?.to_lowercase()))
}

fn method_upper(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("upper", args, 1)?;
    Ok(Value::Str(receiver_str("upper", args)?.to_uppercase()))
}

fn method_replace(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("replace", args, 3)?;
    let s = receiver_str("replace", args)?;
    let pattern = compile("replace", str_arg("replace", args, 1)?)?;
    let replacement = str_arg("replace", args, 2)?;
    Ok(Value::Str(pattern.replace(s, replacement).into_owned()))
}

fn method_replace_all(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("replace_all", args, 3)?;
    let s = receiver_str("replace_all", args)?;
    let pattern = compile("replace_all", str_arg("replace_all", args, 1)?)?;
    let replacement = str_arg("replace_all", args, 2)?;
    Ok(Value::Str(pattern.replace_all(s, replacement).into_owned()))
}

/// Substring test for strings, key test for dicts, element test for tuples.
fn method_contains(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("contains", args, 2)?;
    match &args[0] {
        Value::Str(s) => {
            let needle = str_arg("contains", args, 1)?;
            Ok(Value::Bool(s.contains(needle)))
        }
        Value::Tuple(items) => Ok(Value::Bool(items.contains(&args[1]))),
        Value::Dict(map) => {
            let key = format!("{}", args[1]);
            Ok(Value::Bool(map.contains_key(&key)))
        }
        other => Err(RuntimeError::invalid_method_target(
            "contains",
            other.type_name(),
            None,
        )),
    }
}

/// First regex match: `[full, group1, ...]`, or the empty tuple when there
/// is none.
fn method_match(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("match", args, 2)?;
    let s = receiver_str("match", args)?;
    let pattern = compile("match", str_arg("match", args, 1)?)?;
    match pattern.captures(s) {
        Some(captures) => Ok(Value::Tuple(
            captures
                .iter()
                .map(|group| {
                    Value::Str(group.map(|m| m.as_str().to_string()).unwrap_or_default())
                })
                .collect(),
        )),
        None => Ok(Value::Tuple(Vec::new())),
    }
}

fn method_is_match(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("is_match", args, 2)?;
    let s = receiver_str("is_match", args)?;
    let pattern = compile("is_match", str_arg("is_match", args, 1)?)?;
    Ok(Value::Bool(pattern.is_match(s)))
}

/// Character index of the first occurrence, `-1` when absent.
fn method_index_of(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("index_of", args, 2)?;
    match &args[0] {
        Value::Str(s) => {
            let needle = str_arg("index_of", args, 1)?;
            match s.find(needle) {
                Some(byte_index) => {
                    let char_index = s[..byte_index].chars().count();
                    Ok(Value::Num(char_index as f64))
                }
                None => Ok(Value::Num(-1.0)),
            }
        }
        Value::Tuple(items) => Ok(Value::Num(
            items
                .iter()
                .position(|v| v == &args[1])
                .map(|i| i as f64)
                .unwrap_or(-1.0),
        )),
        other => Err(RuntimeError::invalid_method_target(
            "index_of",
            other.type_name(),
            None,
        )),
    }
}

fn method_repeat(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("repeat", args, 2)?;
    let s = receiver_str("repeat", args)?;
    let count = num_arg("repeat", args, 1)?;
    if count < 0.0 {
        return Err(RuntimeError::operation("repeat: negative count", None));
    }
    Ok(Value::Str(s.repeat(count.floor() as usize)))
}

fn pad(name: &str, args: &[Value], at_start: bool) -> Result<Value, RuntimeError> {
    expect_arity_range(name, args, 2, 3)?;
    let s = receiver_str(name, args)?;
    let width = num_arg(name, args, 1)?;
    if width < 0.0 || width.fract() != 0.0 {
        return Err(RuntimeError::operation(
            format!("{}: width must be a non-negative integer", name),
            None,
        ));
    }
    let width = width as usize;
    let fill = if args.len() == 3 {
        str_arg(name, args, 2)?.to_string()
    } else {
        " ".to_string()
    };
    let current = s.chars().count();
    if current >= width || fill.is_empty() {
        return Ok(Value::Str(s.to_string()));
    }
    let mut padding = String::new();
    let fill_chars: Vec<char> = fill.chars().collect();
    for i in 0..(width - current) {
        padding.push(fill_chars[i % fill_chars.len()]);
    }
    Ok(Value::Str(if at_start {
        format!("{}{}", padding, s)
    } else {
        format!("{}{}", s, padding)
    }))
}

fn method_pad_start(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    pad("pad_start", args, true)
}

fn method_pad_end(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    pad("pad_end", args, false)
}
