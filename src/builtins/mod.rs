//! # Built-in Functions and Methods
//!
//! The fixed set of names every context starts with, organized by category:
//!
//! - **[core]**: `identity`, `type`, `log`, `json`, `parse_json`,
//!   `enumerate`, `range`, `repeat`
//! - **[parsing]**: `parse_auto`, `parse_xml`, `parse_fence`,
//!   `parse_fences`, `parse_frontmatter`, `parse_checklist`
//! - **[conversion]** methods: `str`, `num`, `len`, `trim`
//! - **[collections]** methods: `head`, `tail`, `at`, `first`, `empty`,
//!   `keys`, `values`, `entries`
//! - **[strings]** methods: `split`, `join`, `lines`, `starts_with`,
//!   `ends_with`, `lower`, `upper`, `replace`, `replace_all`, `contains`,
//!   `match`, `is_match`, `index_of`, `repeat`, `pad_start`, `pad_end`
//! - **[comparison]** methods: `eq`, `ne`, `lt`, `gt`, `le`, `ge`
//!
//! Each category module exposes a `register` function that installs its
//! names into the function or method registry.

use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::value::{Callable, Value};
use std::collections::BTreeMap;

pub mod collections;
pub mod comparison;
pub mod conversion;
pub mod core;
pub mod parsing;
pub mod strings;

/// Install every builtin into the given registries.
pub fn register_builtins(
    functions: &mut BTreeMap<String, Callable>,
    methods: &mut BTreeMap<String, Callable>,
) {
    core::register(functions);
    parsing::register(functions);
    conversion::register(methods);
    collections::register(methods);
    strings::register(methods);
    comparison::register(methods);
}

// ----- shared argument helpers -----

pub(crate) fn expect_arity(name: &str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::arity(name, expected, args.len(), None));
    }
    Ok(())
}

pub(crate) fn expect_arity_range(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::arity(name, min, args.len(), None));
    }
    Ok(())
}

pub(crate) fn str_arg<'a>(name: &str, args: &'a [Value], i: usize) -> Result<&'a str, RuntimeError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(RuntimeError::new(
            crate::error::ids::TYPE_MISMATCH,
            format!(
                "{}: expected string, got {} at argument {}",
                name,
                other.type_name(),
                i + 1
            ),
            None,
        )),
        None => Err(RuntimeError::arity(name, i + 1, args.len(), None)),
    }
}

pub(crate) fn num_arg(name: &str, args: &[Value], i: usize) -> Result<f64, RuntimeError> {
    match args.get(i) {
        Some(Value::Num(n)) => Ok(*n),
        Some(other) => Err(RuntimeError::new(
            crate::error::ids::TYPE_MISMATCH,
            format!(
                "{}: expected number, got {} at argument {}",
                name,
                other.type_name(),
                i + 1
            ),
            None,
        )),
        None => Err(RuntimeError::arity(name, i + 1, args.len(), None)),
    }
}

/// Materialize a value's elements (the collection-operator view), adapted
/// to the builtin error type.
pub(crate) fn items_of(value: Value, ctx: &mut RuntimeContext) -> Result<Vec<Value>, RuntimeError> {
    crate::eval::collection_items_for_builtins(value, ctx)
}
