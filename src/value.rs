// ABOUTME: Runtime value types, deep equality, formatting, and type inference

use crate::ast;
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::scope::Scope;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A runtime value. There is no null: absence is modeled with each type's
/// empty form (`""`, `0`, `false`, `[]`, `[:]`).
///
/// Dicts are `BTreeMap`s so iteration is always ascending by key; that
/// ordering is part of the language's determinism guarantees, not an
/// implementation detail.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    /// Ordered sequence (positional args-shape included).
    Tuple(Vec<Value>),
    /// Args-shaped mapping with string keys, insertion-ordered for
    /// diagnostics; equality is order-independent.
    Args(IndexMap<String, Value>),
    Dict(BTreeMap<String, Value>),
    /// Numeric vector, as produced by embedding-style host functions.
    Vector(Vec<f64>),
    Callable(Callable),
}

impl Value {
    pub fn empty_string() -> Value {
        Value::Str(String::new())
    }

    /// The observable type name: one of `string`, `number`, `bool`,
    /// `tuple`, `args`, `dict`, `vector`, `closure`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "bool",
            Value::Tuple(_) => "tuple",
            Value::Args(_) => "args",
            Value::Dict(_) => "dict",
            Value::Vector(_) => "vector",
            Value::Callable(_) => "closure",
        }
    }

    /// Emptiness per type; callables are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::Num(n) => *n == 0.0,
            Value::Bool(b) => !b,
            Value::Tuple(items) => items.is_empty(),
            Value::Args(map) => map.is_empty(),
            Value::Dict(map) => map.is_empty(),
            Value::Vector(items) => items.is_empty(),
            Value::Callable(_) => false,
        }
    }

    pub fn truthy(&self) -> bool {
        !self.is_empty()
    }

    /// The empty value of this value's own type.
    pub fn empty_of_same_type(&self) -> Value {
        match self {
            Value::Str(_) => Value::Str(String::new()),
            Value::Num(_) => Value::Num(0.0),
            Value::Bool(_) => Value::Bool(false),
            Value::Tuple(_) => Value::Tuple(Vec::new()),
            Value::Args(_) => Value::Args(IndexMap::new()),
            Value::Dict(_) => Value::Dict(BTreeMap::new()),
            Value::Vector(_) => Value::Vector(Vec::new()),
            Value::Callable(_) => Value::Str(String::new()),
        }
    }
}

/// Does a value satisfy a declared parameter type? `list` is the host-facing
/// spelling of `tuple`; `any` matches everything.
pub fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "any" => true,
        "string" => matches!(value, Value::Str(_)),
        "number" => matches!(value, Value::Num(_)),
        "bool" => matches!(value, Value::Bool(_)),
        "tuple" | "list" => matches!(value, Value::Tuple(_)),
        "args" => matches!(value, Value::Args(_)),
        "dict" => matches!(value, Value::Dict(_)),
        "vector" => matches!(value, Value::Vector(_)),
        "closure" => matches!(value, Value::Callable(_)),
        _ => false,
    }
}

// ============================================================================
// Callables
// ============================================================================

#[derive(Clone)]
pub enum Callable {
    /// User-defined closure.
    Script(Rc<ScriptFn>),
    /// Engine-provided builtin or method.
    Runtime(Rc<RuntimeFn>),
    /// Host-registered function (raw or typed).
    Host(Rc<HostFn>),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::Script(_) => "<closure>",
            Callable::Runtime(f) => &f.name,
            Callable::Host(f) => &f.name,
        }
    }
}

#[derive(Clone)]
pub struct ScriptParam {
    pub name: String,
    pub type_name: Option<String>,
    pub default: Option<ast::Expr>,
    pub annotations: BTreeMap<String, Value>,
}

pub struct ScriptFn {
    pub params: Vec<ScriptParam>,
    pub body: Rc<ast::Body>,
    /// Lexical scope captured at the closure literal. Name lookup on
    /// invocation roots here, never in the calling scope.
    pub defining_scope: Scope,
    /// Closure-level annotations inherited from the enclosing frame.
    pub annotations: BTreeMap<String, Value>,
    /// Back-reference to the containing dict for dict-stored callables.
    /// The snapshot holds unbound callables, so no cycle exists and
    /// equality never recurses through it.
    pub bound_dict: Option<BTreeMap<String, Value>>,
}

pub type RuntimeImpl = Box<dyn Fn(&[Value], &mut RuntimeContext) -> Result<Value, RuntimeError>>;

pub struct RuntimeFn {
    pub name: String,
    pub f: RuntimeImpl,
}

impl RuntimeFn {
    pub fn callable(
        name: &str,
        f: impl Fn(&[Value], &mut RuntimeContext) -> Result<Value, RuntimeError> + 'static,
    ) -> Callable {
        Callable::Runtime(Rc::new(RuntimeFn {
            name: name.to_string(),
            f: Box::new(f),
        }))
    }

    /// Same as [`RuntimeFn::callable`], already wrapped as a value.
    pub fn wrap(
        name: &str,
        f: impl Fn(&[Value], &mut RuntimeContext) -> Result<Value, RuntimeError> + 'static,
    ) -> Value {
        Value::Callable(RuntimeFn::callable(name, f))
    }
}

pub type HostImpl = Box<dyn Fn(&[Value]) -> Result<Value, String>>;

pub struct HostParam {
    pub name: String,
    pub type_name: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
}

pub struct HostFn {
    pub name: String,
    /// `None` for raw functions, which skip all validation.
    pub params: Option<Vec<HostParam>>,
    /// Validated at registration; `None` reports as `any`.
    pub return_type: Option<String>,
    pub description: Option<String>,
    pub f: HostImpl,
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Script(s) => f
                .debug_struct("Script")
                .field("params", &s.params.len())
                .finish(),
            Callable::Runtime(r) => f.debug_struct("Runtime").field("name", &r.name).finish(),
            Callable::Host(h) => f.debug_struct("Host").field("name", &h.name).finish(),
        }
    }
}

// ============================================================================
// Deep equality
// ============================================================================

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Args(a), Value::Args(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Callable) -> bool {
        match (self, other) {
            // Script callables compare structurally: parameter list and body
            // AST, spans ignored. Defining scope, annotations, and the dict
            // back-reference do not participate.
            (Callable::Script(a), Callable::Script(b)) => {
                a.params.len() == b.params.len()
                    && a.params.iter().zip(b.params.iter()).all(|(p, q)| {
                        p.name == q.name && p.type_name == q.type_name && p.default == q.default
                    })
                    && a.body == b.body
            }
            (Callable::Runtime(a), Callable::Runtime(b)) => Rc::ptr_eq(a, b),
            (Callable::Host(a), Callable::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Format a number the way it reads best: integral values lose the `.0`.
fn write_num(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Num(n) => write_num(f, *n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Tuple(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Args(map) => {
                if map.is_empty() {
                    return write!(f, "[:]");
                }
                write!(f, "[")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "]")
            }
            Value::Dict(map) => {
                if map.is_empty() {
                    return write!(f, "[:]");
                }
                write!(f, "[")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "]")
            }
            Value::Vector(items) => {
                write!(f, "[")?;
                for (i, n) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                        write!(f, "{}", *n as i64)?;
                    } else {
                        write!(f, "{}", n)?;
                    }
                }
                write!(f, "]")
            }
            Value::Callable(c) => match c {
                Callable::Script(_) => write!(f, "<closure>"),
                Callable::Runtime(r) => write!(f, "<fn {}>", r.name),
                Callable::Host(h) => write!(f, "<fn {}>", h.name),
            },
        }
    }
}
