// ABOUTME: RuntimeContext construction, host options, validation, and cancellation

use crate::builtins;
use crate::error::RuntimeError;
use crate::scope::Scope;
use crate::span::Span;
use crate::value::{Callable, HostFn, HostImpl, HostParam, Value};
use regex::Regex;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const VALID_RETURN_TYPES: &[&str] = &["string", "number", "bool", "list", "dict", "vector", "any"];
const VALID_PARAM_TYPES: &[&str] = &["string", "number", "bool", "list", "dict", "tuple", "vector"];

/// Cooperative cancellation handle. Clonable and shareable across threads;
/// the evaluator checks it before each statement and each pipe target.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        CancelSignal(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct Callbacks {
    /// Receiver for the language-level `log` builtin.
    pub on_log: Option<Rc<dyn Fn(&Value)>>,
}

/// The six observability hooks. All run synchronously on the evaluation
/// thread.
#[derive(Clone, Default)]
pub struct Observability {
    pub on_step_start: Option<Rc<dyn Fn(usize, Span)>>,
    pub on_step_end: Option<Rc<dyn Fn(usize, &Value, Duration)>>,
    pub on_host_call: Option<Rc<dyn Fn(&str, &[Value])>>,
    pub on_function_return: Option<Rc<dyn Fn(&str, &Value)>>,
    pub on_capture: Option<Rc<dyn Fn(&str, &Value)>>,
    pub on_error: Option<Rc<dyn Fn(&RuntimeError)>>,
}

/// Declaration of one parameter of a typed host function.
pub struct ParamDef {
    pub name: String,
    pub type_name: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
}

pub struct TypedFunction {
    pub params: Vec<ParamDef>,
    pub f: HostImpl,
    pub description: Option<String>,
    pub return_type: Option<String>,
}

/// A host registration: raw functions receive their arguments untouched;
/// typed functions get arity, defaults, and type checks before dispatch.
pub enum FunctionDef {
    Raw(HostImpl),
    Typed(TypedFunction),
}

#[derive(Default)]
pub struct RuntimeContextOptions {
    pub variables: BTreeMap<String, Value>,
    pub functions: Vec<(String, FunctionDef)>,
    pub callbacks: Callbacks,
    pub observability: Observability,
    /// Per-host-call budget in milliseconds.
    pub timeout: Option<u64>,
    /// Regex patterns matched against string-typed statement values.
    pub auto_exceptions: Vec<String>,
    pub signal: Option<CancelSignal>,
    /// Reject registration of any function or parameter without a
    /// non-whitespace description.
    pub require_descriptions: bool,
}

/// Rejections raised while building a context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("function `{function}`: invalid return type `{value}`")]
    InvalidReturnType { function: String, value: String },
    #[error("function `{function}`: invalid type `{value}` for parameter `{param}`")]
    InvalidParamType {
        function: String,
        param: String,
        value: String,
    },
    #[error("function `{function}` requires a description")]
    MissingFunctionDescription { function: String },
    #[error("function `{function}`: parameter `{param}` requires a description")]
    MissingParamDescription { function: String, param: String },
    #[error("invalid auto-exception pattern `{pattern}`: {source}")]
    InvalidAutoException {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// All mutable state of one execution. A fresh context is required per
/// top-level `execute`; the callable and method registries are read-only
/// once built.
pub struct RuntimeContext {
    pub(crate) scope: Scope,
    pub(crate) globals: Scope,
    pub(crate) functions: BTreeMap<String, Callable>,
    pub(crate) methods: BTreeMap<String, Callable>,
    pub(crate) callbacks: Callbacks,
    pub(crate) observability: Observability,
    pub(crate) pipe_value: Value,
    pub(crate) acc_value: Option<Value>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) auto_exceptions: Vec<(String, Regex)>,
    pub(crate) signal: Option<CancelSignal>,
    pub(crate) annotations: Vec<BTreeMap<String, Value>>,
}

impl RuntimeContext {
    pub fn new(options: RuntimeContextOptions) -> Result<Self, ContextError> {
        let mut functions = BTreeMap::new();
        let mut methods = BTreeMap::new();
        builtins::register_builtins(&mut functions, &mut methods);

        for (name, def) in options.functions {
            let host = match def {
                FunctionDef::Raw(f) => {
                    if options.require_descriptions {
                        return Err(ContextError::MissingFunctionDescription { function: name });
                    }
                    HostFn {
                        name: name.clone(),
                        params: None,
                        return_type: None,
                        description: None,
                        f,
                    }
                }
                FunctionDef::Typed(typed) => {
                    validate_typed(&name, &typed, options.require_descriptions)?;
                    let params = typed
                        .params
                        .into_iter()
                        .map(|p| HostParam {
                            name: p.name,
                            type_name: p.type_name,
                            description: p.description,
                            default: p.default,
                        })
                        .collect();
                    HostFn {
                        name: name.clone(),
                        params: Some(params),
                        return_type: typed.return_type,
                        description: typed.description,
                        f: typed.f,
                    }
                }
            };
            functions.insert(name, Callable::Host(Rc::new(host)));
        }

        let mut auto_exceptions = Vec::new();
        for pattern in options.auto_exceptions {
            let regex = Regex::new(&pattern).map_err(|source| {
                ContextError::InvalidAutoException {
                    pattern: pattern.clone(),
                    source,
                }
            })?;
            auto_exceptions.push((pattern, regex));
        }

        let globals = Scope::new();
        for (name, value) in options.variables {
            globals.define(&name, value);
        }

        log::debug!(
            "context ready: {} functions, {} methods, {} auto-exception patterns",
            functions.len(),
            methods.len(),
            auto_exceptions.len()
        );

        Ok(RuntimeContext {
            scope: globals.clone(),
            globals,
            functions,
            methods,
            callbacks: options.callbacks,
            observability: options.observability,
            pipe_value: Value::empty_string(),
            acc_value: None,
            timeout: options.timeout.map(Duration::from_millis),
            auto_exceptions,
            signal: options.signal,
            annotations: Vec::new(),
        })
    }

    pub(crate) fn check_cancelled(&self, span: Option<Span>) -> Result<(), RuntimeError> {
        if let Some(signal) = &self.signal {
            if signal.is_cancelled() {
                return Err(RuntimeError::aborted(span));
            }
        }
        Ok(())
    }

    /// The innermost annotation frame (frames are pre-merged at push time).
    pub(crate) fn current_annotations(&self) -> BTreeMap<String, Value> {
        self.annotations.last().cloned().unwrap_or_default()
    }

    pub(crate) fn annotation(&self, key: &str) -> Option<Value> {
        self.annotations.last().and_then(|f| f.get(key).cloned())
    }

    pub fn functions(&self) -> &BTreeMap<String, Callable> {
        &self.functions
    }

    pub fn top_level_bindings(&self) -> BTreeMap<String, Value> {
        self.globals.local_bindings()
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        let mut functions = BTreeMap::new();
        let mut methods = BTreeMap::new();
        builtins::register_builtins(&mut functions, &mut methods);
        let globals = Scope::new();
        RuntimeContext {
            scope: globals.clone(),
            globals,
            functions,
            methods,
            callbacks: Callbacks::default(),
            observability: Observability::default(),
            pipe_value: Value::empty_string(),
            acc_value: None,
            timeout: None,
            auto_exceptions: Vec::new(),
            signal: None,
            annotations: Vec::new(),
        }
    }
}

fn validate_typed(
    name: &str,
    typed: &TypedFunction,
    require_descriptions: bool,
) -> Result<(), ContextError> {
    if let Some(rt) = &typed.return_type {
        if !VALID_RETURN_TYPES.contains(&rt.as_str()) {
            return Err(ContextError::InvalidReturnType {
                function: name.to_string(),
                value: rt.clone(),
            });
        }
    }
    for param in &typed.params {
        if let Some(t) = &param.type_name {
            if !VALID_PARAM_TYPES.contains(&t.as_str()) {
                return Err(ContextError::InvalidParamType {
                    function: name.to_string(),
                    param: param.name.clone(),
                    value: t.clone(),
                });
            }
        }
    }
    if require_descriptions {
        let documented = typed
            .description
            .as_ref()
            .is_some_and(|d| !d.trim().is_empty());
        if !documented {
            return Err(ContextError::MissingFunctionDescription {
                function: name.to_string(),
            });
        }
        for param in &typed.params {
            let documented = param
                .description
                .as_ref()
                .is_some_and(|d| !d.trim().is_empty());
            if !documented {
                return Err(ContextError::MissingParamDescription {
                    function: name.to_string(),
                    param: param.name.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> HostImpl {
        Box::new(|_args| Ok(Value::empty_string()))
    }

    #[test]
    fn test_invalid_return_type_rejected() {
        let options = RuntimeContextOptions {
            functions: vec![(
                "f".to_string(),
                FunctionDef::Typed(TypedFunction {
                    params: vec![],
                    f: noop(),
                    description: None,
                    return_type: Some("integer".to_string()),
                }),
            )],
            ..Default::default()
        };
        let err = RuntimeContext::new(options).err().unwrap();
        assert!(matches!(err, ContextError::InvalidReturnType { function, .. } if function == "f"));
    }

    #[test]
    fn test_invalid_param_type_rejected() {
        let options = RuntimeContextOptions {
            functions: vec![(
                "f".to_string(),
                FunctionDef::Typed(TypedFunction {
                    params: vec![ParamDef {
                        name: "x".to_string(),
                        type_name: Some("text".to_string()),
                        description: None,
                        default: None,
                    }],
                    f: noop(),
                    description: None,
                    return_type: None,
                }),
            )],
            ..Default::default()
        };
        let err = RuntimeContext::new(options).err().unwrap();
        assert!(matches!(err, ContextError::InvalidParamType { param, .. } if param == "x"));
    }

    #[test]
    fn test_require_descriptions() {
        let options = RuntimeContextOptions {
            require_descriptions: true,
            functions: vec![(
                "f".to_string(),
                FunctionDef::Typed(TypedFunction {
                    params: vec![ParamDef {
                        name: "x".to_string(),
                        type_name: Some("string".to_string()),
                        description: Some("   ".to_string()),
                        default: None,
                    }],
                    f: noop(),
                    description: Some("does things".to_string()),
                    return_type: None,
                }),
            )],
            ..Default::default()
        };
        let err = RuntimeContext::new(options).err().unwrap();
        assert!(matches!(err, ContextError::MissingParamDescription { param, .. } if param == "x"));
    }

    #[test]
    fn test_invalid_auto_exception_rejected() {
        let options = RuntimeContextOptions {
            auto_exceptions: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            RuntimeContext::new(options),
            Err(ContextError::InvalidAutoException { .. })
        ));
    }

    #[test]
    fn test_cancel_signal() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        let clone = signal.clone();
        clone.cancel();
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_initial_variables_visible() {
        let options = RuntimeContextOptions {
            variables: BTreeMap::from([("greeting".to_string(), Value::Str("hi".into()))]),
            ..Default::default()
        };
        let ctx = RuntimeContext::new(options).unwrap();
        assert_eq!(ctx.scope.get("greeting"), Some(Value::Str("hi".into())));
    }
}
