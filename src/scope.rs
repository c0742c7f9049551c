// ABOUTME: Lexically chained scopes with type-locked variable bindings

use crate::error::{ids, RuntimeError};
use crate::span::Span;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// One frame in the lexical scope chain. Cheap to clone; closures keep their
/// defining scope alive by holding one of these.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeData>,
}

struct ScopeData {
    parent: Option<Scope>,
    vars: RefCell<BTreeMap<String, Value>>,
    /// Type locks: a name's type is fixed by its first capture in the scope
    /// that owns it.
    types: RefCell<BTreeMap<String, &'static str>>,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            inner: Rc::new(ScopeData {
                parent: None,
                vars: RefCell::new(BTreeMap::new()),
                types: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    pub fn child(&self) -> Scope {
        Scope {
            inner: Rc::new(ScopeData {
                parent: Some(self.clone()),
                vars: RefCell::new(BTreeMap::new()),
                types: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    pub fn same_as(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Look a name up through the parent chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.inner.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.inner.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Store a value: the innermost scope already holding the name wins;
    /// otherwise the name is created here. Either way the type lock is
    /// enforced.
    pub fn set(&self, name: &str, value: Value, span: Option<Span>) -> Result<(), RuntimeError> {
        if let Some(owner) = self.owner_of(name) {
            owner.check_lock(name, &value, span)?;
            owner
                .inner
                .vars
                .borrow_mut()
                .insert(name.to_string(), value);
            return Ok(());
        }
        self.inner
            .types
            .borrow_mut()
            .insert(name.to_string(), value.type_name());
        self.inner
            .vars
            .borrow_mut()
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Bind a name in this scope specifically (parameters, loop variables),
    /// shadowing any outer binding.
    pub fn define(&self, name: &str, value: Value) {
        self.inner
            .types
            .borrow_mut()
            .insert(name.to_string(), value.type_name());
        self.inner
            .vars
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    fn owner_of(&self, name: &str) -> Option<Scope> {
        if self.inner.vars.borrow().contains_key(name) {
            return Some(self.clone());
        }
        self.inner.parent.as_ref().and_then(|p| p.owner_of(name))
    }

    fn check_lock(&self, name: &str, value: &Value, span: Option<Span>) -> Result<(), RuntimeError> {
        if let Some(locked) = self.inner.types.borrow().get(name) {
            if *locked != value.type_name() {
                return Err(RuntimeError::new(
                    ids::TYPE_MISMATCH,
                    format!(
                        "variable `${}` is locked to type {}, cannot store {}",
                        name,
                        locked,
                        value.type_name()
                    ),
                    span,
                ));
            }
        }
        Ok(())
    }

    /// The bindings of this scope alone (no parents), for the result
    /// snapshot of `execute`.
    pub fn local_bindings(&self) -> BTreeMap<String, Value> {
        self.inner.vars.borrow().clone()
    }

    /// Flatten the visible bindings into a fresh, parentless scope. A
    /// closure literal captures this as its defining scope, so names
    /// captured in the enclosing scope *after* the literal are not visible
    /// when the closure later runs.
    pub fn snapshot(&self) -> Scope {
        let mut chain = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(scope) = cursor {
            chain.push(scope.clone());
            cursor = scope.inner.parent.clone();
        }
        let flat = Scope::new();
        // outermost first, so inner bindings shadow outer ones
        for scope in chain.into_iter().rev() {
            for (name, value) in scope.inner.vars.borrow().iter() {
                flat.define(name, value.clone());
            }
            for (name, lock) in scope.inner.types.borrow().iter() {
                flat.inner.types.borrow_mut().insert(name.clone(), *lock);
            }
        }
        flat
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.inner.vars.borrow().keys().cloned().collect();
        f.debug_struct("Scope")
            .field("names", &names)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let scope = Scope::new();
        scope.set("x", Value::Num(42.0), None).unwrap();
        assert_eq!(scope.get("x"), Some(Value::Num(42.0)));
        assert_eq!(scope.get("missing"), None);
    }

    #[test]
    fn test_child_sees_parent() {
        let parent = Scope::new();
        parent.set("x", Value::Num(1.0), None).unwrap();
        let child = parent.child();
        assert_eq!(child.get("x"), Some(Value::Num(1.0)));
    }

    #[test]
    fn test_write_targets_owning_scope() {
        let parent = Scope::new();
        parent.set("x", Value::Num(1.0), None).unwrap();
        let child = parent.child();
        child.set("x", Value::Num(2.0), None).unwrap();
        // The parent owns the name, so the write went there
        assert_eq!(parent.get("x"), Some(Value::Num(2.0)));
        assert!(child.local_bindings().is_empty());
    }

    #[test]
    fn test_define_shadows() {
        let parent = Scope::new();
        parent.set("x", Value::Num(1.0), None).unwrap();
        let child = parent.child();
        child.define("x", Value::Num(2.0));
        assert_eq!(child.get("x"), Some(Value::Num(2.0)));
        assert_eq!(parent.get("x"), Some(Value::Num(1.0)));
    }

    #[test]
    fn test_type_lock() {
        let scope = Scope::new();
        scope.set("x", Value::Num(1.0), None).unwrap();
        scope.set("x", Value::Num(2.0), None).unwrap();
        let err = scope
            .set("x", Value::Str("two".into()), None)
            .unwrap_err();
        assert_eq!(err.id.as_str(), "RILL-R001");
    }

    #[test]
    fn test_shadowing_relocks() {
        let parent = Scope::new();
        parent.set("x", Value::Num(1.0), None).unwrap();
        let child = parent.child();
        child.define("x", Value::Str("s".into()));
        // The child's lock is independent of the parent's
        assert_eq!(child.get("x"), Some(Value::Str("s".into())));
    }
}
