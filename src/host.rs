// ABOUTME: Host-facing introspection over registered functions

use crate::context::RuntimeContext;
use crate::value::{Callable, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub type_name: Option<String>,
    pub description: Option<String>,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub description: Option<String>,
    pub return_type: String,
}

/// List the host-registered functions plus any top-level variables holding
/// script callables (which always report `any`). Engine builtins are
/// fixtures of the language, not registrations, and are not listed.
pub fn get_functions(ctx: &RuntimeContext) -> Vec<FunctionInfo> {
    let mut out = Vec::new();
    for (name, callable) in ctx.functions() {
        if let Callable::Host(host) = callable {
            let params = host
                .params
                .as_ref()
                .map(|params| {
                    params
                        .iter()
                        .map(|p| ParamInfo {
                            name: p.name.clone(),
                            type_name: p.type_name.clone(),
                            description: p.description.clone(),
                            has_default: p.default.is_some(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            out.push(FunctionInfo {
                name: name.clone(),
                params,
                description: host.description.clone(),
                return_type: host.return_type.clone().unwrap_or_else(|| "any".to_string()),
            });
        }
    }
    for (name, value) in ctx.top_level_bindings() {
        if let Value::Callable(Callable::Script(script)) = value {
            out.push(FunctionInfo {
                name,
                params: script
                    .params
                    .iter()
                    .map(|p| ParamInfo {
                        name: p.name.clone(),
                        type_name: p.type_name.clone(),
                        description: None,
                        has_default: p.default.is_some(),
                    })
                    .collect(),
                description: None,
                return_type: "any".to_string(),
            });
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub total: usize,
    pub documented: usize,
    /// Rounded to two decimals; an empty registry reports 100.
    pub percentage: f64,
}

/// A function counts as documented when it has a non-whitespace description
/// and so does every one of its parameters.
pub fn documentation_coverage(ctx: &RuntimeContext) -> CoverageReport {
    let mut total = 0;
    let mut documented = 0;
    for callable in ctx.functions().values() {
        if let Callable::Host(host) = callable {
            total += 1;
            let described =
                |d: &Option<String>| d.as_ref().is_some_and(|d| !d.trim().is_empty());
            let fn_ok = described(&host.description);
            let params_ok = host
                .params
                .as_ref()
                .map(|ps| ps.iter().all(|p| described(&p.description)))
                .unwrap_or(false);
            if fn_ok && params_ok {
                documented += 1;
            }
        }
    }
    let percentage = if total == 0 {
        100.0
    } else {
        (documented as f64 / total as f64 * 10000.0).round() / 100.0
    };
    CoverageReport {
        total,
        documented,
        percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FunctionDef, ParamDef, RuntimeContextOptions, TypedFunction};

    fn typed(description: Option<&str>, param_desc: Option<&str>) -> FunctionDef {
        FunctionDef::Typed(TypedFunction {
            params: vec![ParamDef {
                name: "x".to_string(),
                type_name: Some("string".to_string()),
                description: param_desc.map(|s| s.to_string()),
                default: None,
            }],
            f: Box::new(|args| Ok(args[0].clone())),
            description: description.map(|s| s.to_string()),
            return_type: Some("string".to_string()),
        })
    }

    #[test]
    fn test_get_functions_lists_host_entries() {
        let ctx = RuntimeContext::new(RuntimeContextOptions {
            functions: vec![("shout".to_string(), typed(Some("uppercase"), Some("input")))],
            ..Default::default()
        })
        .unwrap();
        let functions = get_functions(&ctx);
        let info = functions.iter().find(|f| f.name == "shout").unwrap();
        assert_eq!(info.return_type, "string");
        assert_eq!(info.params.len(), 1);
        assert_eq!(info.params[0].name, "x");
    }

    #[test]
    fn test_coverage_empty_registry() {
        let ctx = RuntimeContext::default();
        let report = documentation_coverage(&ctx);
        assert_eq!(report.total, 0);
        assert_eq!(report.documented, 0);
        assert_eq!(report.percentage, 100.0);
    }

    #[test]
    fn test_coverage_counts_param_descriptions() {
        let ctx = RuntimeContext::new(RuntimeContextOptions {
            functions: vec![
                ("a".to_string(), typed(Some("doc"), Some("doc"))),
                ("b".to_string(), typed(Some("doc"), None)),
                ("c".to_string(), typed(None, Some("doc"))),
            ],
            ..Default::default()
        })
        .unwrap();
        let report = documentation_coverage(&ctx);
        assert_eq!(report.total, 3);
        assert_eq!(report.documented, 1);
        assert_eq!(report.percentage, 33.33);
    }
}
