// ABOUTME: Crate root: the Rill language core and its host-facing surface

//! Rill is an embeddable scripting language for orchestrating pipelines:
//! host-provided functions composed left-to-right with `->` over typed
//! values.
//!
//! ```
//! use rill::{parse, execute, RuntimeContext, Value};
//!
//! let ast = parse(r#""hello" -> .len"#).unwrap();
//! let mut ctx = RuntimeContext::default();
//! let result = execute(&ast, &mut ctx).unwrap();
//! assert_eq!(result.value, Value::Num(5.0));
//! ```

pub mod ast;
pub mod builtins;
pub mod context;
pub mod error;
pub mod eval;
pub mod host;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod span;
pub mod stepper;
pub mod token;
pub mod value;

pub use context::{
    Callbacks, CancelSignal, ContextError, FunctionDef, Observability, ParamDef, RuntimeContext,
    RuntimeContextOptions, TypedFunction,
};
pub use error::{ErrorId, Flow, LexerError, ParseError, RillError, RuntimeError};
pub use eval::{execute, ExecutionResult};
pub use host::{documentation_coverage, get_functions, CoverageReport, FunctionInfo, ParamInfo};
pub use parser::parse;
pub use span::{Position, Span};
pub use stepper::Stepper;
pub use value::{Callable, Value};

/// Parse and execute in one call.
pub fn run(source: &str, ctx: &mut RuntimeContext) -> Result<ExecutionResult, RillError> {
    let ast = parser::parse(source)?;
    eval::execute(&ast, ctx)
}
