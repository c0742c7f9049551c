// ABOUTME: Error identifiers, categorized error types, and the control-flow carrier

use crate::span::Span;
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// The four error namespaces. The checker namespace is validated here but
/// only constructed by the external linter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Lexer,
    Parser,
    Checker,
    Runtime,
}

impl ErrorCategory {
    pub fn prefix(&self) -> &'static str {
        match self {
            ErrorCategory::Lexer => "RILL-L",
            ErrorCategory::Parser => "RILL-P",
            ErrorCategory::Checker => "RILL-C",
            ErrorCategory::Runtime => "RILL-R",
        }
    }
}

/// A stable error identifier such as `RILL-R005`.
///
/// Only the constants in [`ids`] exist; arbitrary strings must go through
/// [`ErrorId::parse`], which rejects unknown identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorId(&'static str);

pub mod ids {
    use super::ErrorId;

    pub const UNEXPECTED_CHAR: ErrorId = ErrorId("RILL-L001");
    pub const UNTERMINATED_STRING: ErrorId = ErrorId("RILL-L002");
    pub const TRIPLE_QUOTE_IN_INTERPOLATION: ErrorId = ErrorId("RILL-L003");
    pub const INVALID_NUMBER: ErrorId = ErrorId("RILL-L004");

    pub const UNEXPECTED_TOKEN: ErrorId = ErrorId("RILL-P001");
    pub const EMPTY_INTERPOLATION: ErrorId = ErrorId("RILL-P002");
    pub const UNTERMINATED_INTERPOLATION: ErrorId = ErrorId("RILL-P003");
    pub const INVALID_PATTERN: ErrorId = ErrorId("RILL-P004");

    pub const CHECKER_RULE: ErrorId = ErrorId("RILL-C001");

    pub const TYPE_MISMATCH: ErrorId = ErrorId("RILL-R001");
    pub const OPERATION: ErrorId = ErrorId("RILL-R002");
    pub const INVALID_METHOD_TARGET: ErrorId = ErrorId("RILL-R003");
    pub const UNDEFINED_VARIABLE: ErrorId = ErrorId("RILL-R005");
    pub const UNKNOWN_FUNCTION: ErrorId = ErrorId("RILL-R006");
    pub const UNKNOWN_METHOD: ErrorId = ErrorId("RILL-R007");
    pub const UNDEFINED_ANNOTATION: ErrorId = ErrorId("RILL-R008");
    pub const MISSING_FIELD: ErrorId = ErrorId("RILL-R009");
    pub const TIMEOUT: ErrorId = ErrorId("RILL-R010");
    pub const ABORTED: ErrorId = ErrorId("RILL-R011");
    pub const AUTO_EXCEPTION: ErrorId = ErrorId("RILL-R012");
    pub const ITERATION_LIMIT: ErrorId = ErrorId("RILL-R013");
    pub const USER_ERROR: ErrorId = ErrorId("RILL-R014");

    pub(super) const ALL: &[ErrorId] = &[
        UNEXPECTED_CHAR,
        UNTERMINATED_STRING,
        TRIPLE_QUOTE_IN_INTERPOLATION,
        INVALID_NUMBER,
        UNEXPECTED_TOKEN,
        EMPTY_INTERPOLATION,
        UNTERMINATED_INTERPOLATION,
        INVALID_PATTERN,
        CHECKER_RULE,
        TYPE_MISMATCH,
        OPERATION,
        INVALID_METHOD_TARGET,
        UNDEFINED_VARIABLE,
        UNKNOWN_FUNCTION,
        UNKNOWN_METHOD,
        UNDEFINED_ANNOTATION,
        MISSING_FIELD,
        TIMEOUT,
        ABORTED,
        AUTO_EXCEPTION,
        ITERATION_LIMIT,
        USER_ERROR,
    ];
}

/// Rejection from [`ErrorId::parse`] or a category-checked constructor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidErrorId {
    #[error("unknown error id `{0}`")]
    Unknown(String),
    #[error("error id `{id}` belongs to the wrong category (expected {expected})")]
    CategoryMismatch { id: String, expected: &'static str },
}

impl ErrorId {
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn category(&self) -> ErrorCategory {
        match self.0.as_bytes()[5] {
            b'L' => ErrorCategory::Lexer,
            b'P' => ErrorCategory::Parser,
            b'C' => ErrorCategory::Checker,
            _ => ErrorCategory::Runtime,
        }
    }

    /// Resolve a string to a known id. Unknown ids are rejected.
    pub fn parse(s: &str) -> Result<ErrorId, InvalidErrorId> {
        ids::ALL
            .iter()
            .find(|id| id.0 == s)
            .copied()
            .ok_or_else(|| InvalidErrorId::Unknown(s.to_string()))
    }

    fn parse_in(s: &str, category: ErrorCategory) -> Result<ErrorId, InvalidErrorId> {
        let id = ErrorId::parse(s)?;
        if id.category() != category {
            return Err(InvalidErrorId::CategoryMismatch {
                id: s.to_string(),
                expected: category.prefix(),
            });
        }
        Ok(id)
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// ============================================================================
// Lexer / parser errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{id}: {message} at {span}")]
pub struct LexerError {
    pub id: ErrorId,
    pub message: String,
    pub span: Span,
}

impl LexerError {
    pub(crate) fn new(id: ErrorId, message: impl Into<String>, span: Span) -> Self {
        debug_assert!(id.category() == ErrorCategory::Lexer);
        LexerError {
            id,
            message: message.into(),
            span,
        }
    }

    /// Validated constructor for dynamically supplied ids. Ids from another
    /// category are rejected.
    pub fn from_id(
        id: &str,
        message: impl Into<String>,
        span: Span,
    ) -> Result<Self, InvalidErrorId> {
        let id = ErrorId::parse_in(id, ErrorCategory::Lexer)?;
        Ok(LexerError::new(id, message, span))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{id}: {message} at {span}")]
pub struct ParseError {
    pub id: ErrorId,
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub(crate) fn new(id: ErrorId, message: impl Into<String>, span: Span) -> Self {
        debug_assert!(id.category() == ErrorCategory::Parser);
        ParseError {
            id,
            message: message.into(),
            span,
        }
    }

    pub fn from_id(
        id: &str,
        message: impl Into<String>,
        span: Span,
    ) -> Result<Self, InvalidErrorId> {
        let id = ErrorId::parse_in(id, ErrorCategory::Parser)?;
        Ok(ParseError::new(id, message, span))
    }
}

// ============================================================================
// Runtime errors
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub id: ErrorId,
    pub message: String,
    pub span: Option<Span>,
    /// Structured payload, e.g. `{limit, iterations}` for iteration-limit
    /// overruns or `{pattern, value}` for auto-exception matches.
    pub context: Option<serde_json::Value>,
}

impl std::error::Error for RuntimeError {}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)?;
        if let Some(span) = self.span {
            write!(f, " at {}", span)?;
        }
        Ok(())
    }
}

impl RuntimeError {
    pub(crate) fn new(id: ErrorId, message: impl Into<String>, span: Option<Span>) -> Self {
        debug_assert!(id.category() == ErrorCategory::Runtime);
        RuntimeError {
            id,
            message: message.into(),
            span,
            context: None,
        }
    }

    pub fn from_id(
        id: &str,
        message: impl Into<String>,
        span: Option<Span>,
    ) -> Result<Self, InvalidErrorId> {
        let id = ErrorId::parse_in(id, ErrorCategory::Runtime)?;
        Ok(RuntimeError::new(id, message, span))
    }

    pub(crate) fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub(crate) fn with_span(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    // ----- factories, one per error kind -----

    pub fn type_mismatch(expected: &str, actual: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::TYPE_MISMATCH,
            format!("expected {}, got {}", expected, actual),
            span,
        )
    }

    pub fn arity(name: &str, expected: usize, actual: usize, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::TYPE_MISMATCH,
            format!(
                "{}: expected {} argument{}, got {}",
                name,
                expected,
                if expected == 1 { "" } else { "s" },
                actual
            ),
            span,
        )
    }

    pub fn operation(message: impl Into<String>, span: Option<Span>) -> Self {
        RuntimeError::new(ids::OPERATION, message, span)
    }

    pub fn not_callable(actual: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::OPERATION,
            format!("value of type {} is not callable", actual),
            span,
        )
    }

    pub fn invalid_method_target(method: &str, actual: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::INVALID_METHOD_TARGET,
            format!("method `{}` cannot be applied to {}", method, actual),
            span,
        )
    }

    pub fn undefined_variable(name: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::UNDEFINED_VARIABLE,
            format!("undefined variable `${}`", name),
            span,
        )
    }

    pub fn unknown_function(name: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::UNKNOWN_FUNCTION,
            format!("unknown function `{}`", name),
            span,
        )
    }

    pub fn unknown_method(name: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::UNKNOWN_METHOD,
            format!("unknown method `{}`", name),
            span,
        )
    }

    pub fn undefined_annotation(key: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::UNDEFINED_ANNOTATION,
            format!("undefined annotation `{}`", key),
            span,
        )
    }

    pub fn missing_field(key: &str, span: Option<Span>) -> Self {
        RuntimeError::new(ids::MISSING_FIELD, format!("missing field `{}`", key), span)
    }

    pub fn timeout(name: &str, millis: u128, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::TIMEOUT,
            format!("call to `{}` exceeded the {}ms timeout", name, millis),
            span,
        )
    }

    pub fn aborted(span: Option<Span>) -> Self {
        RuntimeError::new(ids::ABORTED, "execution aborted", span)
    }

    pub fn auto_exception(pattern: &str, value: &str, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::AUTO_EXCEPTION,
            format!("auto-exception pattern `{}` matched", pattern),
            span,
        )
        .with_context(serde_json::json!({ "pattern": pattern, "value": value }))
    }

    pub fn iteration_limit(limit: u64, iterations: u64, span: Option<Span>) -> Self {
        RuntimeError::new(
            ids::ITERATION_LIMIT,
            format!("loop exceeded iteration limit of {}", limit),
            span,
        )
        .with_context(serde_json::json!({ "limit": limit, "iterations": iterations }))
    }

    pub fn user(message: impl Into<String>, span: Option<Span>) -> Self {
        RuntimeError::new(ids::USER_ERROR, message, span)
    }
}

// ============================================================================
// Umbrella error and control flow
// ============================================================================

/// Any error surfaced out of `execute` or the front end.
#[derive(Debug, Clone, Error)]
pub enum RillError {
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl RillError {
    pub fn id(&self) -> ErrorId {
        match self {
            RillError::Lexer(e) => e.id,
            RillError::Parse(e) => e.id,
            RillError::Runtime(e) => e.id,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            RillError::Lexer(e) => Some(e.span),
            RillError::Parse(e) => Some(e.span),
            RillError::Runtime(e) => e.span,
        }
    }
}

/// Non-local exit carrier used inside the evaluator. `Break` and `Return`
/// are not errors: they never fire `onError`, and are caught by the nearest
/// sequential loop / script-callable invocation respectively.
#[derive(Debug, Clone)]
pub enum Flow {
    Break(Value),
    Return(Value),
    Error(RuntimeError),
}

impl From<RuntimeError> for Flow {
    fn from(e: RuntimeError) -> Self {
        Flow::Error(e)
    }
}

pub type EvalResult<T = Value> = Result<T, Flow>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_parse_known() {
        let id = ErrorId::parse("RILL-R005").unwrap();
        assert_eq!(id, ids::UNDEFINED_VARIABLE);
        assert_eq!(id.category(), ErrorCategory::Runtime);
    }

    #[test]
    fn test_id_parse_unknown_rejected() {
        assert!(matches!(
            ErrorId::parse("RILL-R999"),
            Err(InvalidErrorId::Unknown(_))
        ));
        assert!(ErrorId::parse("bogus").is_err());
    }

    #[test]
    fn test_category_mismatch_rejected() {
        let err = LexerError::from_id("RILL-R001", "nope", Span::default());
        assert!(matches!(err, Err(InvalidErrorId::CategoryMismatch { .. })));

        let ok = LexerError::from_id("RILL-L002", "unterminated", Span::default());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_runtime_from_id_rejects_parser_id() {
        assert!(RuntimeError::from_id("RILL-P001", "nope", None).is_err());
        assert!(RuntimeError::from_id("RILL-R009", "missing", None).is_ok());
    }

    #[test]
    fn test_checker_ids_round_trip() {
        let id = ErrorId::parse("RILL-C001").unwrap();
        assert_eq!(id.category(), ErrorCategory::Checker);
    }

    #[test]
    fn test_iteration_limit_context() {
        let err = RuntimeError::iteration_limit(3, 4, None);
        let ctx = err.context.unwrap();
        assert_eq!(ctx["limit"], 3);
        assert_eq!(ctx["iterations"], 4);
    }

    #[test]
    fn test_display_includes_id() {
        let err = RuntimeError::undefined_variable("k", None);
        let text = format!("{}", err);
        assert!(text.contains("RILL-R005"));
        assert!(text.contains("$k"));
    }
}
