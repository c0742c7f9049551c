// ABOUTME: Source positions and spans attached to tokens, AST nodes, and errors

use std::fmt;

/// A point in the source text. `line` and `col` are 1-based for human
/// consumption; `offset` is the 0-based byte offset into the source.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Position {
    pub line: usize,
    pub col: usize,
    pub offset: usize,
}

impl Position {
    pub fn start() -> Self {
        Position {
            line: 1,
            col: 1,
            offset: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A half-open region of source text.
///
/// Spans deliberately compare equal to each other: AST equality is structural
/// and ignores where nodes came from, so `Span`'s `PartialEq` is vacuous and
/// every AST node can simply derive `PartialEq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Span { start, end }
    }

    /// The smallest span covering both `self` and `other`.
    pub fn to(&self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }
}

impl PartialEq for Span {
    fn eq(&self, _: &Span) -> bool {
        true
    }
}

impl Eq for Span {}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_compare_vacuously() {
        let a = Span::new(
            Position {
                line: 1,
                col: 1,
                offset: 0,
            },
            Position {
                line: 1,
                col: 5,
                offset: 4,
            },
        );
        let b = Span::default();
        assert_eq!(a, b);
    }

    #[test]
    fn test_span_join() {
        let a = Span::new(
            Position {
                line: 1,
                col: 1,
                offset: 0,
            },
            Position {
                line: 1,
                col: 3,
                offset: 2,
            },
        );
        let b = Span::new(
            Position {
                line: 2,
                col: 1,
                offset: 10,
            },
            Position {
                line: 2,
                col: 4,
                offset: 13,
            },
        );
        let joined = a.to(b);
        assert_eq!(joined.start.offset, 0);
        assert_eq!(joined.end.offset, 13);
    }

    #[test]
    fn test_display() {
        let p = Position {
            line: 3,
            col: 7,
            offset: 42,
        };
        assert_eq!(format!("{}", p), "3:7");
    }
}
