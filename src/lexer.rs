// ABOUTME: Hand-written lexer turning source text into spanned tokens

use crate::error::{ids, LexerError};
use crate::span::{Position, Span};
use crate::token::{StrPart, Token, TokenKind};

pub type LexResult<T> = Result<T, LexerError>;

/// Character scanner with position tracking.
///
/// Newline tokens are suppressed inside parentheses and brackets (where they
/// can never end a statement) and kept inside braces, whose bodies are
/// statement sequences. String interpolations are captured as raw source
/// plus their starting position; the parser re-lexes them with
/// [`Lexer::with_origin`] so nested spans land in the real source.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    offset: usize,
    delims: Vec<char>,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer::with_origin(source, Position::start())
    }

    /// Start lexing at an arbitrary position. Used for interpolation bodies.
    pub fn with_origin(source: &str, origin: Position) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: origin.line,
            col: origin.col,
            offset: origin.offset,
            delims: Vec::new(),
            tokens: Vec::new(),
        }
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\n' => {
                    let start = self.position();
                    self.bump();
                    if self.newlines_significant() {
                        self.push(TokenKind::Newline, "\n", start);
                    }
                }
                '"' => {
                    let token = self.lex_string()?;
                    self.tokens.push(token);
                }
                '$' => self.lex_dollar(),
                c if c.is_ascii_digit() => self.lex_number()?,
                c if is_ident_start(c) => self.lex_ident(),
                _ => self.lex_operator()?,
            }
        }
        let at = self.position();
        self.push(TokenKind::Eof, "", at);
        Ok(self.tokens)
    }

    // ----- cursor -----

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        self.offset += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            col: self.col,
            offset: self.offset,
        }
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>, start: Position) {
        let span = Span::new(start, self.position());
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn newlines_significant(&self) -> bool {
        matches!(self.delims.last(), None | Some(&'{'))
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    // ----- scanners -----

    fn lex_number(&mut self) -> LexResult<()> {
        let start = self.position();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // Consume a decimal point only when a digit follows, so `1.len`
        // still lexes as a number and a method call.
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let value: f64 = text.parse().map_err(|_| {
            LexerError::new(
                ids::INVALID_NUMBER,
                format!("invalid numeric literal `{}`", text),
                Span::new(start, self.position()),
            )
        })?;
        self.push(TokenKind::Number(value), text.clone(), start);
        Ok(())
    }

    fn lex_ident(&mut self) {
        let start = self.position();
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Ident(word.clone()));
        self.push(kind, word, start);
    }

    fn lex_dollar(&mut self) {
        let start = self.position();
        self.bump();
        if self.peek() == Some('@') {
            self.bump();
            self.push(TokenKind::AccVar, "$@", start);
        } else if self.peek().is_some_and(is_ident_start) {
            let mut name = String::new();
            while let Some(c) = self.peek() {
                if is_ident_continue(c) {
                    name.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            self.push(TokenKind::Var(name.clone()), format!("${}", name), start);
        } else {
            self.push(TokenKind::PipeVar, "$", start);
        }
    }

    fn lex_operator(&mut self) -> LexResult<()> {
        let start = self.position();
        let start_pos = self.pos;
        let c = self.bump().unwrap_or_default();
        let kind = match c {
            '-' => {
                if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            ':' => {
                if self.eat('>') {
                    TokenKind::CaptureArrow
                } else {
                    TokenKind::Colon
                }
            }
            '=' => {
                if self.eat('>') {
                    TokenKind::FatArrow
                } else if self.eat('=') {
                    TokenKind::EqEq
                } else {
                    return Err(LexerError::new(
                        ids::UNEXPECTED_CHAR,
                        "`=` is not an operator; use `:>` to capture a value",
                        Span::new(start, self.position()),
                    ));
                }
            }
            '.' => {
                if self.eat('?') {
                    TokenKind::DotQuestion
                } else if self.eat('^') {
                    TokenKind::DotCaret
                } else {
                    TokenKind::Dot
                }
            }
            '?' => {
                if self.eat('?') {
                    TokenKind::Coalesce
                } else {
                    TokenKind::Question
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(LexerError::new(
                        ids::UNEXPECTED_CHAR,
                        "unexpected character `&`",
                        Span::new(start, self.position()),
                    ));
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '(' => {
                self.delims.push('(');
                TokenKind::LParen
            }
            ')' => {
                self.delims.pop();
                TokenKind::RParen
            }
            '[' => {
                self.delims.push('[');
                TokenKind::LBracket
            }
            ']' => {
                self.delims.pop();
                TokenKind::RBracket
            }
            '{' => {
                self.delims.push('{');
                TokenKind::LBrace
            }
            '}' => {
                self.delims.pop();
                TokenKind::RBrace
            }
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '@' => TokenKind::At,
            ',' => TokenKind::Comma,
            other => {
                return Err(LexerError::new(
                    ids::UNEXPECTED_CHAR,
                    format!("unexpected character `{}`", other),
                    Span::new(start, self.position()),
                ));
            }
        };
        let span = Span::new(start, self.position());
        let lexeme: String = self.chars[start_pos..self.pos].iter().collect();
        self.tokens.push(Token::new(kind, lexeme, span));
        Ok(())
    }

    // ----- strings -----

    fn lex_string(&mut self) -> LexResult<Token> {
        let start = self.position();
        self.bump(); // opening quote
        if self.peek() == Some('"') && self.peek_at(1) == Some('"') {
            self.bump();
            self.bump();
            return self.lex_triple_string(start);
        }
        if self.eat('"') {
            let span = Span::new(start, self.position());
            return Ok(Token::new(
                TokenKind::Str {
                    parts: vec![],
                    multiline: false,
                },
                "\"\"",
                span,
            ));
        }

        let mut parts: Vec<StrPart> = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(LexerError::new(
                        ids::UNTERMINATED_STRING,
                        "unterminated string literal",
                        Span::new(start, self.position()),
                    ));
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    let escaped = self.bump().ok_or_else(|| {
                        LexerError::new(
                            ids::UNTERMINATED_STRING,
                            "unterminated string literal",
                            Span::new(start, self.position()),
                        )
                    })?;
                    match escaped {
                        'n' => text.push('\n'),
                        'r' => text.push('\r'),
                        't' => text.push('\t'),
                        '\\' => text.push('\\'),
                        '"' => text.push('"'),
                        '\'' => text.push('\''),
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                }
                Some('{') => {
                    if self.peek_at(1) == Some('{') {
                        self.bump();
                        self.bump();
                        text.push('{');
                    } else {
                        self.bump();
                        if !text.is_empty() {
                            parts.push(StrPart::Text(std::mem::take(&mut text)));
                        }
                        parts.push(self.lex_interpolation(start)?);
                    }
                }
                Some('}') => {
                    self.bump();
                    if self.peek() == Some('}') {
                        self.bump();
                    }
                    text.push('}');
                }
                Some(c) => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        if !text.is_empty() {
            parts.push(StrPart::Text(text));
        }
        let span = Span::new(start, self.position());
        Ok(Token::new(
            TokenKind::Str {
                parts,
                multiline: false,
            },
            "",
            span,
        ))
    }

    fn lex_triple_string(&mut self, start: Position) -> LexResult<Token> {
        // Opening-newline skip: `"""` followed directly by a newline drops it.
        if self.peek() == Some('\r') && self.peek_at(1) == Some('\n') {
            self.bump();
            self.bump();
        } else if self.peek() == Some('\n') {
            self.bump();
        }

        let mut parts: Vec<StrPart> = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexerError::new(
                        ids::UNTERMINATED_STRING,
                        "unterminated triple-quoted string",
                        Span::new(start, self.position()),
                    ));
                }
                Some('"') if self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"') => {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                Some('{') => {
                    if self.peek_at(1) == Some('{') {
                        self.bump();
                        self.bump();
                        text.push('{');
                    } else {
                        self.bump();
                        if !text.is_empty() {
                            parts.push(StrPart::Text(std::mem::take(&mut text)));
                        }
                        parts.push(self.lex_interpolation(start)?);
                    }
                }
                Some('}') => {
                    self.bump();
                    if self.peek() == Some('}') {
                        self.bump();
                    }
                    text.push('}');
                }
                Some(c) => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        if !text.is_empty() {
            parts.push(StrPart::Text(text));
        }
        let span = Span::new(start, self.position());
        Ok(Token::new(
            TokenKind::Str {
                parts,
                multiline: true,
            },
            "",
            span,
        ))
    }

    /// Capture an interpolation body as raw source. The opening `{` has been
    /// consumed; scanning stops at the matching `}` at depth zero, stepping
    /// over nested string literals so braces inside them do not count.
    fn lex_interpolation(&mut self, string_start: Position) -> LexResult<StrPart> {
        let origin = self.position();
        let mut source = String::new();
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => {
                    return Err(LexerError::new(
                        ids::UNTERMINATED_STRING,
                        "unterminated interpolation in string literal",
                        Span::new(string_start, self.position()),
                    ));
                }
                Some('{') => {
                    depth += 1;
                    source.push('{');
                    self.bump();
                }
                Some('}') => {
                    if depth == 0 {
                        self.bump();
                        break;
                    }
                    depth -= 1;
                    source.push('}');
                    self.bump();
                }
                Some('"') => {
                    if self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"') {
                        return Err(LexerError::new(
                            ids::TRIPLE_QUOTE_IN_INTERPOLATION,
                            "triple-quoted strings are not allowed inside interpolations",
                            Span::new(self.position(), self.position()),
                        ));
                    }
                    source.push('"');
                    self.bump();
                    loop {
                        match self.peek() {
                            None | Some('\n') => {
                                return Err(LexerError::new(
                                    ids::UNTERMINATED_STRING,
                                    "unterminated string literal",
                                    Span::new(string_start, self.position()),
                                ));
                            }
                            Some('\\') => {
                                source.push('\\');
                                self.bump();
                                if let Some(c) = self.bump() {
                                    source.push(c);
                                }
                            }
                            Some('"') => {
                                source.push('"');
                                self.bump();
                                break;
                            }
                            Some(c) => {
                                source.push(c);
                                self.bump();
                            }
                        }
                    }
                }
                Some(c) => {
                    source.push(c);
                    self.bump();
                }
            }
        }
        Ok(StrPart::Interp { source, origin })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
