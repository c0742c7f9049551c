// ABOUTME: Recursive-descent parser producing the spanned AST

use crate::ast::*;
use crate::error::{ids, ParseError, RillError};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::token::{StrPart, Token, TokenKind};

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a whole program.
pub fn parse(source: &str) -> Result<Body, RillError> {
    let tokens = Lexer::new(source).lex()?;
    let body = Parser::new(tokens).parse_program()?;
    Ok(body)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    // ----- cursor -----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn nth_kind(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.kind() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.kind() == &kind {
            Ok(self.bump())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<(String, Span)> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                let token = self.bump();
                Ok((name, token.span))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.kind(), TokenKind::Newline) {
            self.bump();
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        ParseError::new(
            ids::UNEXPECTED_TOKEN,
            format!("expected {}, found {}", what, self.kind().describe()),
            self.span(),
        )
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::RBrace
        )
    }

    /// True when the next non-newline token is `->`; consumes the newlines
    /// (and the arrow) only in that case, so chains may continue on the
    /// following line.
    fn eat_arrow_across_newlines(&mut self) -> bool {
        let saved = self.pos;
        self.skip_newlines();
        if self.eat(&TokenKind::Arrow) {
            true
        } else {
            self.pos = saved;
            false
        }
    }

    // ----- top level -----

    pub fn parse_program(&mut self) -> ParseResult<Body> {
        let start = self.span();
        let statements = self.parse_statements(|k| matches!(k, TokenKind::Eof))?;
        let span = start.to(self.span());
        Ok(Body { statements, span })
    }

    fn parse_statements(
        &mut self,
        is_end: impl Fn(&TokenKind) -> bool,
    ) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if is_end(self.kind()) {
                break;
            }
            statements.push(self.parse_statement()?);
            if !self.at_statement_end() {
                return Err(self.unexpected("end of statement"));
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.span();
        let mut annotations = Vec::new();
        while matches!(self.kind(), TokenKind::Caret)
            && matches!(self.nth_kind(1), TokenKind::LParen)
        {
            annotations.extend(self.parse_annotation_group()?);
            self.skip_newlines();
        }
        let chain = self.parse_pipe_chain()?;
        let span = start.to(chain.span);
        Ok(Stmt {
            annotations,
            chain,
            span,
        })
    }

    /// `^(key: value, *spread, ...)`
    fn parse_annotation_group(&mut self) -> ParseResult<Vec<AnnotationArg>> {
        self.expect(TokenKind::Caret, "`^`")?;
        self.expect(TokenKind::LParen, "`(`")?;
        let mut args = Vec::new();
        loop {
            if self.eat(&TokenKind::RParen) {
                break;
            }
            if self.eat(&TokenKind::Star) {
                let expr = self.parse_expr()?;
                let span = expr.span();
                args.push(AnnotationArg::Spread { expr, span });
            } else {
                let (name, name_span) = self.expect_ident("annotation name")?;
                self.expect(TokenKind::Colon, "`:` after annotation name")?;
                let value = self.parse_expr()?;
                let span = name_span.to(value.span());
                args.push(AnnotationArg::Named { name, value, span });
            }
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RParen, "`)` or `,`")?;
                break;
            }
        }
        Ok(args)
    }

    // ----- pipe chains -----

    fn parse_pipe_chain(&mut self) -> ParseResult<PipeChain> {
        let start = self.span();
        let head = self.parse_expr()?;
        let mut pipes = Vec::new();
        let mut terminator = None;

        loop {
            if matches!(self.kind(), TokenKind::CaptureArrow | TokenKind::FatArrow) {
                self.bump();
                let (name, type_name, span) = self.parse_capture_name()?;
                if self.eat_arrow_across_newlines() {
                    pipes.push(PipeTarget::Capture {
                        name,
                        type_name,
                        span,
                    });
                    match self.parse_pipe_target()? {
                        Ok(target) => pipes.push(target),
                        Err(term) => {
                            terminator = Some(term);
                            break;
                        }
                    }
                    continue;
                }
                terminator = Some(Terminator::Capture {
                    name,
                    type_name,
                    span,
                });
                break;
            }

            if self.eat_arrow_across_newlines() {
                match self.parse_pipe_target()? {
                    Ok(target) => pipes.push(target),
                    Err(term) => {
                        terminator = Some(term);
                        break;
                    }
                }
                continue;
            }

            break;
        }

        let end = self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)].span;
        Ok(PipeChain {
            head,
            pipes,
            terminator,
            span: start.to(end),
        })
    }

    fn parse_capture_name(&mut self) -> ParseResult<(String, Option<String>, Span)> {
        let start = self.span();
        let name = match self.kind().clone() {
            TokenKind::Var(name) => {
                self.bump();
                name
            }
            _ => return Err(self.unexpected("`$name` after capture arrow")),
        };
        let mut type_name = None;
        if self.eat(&TokenKind::Colon) {
            let (t, _) = self.expect_ident("type name")?;
            type_name = Some(t);
        }
        Ok((name, type_name, start))
    }

    /// A pipe target, or a chain terminator (`break` / `return`).
    fn parse_pipe_target(&mut self) -> ParseResult<Result<PipeTarget, Terminator>> {
        match self.kind() {
            TokenKind::Break => {
                let span = self.bump().span;
                return Ok(Err(Terminator::Break { span }));
            }
            TokenKind::Return => {
                let span = self.bump().span;
                return Ok(Err(Terminator::Return { span }));
            }
            TokenKind::Colon => {
                let start = self.bump().span;
                let (type_name, end) = self.expect_ident("type name after `:`")?;
                return Ok(Ok(PipeTarget::TypeAssert {
                    type_name,
                    span: start.to(end),
                }));
            }
            TokenKind::Question => {
                // `? typename` type check; anything else is not a valid target
                let start = self.bump().span;
                let (type_name, end) = self.expect_ident("type name after `?`")?;
                return Ok(Ok(PipeTarget::TypeCheck {
                    type_name,
                    span: start.to(end),
                }));
            }
            TokenKind::LBracket => {
                if let Some(pattern) = self.try_parse_pattern()? {
                    return Ok(Ok(PipeTarget::Destructure(pattern)));
                }
                // Dict-shaped brackets (`[key: ...]`, `[:]`) are dispatch
                // tables, not slices.
                if !self.bracket_is_dict() {
                    if let Some(slice) = self.try_parse_slice()? {
                        return Ok(Ok(PipeTarget::Slice(slice)));
                    }
                }
            }
            TokenKind::Dot | TokenKind::DotQuestion | TokenKind::DotCaret => {
                // Leading-dot target: method/access on the pipe value,
                // e.g. `-> .len` or `-> .^doc`
                let span = self.span();
                let pipe_var = Expr::Var(Variable {
                    kind: VarKind::Pipe,
                    accesses: Vec::new(),
                    span,
                });
                let expr = self.parse_postfix_with(pipe_var)?;
                return Ok(Ok(PipeTarget::Expr(expr)));
            }
            _ => {}
        }
        Ok(Ok(PipeTarget::Expr(self.parse_expr()?)))
    }

    /// Attempt `[$a, key: $b, *$rest, _, [nested]]`. Backtracks on anything
    /// that is not a pattern (dict literals, tuples, slices).
    fn try_parse_pattern(&mut self) -> ParseResult<Option<Pattern>> {
        let saved = self.pos;
        match self.parse_pattern() {
            Ok(pattern) => Ok(Some(pattern)),
            Err(_) => {
                self.pos = saved;
                Ok(None)
            }
        }
    }

    fn parse_pattern(&mut self) -> ParseResult<Pattern> {
        let start = self.expect(TokenKind::LBracket, "`[`")?.span;
        let mut elements = Vec::new();
        loop {
            if self.kind() == &TokenKind::RBracket {
                break;
            }
            elements.push(self.parse_pattern_element()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(TokenKind::RBracket, "`]`")?.span;
        if elements.is_empty() {
            return Err(ParseError::new(
                ids::INVALID_PATTERN,
                "destructuring pattern cannot be empty",
                start.to(end),
            ));
        }
        Ok(Pattern {
            elements,
            span: start.to(end),
        })
    }

    fn parse_pattern_element(&mut self) -> ParseResult<PatternElement> {
        match self.kind().clone() {
            TokenKind::Var(name) => {
                let span = self.bump().span;
                Ok(PatternElement::Bind { name, span })
            }
            TokenKind::Star => {
                let start = self.bump().span;
                if let TokenKind::Var(name) = self.kind().clone() {
                    let end = self.bump().span;
                    Ok(PatternElement::Rest {
                        name: Some(name),
                        span: start.to(end),
                    })
                } else {
                    Ok(PatternElement::Rest {
                        name: None,
                        span: start,
                    })
                }
            }
            TokenKind::Ident(name) if name == "_" => {
                let span = self.bump().span;
                Ok(PatternElement::Ignore { span })
            }
            TokenKind::Ident(key) => {
                let start = self.bump().span;
                self.expect(TokenKind::Colon, "`:` in named binding")?;
                match self.kind().clone() {
                    TokenKind::Var(name) => {
                        let end = self.bump().span;
                        Ok(PatternElement::Named {
                            key,
                            name,
                            span: start.to(end),
                        })
                    }
                    _ => Err(self.unexpected("`$name` in named binding")),
                }
            }
            TokenKind::LBracket => Ok(PatternElement::Nested(self.parse_pattern()?)),
            _ => Err(self.unexpected("destructuring element")),
        }
    }

    /// Attempt `[start:stop:step]` with every part optional.
    fn try_parse_slice(&mut self) -> ParseResult<Option<SliceExpr>> {
        let saved = self.pos;
        match self.parse_slice() {
            Ok(slice) => Ok(Some(slice)),
            Err(_) => {
                self.pos = saved;
                Ok(None)
            }
        }
    }

    fn parse_slice(&mut self) -> ParseResult<SliceExpr> {
        let start_span = self.expect(TokenKind::LBracket, "`[`")?.span;
        let start = if matches!(self.kind(), TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        self.expect(TokenKind::Colon, "`:` in slice")?;
        let stop = if matches!(self.kind(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.eat(&TokenKind::Colon) {
            if matches!(self.kind(), TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            }
        } else {
            None
        };
        let end_span = self.expect(TokenKind::RBracket, "`]`")?.span;
        Ok(SliceExpr {
            start,
            stop,
            step,
            span: start_span.to(end_span),
        })
    }

    // ----- expressions -----

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let cond = self.parse_coalesce()?;
        if self.eat(&TokenKind::Question) {
            let then = self.parse_coalesce()?;
            let otherwise = if self.eat(&TokenKind::Bang) {
                Some(Box::new(self.parse_coalesce()?))
            } else {
                None
            };
            let span = cond.span().to(
                otherwise
                    .as_ref()
                    .map(|e| e.span())
                    .unwrap_or_else(|| then.span()),
            );
            return Ok(Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise,
                span,
            });
        }
        Ok(cond)
    }

    fn parse_coalesce(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_or()?;
        while self.eat(&TokenKind::Coalesce) {
            let rhs = self.parse_or()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Coalesce {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let rhs = self.parse_and()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.parse_equality()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::BangEq => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_comparison()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        match self.kind() {
            TokenKind::Bang => {
                let start = self.bump().span;
                let operand = self.parse_unary()?;
                let span = start.to(operand.span());
                Ok(Expr::Unary {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                    span,
                })
            }
            TokenKind::Minus => {
                let start = self.bump().span;
                let operand = self.parse_unary()?;
                let span = start.to(operand.span());
                Ok(Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                    span,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    // ----- postfix chains -----

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let primary = self.parse_primary()?;
        self.parse_postfix_with(primary)
    }

    fn parse_postfix_with(&mut self, primary: Expr) -> ParseResult<Expr> {
        // Pure access chains extend a variable in place; calls, invokes,
        // and annotation reads become postfix operations.
        let mut expr = primary;
        let mut ops: Vec<PostfixOp> = Vec::new();

        loop {
            match self.kind() {
                TokenKind::Dot => {
                    let access = self.parse_dot_access()?;
                    match (&mut expr, ops.is_empty(), access) {
                        (_, _, DotStep::Method { name, args, span }) => {
                            ops.push(PostfixOp::Method { name, args, span });
                        }
                        (Expr::Var(var), true, DotStep::Access(access)) => {
                            var.accesses.push(access);
                            var.span = var.span.to(self.span());
                        }
                        (_, _, DotStep::Access(access)) => {
                            ops.push(PostfixOp::Access(access));
                        }
                    }
                }
                TokenKind::DotQuestion => {
                    let start = self.bump().span;
                    let (name, end) = self.expect_ident("field name after `.?`")?;
                    let access = Access::Exists {
                        name,
                        span: start.to(end),
                    };
                    match (&mut expr, ops.is_empty()) {
                        (Expr::Var(var), true) => var.accesses.push(access),
                        _ => ops.push(PostfixOp::Access(access)),
                    }
                }
                TokenKind::DotCaret => {
                    let start = self.bump().span;
                    let (key, end) = self.expect_ident("annotation key after `.^`")?;
                    ops.push(PostfixOp::Annotation {
                        key,
                        span: start.to(end),
                    });
                }
                TokenKind::LParen => {
                    let (args, span) = self.parse_call_args()?;
                    ops.push(PostfixOp::Invoke { args, span });
                }
                TokenKind::LBracket if matches!(expr, Expr::Var(_)) && ops.is_empty() => {
                    if let Some(slice) = self.try_parse_slice()? {
                        if let Expr::Var(var) = &mut expr {
                            var.accesses.push(Access::Slice(slice));
                        }
                    } else {
                        let start = self.bump().span;
                        let index = self.parse_expr()?;
                        let end = self.expect(TokenKind::RBracket, "`]`")?.span;
                        if let Expr::Var(var) = &mut expr {
                            var.accesses.push(Access::Index {
                                expr: Box::new(index),
                                span: start.to(end),
                            });
                        }
                    }
                }
                _ => break,
            }
        }

        if ops.is_empty() {
            Ok(expr)
        } else {
            let span = expr.span().to(self.span());
            Ok(Expr::Postfix {
                primary: Box::new(expr),
                ops,
                span,
            })
        }
    }

    fn parse_dot_access(&mut self) -> ParseResult<DotStep> {
        let start = self.bump().span; // `.`
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                let end = self.bump().span;
                if matches!(self.kind(), TokenKind::LParen) {
                    let (args, args_span) = self.parse_call_args()?;
                    return Ok(DotStep::Method {
                        name,
                        args,
                        span: start.to(args_span),
                    });
                }
                // `.a|b|c` field alternatives
                if matches!(self.kind(), TokenKind::Pipe)
                    && matches!(self.nth_kind(1), TokenKind::Ident(_))
                {
                    let mut names = vec![name];
                    let mut end = end;
                    while matches!(self.kind(), TokenKind::Pipe)
                        && matches!(self.nth_kind(1), TokenKind::Ident(_))
                    {
                        self.bump();
                        let (alt, alt_span) = self.expect_ident("field name")?;
                        names.push(alt);
                        end = alt_span;
                    }
                    return Ok(DotStep::Access(Access::FieldAlternatives {
                        names,
                        span: start.to(end),
                    }));
                }
                Ok(DotStep::Access(Access::Field {
                    name,
                    span: start.to(end),
                }))
            }
            TokenKind::Var(name) => {
                let end = self.bump().span;
                Ok(DotStep::Access(Access::FieldVar {
                    name,
                    span: start.to(end),
                }))
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                let end = self.expect(TokenKind::RParen, "`)`")?.span;
                Ok(DotStep::Access(Access::FieldComputed {
                    expr: Box::new(expr),
                    span: start.to(end),
                }))
            }
            TokenKind::LBrace => {
                let block = self.parse_block()?;
                let span = start.to(block.span());
                Ok(DotStep::Access(Access::FieldComputed {
                    expr: Box::new(block),
                    span,
                }))
            }
            _ => Err(self.unexpected("field name after `.`")),
        }
    }

    fn parse_call_args(&mut self) -> ParseResult<(Vec<Arg>, Span)> {
        let start = self.expect(TokenKind::LParen, "`(`")?.span;
        let mut args = Vec::new();
        loop {
            if self.kind() == &TokenKind::RParen {
                break;
            }
            args.push(self.parse_arg()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(TokenKind::RParen, "`)` or `,`")?.span;
        Ok((args, start.to(end)))
    }

    fn parse_arg(&mut self) -> ParseResult<Arg> {
        if matches!(self.kind(), TokenKind::Star) {
            let start = self.bump().span;
            let expr = self.parse_expr()?;
            let span = start.to(expr.span());
            return Ok(Arg::Spread { expr, span });
        }
        // `name: value` named argument
        if let TokenKind::Ident(name) = self.kind().clone() {
            if matches!(self.nth_kind(1), TokenKind::Colon) {
                let start = self.bump().span;
                self.bump(); // `:`
                let value = self.parse_expr()?;
                let span = start.to(value.span());
                return Ok(Arg::Named { name, value, span });
            }
        }
        Ok(Arg::Pos(self.parse_expr()?))
    }

    // ----- primaries -----

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.kind().clone() {
            TokenKind::Str { parts, multiline } => {
                let span = self.bump().span;
                let lit = self.build_string(parts, multiline, span)?;
                Ok(Expr::Str(lit))
            }
            TokenKind::Number(value) => {
                let span = self.bump().span;
                Ok(Expr::Num { value, span })
            }
            TokenKind::True => {
                let span = self.bump().span;
                Ok(Expr::Bool { value: true, span })
            }
            TokenKind::False => {
                let span = self.bump().span;
                Ok(Expr::Bool { value: false, span })
            }
            TokenKind::Var(name) => {
                let span = self.bump().span;
                Ok(Expr::Var(Variable {
                    kind: VarKind::Named(name),
                    accesses: Vec::new(),
                    span,
                }))
            }
            TokenKind::PipeVar => {
                let span = self.bump().span;
                Ok(Expr::Var(Variable {
                    kind: VarKind::Pipe,
                    accesses: Vec::new(),
                    span,
                }))
            }
            TokenKind::AccVar => {
                let span = self.bump().span;
                Ok(Expr::Var(Variable {
                    kind: VarKind::Accumulator,
                    accesses: Vec::new(),
                    span,
                }))
            }
            TokenKind::Ident(name) => self.parse_named_call(name),
            TokenKind::LBracket => self.parse_bracket_literal(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::LParen => {
                let start = self.bump().span;
                self.skip_newlines();
                let chain = self.parse_pipe_chain()?;
                self.skip_newlines();
                let end = self.expect(TokenKind::RParen, "`)`")?.span;
                let grouped = Expr::Grouped {
                    chain: Box::new(chain),
                    span: start.to(end),
                };
                // `(cond) @ { body }` while loop
                if self.eat(&TokenKind::At) {
                    let body = self.parse_block()?;
                    let span = start.to(body.span());
                    return Ok(Expr::While {
                        cond: Box::new(grouped),
                        body: Box::new(body),
                        span,
                    });
                }
                Ok(grouped)
            }
            TokenKind::At => self.parse_do_while(),
            TokenKind::Pipe | TokenKind::OrOr => {
                let closure = self.parse_closure()?;
                Ok(Expr::Closure(closure))
            }
            TokenKind::Each => {
                let start = self.bump().span;
                let init = self.parse_op_init()?;
                let body = self.parse_op_body()?;
                let span = start.to(self.span());
                Ok(Expr::Each {
                    init,
                    body: Box::new(body),
                    span,
                })
            }
            TokenKind::Map => {
                let start = self.bump().span;
                let body = self.parse_op_body()?;
                let span = start.to(self.span());
                Ok(Expr::Map {
                    body: Box::new(body),
                    span,
                })
            }
            TokenKind::Filter => {
                let start = self.bump().span;
                let body = self.parse_op_body()?;
                let span = start.to(self.span());
                Ok(Expr::Filter {
                    body: Box::new(body),
                    span,
                })
            }
            TokenKind::Fold => {
                let start = self.bump().span;
                let init = self.parse_op_init()?;
                let body = self.parse_op_body()?;
                let span = start.to(self.span());
                Ok(Expr::Fold {
                    init,
                    body: Box::new(body),
                    span,
                })
            }
            TokenKind::Star => {
                let start = self.bump().span;
                let operand = self.parse_unary()?;
                let span = start.to(operand.span());
                Ok(Expr::Spread {
                    operand: Box::new(operand),
                    span,
                })
            }
            TokenKind::Pass => {
                let span = self.bump().span;
                Ok(Expr::Pass { span })
            }
            TokenKind::Break => {
                let span = self.bump().span;
                Ok(Expr::BreakExpr { span })
            }
            TokenKind::Return => {
                let span = self.bump().span;
                Ok(Expr::ReturnExpr { span })
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_named_call(&mut self, name: String) -> ParseResult<Expr> {
        let start = self.bump().span;
        match name.as_str() {
            "assert" => {
                let (mut args, args_span) = self.parse_call_args()?;
                let span = start.to(args_span);
                if args.is_empty() || args.len() > 2 {
                    return Err(ParseError::new(
                        ids::UNEXPECTED_TOKEN,
                        "assert takes a condition and an optional message",
                        span,
                    ));
                }
                let message = if args.len() == 2 {
                    match args.pop() {
                        Some(Arg::Pos(expr)) => Some(Box::new(expr)),
                        _ => return Err(self.unexpected("assert message expression")),
                    }
                } else {
                    None
                };
                let cond = match args.pop() {
                    Some(Arg::Pos(expr)) => Box::new(expr),
                    _ => return Err(self.unexpected("assert condition expression")),
                };
                Ok(Expr::Assert {
                    cond,
                    message,
                    span,
                })
            }
            "error" => {
                let (mut args, args_span) = self.parse_call_args()?;
                let span = start.to(args_span);
                if args.len() != 1 {
                    return Err(ParseError::new(
                        ids::UNEXPECTED_TOKEN,
                        "error takes exactly one message argument",
                        span,
                    ));
                }
                let message = match args.pop() {
                    Some(Arg::Pos(expr)) => Box::new(expr),
                    _ => return Err(self.unexpected("error message expression")),
                };
                Ok(Expr::Raise { message, span })
            }
            _ => {
                if matches!(self.kind(), TokenKind::LParen) {
                    let (args, args_span) = self.parse_call_args()?;
                    Ok(Expr::HostCall {
                        name,
                        args,
                        span: start.to(args_span),
                    })
                } else {
                    Ok(Expr::HostCall {
                        name,
                        args: Vec::new(),
                        span: start,
                    })
                }
            }
        }
    }

    /// Decide whether the bracket starting at the current token is a dict:
    /// scan ahead (skipping nested brackets) for a `key:` entry at the top
    /// level, so spreads before the first keyed entry don't hide it.
    fn bracket_is_dict(&self) -> bool {
        debug_assert!(matches!(self.kind(), TokenKind::LBracket));
        let mut depth = 0usize;
        let mut after_separator = false;
        let mut i = 0usize;
        loop {
            let kind = self.nth_kind(i);
            match kind {
                TokenKind::Eof => return false,
                TokenKind::LBracket | TokenKind::LParen | TokenKind::LBrace => {
                    depth += 1;
                    after_separator = depth == 1;
                }
                TokenKind::RBracket | TokenKind::RParen | TokenKind::RBrace => {
                    if depth <= 1 {
                        return false;
                    }
                    depth -= 1;
                    after_separator = false;
                }
                TokenKind::Comma if depth == 1 => after_separator = true,
                TokenKind::Colon if depth == 1 && after_separator => {
                    // `[:]`
                    return true;
                }
                TokenKind::Ident(_) | TokenKind::Str { .. }
                    if depth == 1
                        && after_separator
                        && matches!(self.nth_kind(i + 1), TokenKind::Colon) =>
                {
                    return true;
                }
                _ => after_separator = false,
            }
            i += 1;
        }
    }

    /// `[1, 2]` tuple, `[k: v]` dict, `[:]` empty dict.
    fn parse_bracket_literal(&mut self) -> ParseResult<Expr> {
        let is_dict = self.bracket_is_dict();
        let start = self.bump().span; // `[`
        self.skip_newlines();

        if self.kind() == &TokenKind::Colon && self.nth_kind(1) == &TokenKind::RBracket {
            self.bump();
            let end = self.bump().span;
            return Ok(Expr::DictLit {
                entries: Vec::new(),
                span: start.to(end),
            });
        }

        if is_dict {
            let mut entries = Vec::new();
            loop {
                self.skip_newlines();
                if self.kind() == &TokenKind::RBracket {
                    break;
                }
                if matches!(self.kind(), TokenKind::Star) {
                    let spread_start = self.bump().span;
                    let expr = self.parse_expr()?;
                    let span = spread_start.to(expr.span());
                    entries.push(DictEntry::Spread { expr, span });
                } else {
                    let (key, key_span) = match self.kind().clone() {
                        TokenKind::Ident(name) => (name, self.bump().span),
                        TokenKind::Str { parts, .. } => {
                            let span = self.bump().span;
                            (self.literal_key(parts, span)?, span)
                        }
                        _ => return Err(self.unexpected("dict key")),
                    };
                    self.expect(TokenKind::Colon, "`:` after dict key")?;
                    let value = self.parse_expr()?;
                    let span = key_span.to(value.span());
                    entries.push(DictEntry::KeyValue { key, value, span });
                }
                self.skip_newlines();
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.skip_newlines();
            let end = self.expect(TokenKind::RBracket, "`]` or `,`")?.span;
            return Ok(Expr::DictLit {
                entries,
                span: start.to(end),
            });
        }

        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.kind() == &TokenKind::RBracket {
                break;
            }
            if matches!(self.kind(), TokenKind::Star) {
                let spread_start = self.bump().span;
                let expr = self.parse_expr()?;
                let span = spread_start.to(expr.span());
                items.push(Arg::Spread { expr, span });
            } else {
                items.push(Arg::Pos(self.parse_expr()?));
            }
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_newlines();
        let end = self.expect(TokenKind::RBracket, "`]` or `,`")?.span;
        Ok(Expr::TupleLit {
            items,
            span: start.to(end),
        })
    }

    fn literal_key(&self, parts: Vec<StrPart>, span: Span) -> ParseResult<String> {
        match parts.as_slice() {
            [] => Ok(String::new()),
            [StrPart::Text(text)] => Ok(text.clone()),
            _ => Err(ParseError::new(
                ids::UNEXPECTED_TOKEN,
                "dict keys cannot contain interpolation",
                span,
            )),
        }
    }

    fn parse_block(&mut self) -> ParseResult<Expr> {
        let start = self.expect(TokenKind::LBrace, "`{`")?.span;
        let statements = self.parse_statements(|k| matches!(k, TokenKind::RBrace))?;
        let end = self.expect(TokenKind::RBrace, "`}`")?.span;
        let span = start.to(end);
        Ok(Expr::Block {
            body: Body { statements, span },
            span,
        })
    }

    fn parse_do_while(&mut self) -> ParseResult<Expr> {
        let start = self.expect(TokenKind::At, "`@`")?.span;
        let body = self.parse_block()?;
        self.expect(TokenKind::Question, "`?` after do-while body")?;
        let cond_start = self.expect(TokenKind::LParen, "`(`")?.span;
        self.skip_newlines();
        let chain = self.parse_pipe_chain()?;
        self.skip_newlines();
        let cond_end = self.expect(TokenKind::RParen, "`)`")?.span;
        let cond = Expr::Grouped {
            chain: Box::new(chain),
            span: cond_start.to(cond_end),
        };
        let span = start.to(cond_end);
        Ok(Expr::DoWhile {
            body: Box::new(body),
            cond: Box::new(cond),
            span,
        })
    }

    fn parse_op_init(&mut self) -> ParseResult<Option<Box<Expr>>> {
        if matches!(self.kind(), TokenKind::LParen) {
            self.bump();
            self.skip_newlines();
            let expr = self.parse_expr()?;
            self.skip_newlines();
            self.expect(TokenKind::RParen, "`)`")?;
            Ok(Some(Box::new(expr)))
        } else {
            Ok(None)
        }
    }

    fn parse_op_body(&mut self) -> ParseResult<OpBody> {
        self.skip_newlines();
        match self.kind() {
            TokenKind::LBrace => {
                let block = self.parse_block()?;
                match block {
                    Expr::Block { body, .. } => Ok(OpBody::Block(body)),
                    _ => unreachable!("parse_block returns Expr::Block"),
                }
            }
            TokenKind::Pipe | TokenKind::OrOr => Ok(OpBody::Closure(self.parse_closure()?)),
            _ => Err(self.unexpected("`{` block or `|...|` closure")),
        }
    }

    fn parse_closure(&mut self) -> ParseResult<ClosureLit> {
        let start = self.span();
        let mut params = Vec::new();
        if self.eat(&TokenKind::OrOr) {
            // `||` — no parameters
        } else {
            self.expect(TokenKind::Pipe, "`|`")?;
            loop {
                if self.kind() == &TokenKind::Pipe {
                    break;
                }
                params.push(self.parse_closure_param()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Pipe, "`|` to close parameters")?;
        }
        let body = self.parse_block()?;
        let body = match body {
            Expr::Block { body, .. } => body,
            _ => unreachable!("parse_block returns Expr::Block"),
        };
        let span = start.to(body.span);
        Ok(ClosureLit { params, body, span })
    }

    fn parse_closure_param(&mut self) -> ParseResult<ClosureParam> {
        let start = self.span();
        let name = match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                name
            }
            TokenKind::Var(name) => {
                // `|$x|` and `|x|` both bind `x`; a literal `$` param
                // dual-binds the pipe value
                self.bump();
                name
            }
            TokenKind::PipeVar => {
                self.bump();
                "$".to_string()
            }
            _ => return Err(self.unexpected("parameter name")),
        };
        let mut type_name = None;
        if self.eat(&TokenKind::Colon) {
            let (t, _) = self.expect_ident("parameter type")?;
            type_name = Some(t);
        }
        let mut default = None;
        if self.eat(&TokenKind::Coalesce) {
            default = Some(self.parse_expr()?);
        }
        let mut annotations = Vec::new();
        while matches!(self.kind(), TokenKind::Caret)
            && matches!(self.nth_kind(1), TokenKind::LParen)
        {
            annotations.extend(self.parse_annotation_group()?);
        }
        let span = start.to(self.span());
        Ok(ClosureParam {
            name,
            type_name,
            default,
            annotations,
            span,
        })
    }

    // ----- strings -----

    fn build_string(
        &self,
        parts: Vec<StrPart>,
        multiline: bool,
        span: Span,
    ) -> ParseResult<StringLit> {
        let mut out = Vec::new();
        for part in parts {
            match part {
                StrPart::Text(text) => out.push(StringPart::Text(text)),
                StrPart::Interp { source, origin } => {
                    if source.trim().is_empty() {
                        return Err(ParseError::new(
                            ids::EMPTY_INTERPOLATION,
                            "interpolation cannot be empty",
                            span,
                        ));
                    }
                    let tokens = Lexer::with_origin(&source, origin).lex().map_err(|e| {
                        ParseError::new(ids::UNTERMINATED_INTERPOLATION, e.message, e.span)
                    })?;
                    let mut sub = Parser::new(tokens);
                    sub.skip_newlines();
                    let chain = sub.parse_pipe_chain()?;
                    sub.skip_newlines();
                    if sub.kind() != &TokenKind::Eof {
                        return Err(sub.unexpected("end of interpolation"));
                    }
                    let interp_span = chain.span;
                    out.push(StringPart::Interp(Box::new(Expr::Grouped {
                        chain: Box::new(chain),
                        span: interp_span,
                    })));
                }
            }
        }
        Ok(StringLit {
            parts: out,
            multiline,
            span,
        })
    }
}

enum DotStep {
    Access(Access),
    Method {
        name: String,
        args: Vec<Arg>,
        span: Span,
    },
}
