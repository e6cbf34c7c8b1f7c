//! Formula parser.
//!
//! Operator precedence, lowest to highest:
//!
//! ```text
//! or ||  <  and &&  <  == !=  <  < > <= >=  <  + -  <  * / %  <  ^  <  not ! -(unary)
//! ```
//!
//! The parser does not recurse on the host stack. Each parenthesized group and each function
//! argument list is a [`Frame`] on an explicit stack, and within a frame operators are resolved
//! with a precedence-climbing operator stack. The number of open frames is the formula's
//! nesting depth; the whole formula is frame 1.

mod lexer;

pub use lexer::{lex, Token, TokenKind};

use crate::ast::{
    BinaryExpr, BinaryOp, Expr, FunctionCall, PathSegment, PropertyPath, Span, UnaryExpr, UnaryOp,
    UNARY_PRECEDENCE,
};
use crate::limits::is_blocked_property_name;
use crate::{FormulaError, SecurityLimits};
use smallvec::SmallVec;

/// Parse `formula` into an expression tree, enforcing every limit in `limits`.
pub fn parse_expr(formula: &str, limits: &SecurityLimits) -> Result<Expr, FormulaError> {
    let tokens = lex(formula, limits)?;
    Parser::new(formula, tokens, limits).parse()
}

/// Parse a standalone property path (optionally prefixed with `@`).
pub fn parse_path(source: &str, limits: &SecurityLimits) -> Result<PropertyPath, FormulaError> {
    let tokens = lex(source, limits)?;
    let mut parser = Parser::new(source, tokens, limits);
    let mut first = parser.next();
    if first.kind == TokenKind::At {
        first = parser.next();
    }
    let path = parser.parse_path_from(first)?;
    parser.expect_eof()?;
    Ok(path)
}

/// Counts every node the parser creates. All node construction goes through [`NodeCounter::alloc`].
struct NodeCounter {
    count: usize,
    limit: usize,
}

impl NodeCounter {
    fn alloc(&mut self, expr: Expr, span: Span) -> Result<Expr, FormulaError> {
        let next = self.count + 1;
        if next > self.limit {
            return Err(FormulaError::NodeCountExceeded {
                limit: self.limit,
                actual: next,
                span,
            });
        }
        self.count = next;
        Ok(expr)
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingOp {
    Unary(UnaryOp, Span),
    Binary(BinaryOp, Span),
}

impl PendingOp {
    fn precedence(self) -> u8 {
        match self {
            PendingOp::Unary(..) => UNARY_PRECEDENCE,
            PendingOp::Binary(op, _) => op.precedence(),
        }
    }
}

#[derive(Debug)]
enum FrameKind {
    Root,
    Group { open: Span },
    Call { name: String, open: Span, args: Vec<Expr> },
}

/// One open expression: the whole formula, a parenthesized group, or a call's argument list.
#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    operands: Vec<Expr>,
    operators: Vec<PendingOp>,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            operands: Vec::new(),
            operators: Vec::new(),
        }
    }

    fn push_binary(
        &mut self,
        op: BinaryOp,
        span: Span,
        nodes: &mut NodeCounter,
    ) -> Result<(), FormulaError> {
        let prec = op.precedence();
        while let Some(top) = self.operators.last().copied() {
            let top_prec = top.precedence();
            let reduce = top_prec > prec || (top_prec == prec && !op.is_right_associative());
            if !reduce {
                break;
            }
            self.reduce_one(nodes)?;
        }
        self.operators.push(PendingOp::Binary(op, span));
        Ok(())
    }

    fn reduce_one(&mut self, nodes: &mut NodeCounter) -> Result<(), FormulaError> {
        let Some(op) = self.operators.pop() else {
            return Ok(());
        };
        let expr = match op {
            PendingOp::Unary(op, span) => {
                let operand = self.pop_operand(span)?;
                nodes.alloc(
                    Expr::Unary(UnaryExpr {
                        op,
                        expr: Box::new(operand),
                    }),
                    span,
                )?
            }
            PendingOp::Binary(op, span) => {
                let right = self.pop_operand(span)?;
                let left = self.pop_operand(span)?;
                nodes.alloc(
                    Expr::Binary(BinaryExpr {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }),
                    span,
                )?
            }
        };
        self.operands.push(expr);
        Ok(())
    }

    fn pop_operand(&mut self, span: Span) -> Result<Expr, FormulaError> {
        self.operands
            .pop()
            .ok_or_else(|| FormulaError::syntax("operator is missing an operand", span))
    }

    /// Resolve all pending operators and take the frame's single resulting expression.
    fn reduce_all(&mut self, nodes: &mut NodeCounter, span: Span) -> Result<Expr, FormulaError> {
        while !self.operators.is_empty() {
            self.reduce_one(nodes)?;
        }
        let expr = self.pop_operand(span)?;
        if !self.operands.is_empty() {
            return Err(FormulaError::syntax("expected an operator", span));
        }
        Ok(expr)
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    limits: &'a SecurityLimits,
    nodes: NodeCounter,
    current: Frame,
    parents: Vec<Frame>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, tokens: Vec<Token>, limits: &'a SecurityLimits) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            limits,
            nodes: NodeCounter {
                count: 0,
                limit: limits.max_node_count,
            },
            current: Frame::new(FrameKind::Root),
            parents: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Expr, FormulaError> {
        if matches!(self.peek_kind(), TokenKind::Eof) {
            return Err(FormulaError::syntax("formula is empty", self.current_span()));
        }
        self.check_depth(1, Span::new(0, 0))?;

        let mut expect_operand = true;
        loop {
            let token = self.next();
            let span = token.span;
            if expect_operand {
                match token.kind {
                    TokenKind::Number(n) => {
                        let expr = self.nodes.alloc(Expr::Number(n), span)?;
                        self.current.operands.push(expr);
                        expect_operand = false;
                    }
                    TokenKind::String(s) => {
                        let expr = self.nodes.alloc(Expr::String(s), span)?;
                        self.current.operands.push(expr);
                        expect_operand = false;
                    }
                    TokenKind::Boolean(b) => {
                        let expr = self.nodes.alloc(Expr::Boolean(b), span)?;
                        self.current.operands.push(expr);
                        expect_operand = false;
                    }
                    TokenKind::At => {
                        let first = self.next();
                        let path = self.parse_path_from(first)?;
                        let expr = self.nodes.alloc(Expr::Path(path), span)?;
                        self.current.operands.push(expr);
                        expect_operand = false;
                    }
                    TokenKind::Ident(_) => {
                        let path = self.parse_path_from(token)?;
                        let expr = self.nodes.alloc(Expr::Path(path), span)?;
                        self.current.operands.push(expr);
                        expect_operand = false;
                    }
                    TokenKind::Function(name) => {
                        let open = self.expect(TokenKind::LParen)?;
                        if matches!(self.peek_kind(), TokenKind::RParen) {
                            let close = self.next().span;
                            let expr = self.nodes.alloc(
                                Expr::FunctionCall(FunctionCall {
                                    name,
                                    args: Vec::new(),
                                }),
                                Span::new(span.start, close.end),
                            )?;
                            self.current.operands.push(expr);
                            expect_operand = false;
                        } else {
                            self.open_frame(
                                FrameKind::Call {
                                    name,
                                    open,
                                    args: Vec::new(),
                                },
                                open,
                            )?;
                        }
                    }
                    TokenKind::LParen => self.open_frame(FrameKind::Group { open: span }, span)?,
                    TokenKind::Minus => self
                        .current
                        .operators
                        .push(PendingOp::Unary(UnaryOp::Negate, span)),
                    TokenKind::Not => self
                        .current
                        .operators
                        .push(PendingOp::Unary(UnaryOp::Not, span)),
                    other => {
                        return Err(FormulaError::syntax(
                            format!("expected a value, found {}", other.describe()),
                            span,
                        ));
                    }
                }
                continue;
            }

            if let Some(op) = binary_op(&token.kind) {
                self.current.push_binary(op, span, &mut self.nodes)?;
                expect_operand = true;
                continue;
            }

            match token.kind {
                TokenKind::Comma => {
                    if !matches!(self.current.kind, FrameKind::Call { .. }) {
                        return Err(FormulaError::syntax(
                            "`,` is only allowed between function arguments",
                            span,
                        ));
                    }
                    let arg = self.current.reduce_all(&mut self.nodes, span)?;
                    if let FrameKind::Call { args, .. } = &mut self.current.kind {
                        args.push(arg);
                    }
                    expect_operand = true;
                }
                TokenKind::RParen => self.close_frame(span)?,
                TokenKind::Eof => {
                    if let Some(open) = self.open_span() {
                        return Err(FormulaError::syntax(
                            format!("missing `)` to close the `(` at {}", open.start),
                            span,
                        ));
                    }
                    return self.current.reduce_all(&mut self.nodes, span);
                }
                other => {
                    return Err(FormulaError::syntax(
                        format!("expected an operator, found {}", other.describe()),
                        span,
                    ));
                }
            }
        }
    }

    fn check_depth(&self, depth: usize, span: Span) -> Result<(), FormulaError> {
        if depth > self.limits.max_ast_depth {
            return Err(FormulaError::DepthExceeded {
                limit: self.limits.max_ast_depth,
                actual: depth,
                span,
            });
        }
        Ok(())
    }

    fn open_frame(&mut self, kind: FrameKind, span: Span) -> Result<(), FormulaError> {
        // `parents` plus the current frame are open already; this one makes one more.
        self.check_depth(self.parents.len() + 2, span)?;
        let parent = std::mem::replace(&mut self.current, Frame::new(kind));
        self.parents.push(parent);
        Ok(())
    }

    fn close_frame(&mut self, span: Span) -> Result<(), FormulaError> {
        if matches!(self.current.kind, FrameKind::Root) {
            return Err(FormulaError::syntax("unmatched `)`", span));
        }
        let expr = self.current.reduce_all(&mut self.nodes, span)?;
        let Some(parent) = self.parents.pop() else {
            return Err(FormulaError::syntax("unmatched `)`", span));
        };
        let closed = std::mem::replace(&mut self.current, parent);
        let expr = match closed.kind {
            FrameKind::Call {
                name,
                open,
                mut args,
            } => {
                args.push(expr);
                self.nodes.alloc(
                    Expr::FunctionCall(FunctionCall { name, args }),
                    Span::new(open.start, span.end),
                )?
            }
            FrameKind::Group { .. } | FrameKind::Root => expr,
        };
        self.current.operands.push(expr);
        Ok(())
    }

    /// Span of the innermost unclosed `(`, if any.
    fn open_span(&self) -> Option<Span> {
        match &self.current.kind {
            FrameKind::Group { open } | FrameKind::Call { open, .. } => Some(*open),
            FrameKind::Root => None,
        }
    }

    /// Parse path segments starting at `first`, the token right after `@` (or a bare
    /// identifier).
    fn parse_path_from(&mut self, first: Token) -> Result<PropertyPath, FormulaError> {
        let mut segments: SmallVec<[PathSegment; 4]> = SmallVec::new();
        match &first.kind {
            TokenKind::LBracket => segments.push(self.parse_bracket_segment(first.span, true)?),
            kind => match kind.segment_name() {
                Some(name) => segments.push(checked_field(name, first.span)?),
                None => {
                    return Err(FormulaError::syntax(
                        format!("expected a property name, found {}", kind.describe()),
                        first.span,
                    ));
                }
            },
        }

        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.next();
                    let token = self.next();
                    match token.kind.segment_name() {
                        Some(name) => segments.push(checked_field(name, token.span)?),
                        None => {
                            return Err(FormulaError::syntax(
                                format!(
                                    "expected a property name after `.`, found {}",
                                    token.kind.describe()
                                ),
                                token.span,
                            ));
                        }
                    }
                }
                TokenKind::LBracket => {
                    let open = self.next().span;
                    segments.push(self.parse_bracket_segment(open, false)?);
                }
                _ => break,
            }
        }

        Ok(PropertyPath { segments })
    }

    /// Parse what follows `[`: `]`, `n]` or `"key"]`.
    fn parse_bracket_segment(
        &mut self,
        open: Span,
        first: bool,
    ) -> Result<PathSegment, FormulaError> {
        let token = self.next();
        let segment = match token.kind {
            TokenKind::RBracket if !first => return Ok(PathSegment::Wildcard),
            TokenKind::Number(n) if !first => {
                if n.fract() != 0.0 || n > f64::from(u32::MAX) {
                    return Err(FormulaError::syntax(
                        format!("list index `{n}` must be a whole number"),
                        token.span,
                    ));
                }
                PathSegment::Index(n as u32)
            }
            TokenKind::String(key) => checked_field(&key, token.span)?,
            other => {
                let expected = if first {
                    "a quoted property name"
                } else {
                    "an index, a quoted property name or `]`"
                };
                return Err(FormulaError::syntax(
                    format!("expected {expected} after `[`, found {}", other.describe()),
                    Span::new(open.start, token.span.end),
                ));
            }
        };
        self.expect(TokenKind::RBracket)?;
        Ok(segment)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Span, FormulaError> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&kind) {
            Ok(self.next().span)
        } else {
            Err(FormulaError::syntax(
                format!(
                    "expected {}, found {}",
                    kind.describe(),
                    self.peek_kind().describe()
                ),
                self.current_span(),
            ))
        }
    }

    fn expect_eof(&mut self) -> Result<(), FormulaError> {
        self.expect(TokenKind::Eof).map(|_| ())
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Take the current token. The trailing `Eof` is returned again once reached.
    fn next(&mut self) -> Token {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                let tok = tok.clone();
                if tok.kind != TokenKind::Eof {
                    self.pos += 1;
                }
                tok
            }
            None => Token {
                kind: TokenKind::Eof,
                span: Span::new(self.src.len(), self.src.len()),
            },
        }
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| Span::new(self.src.len(), self.src.len()))
    }
}

fn checked_field(name: &str, span: Span) -> Result<PathSegment, FormulaError> {
    if is_blocked_property_name(name) {
        log::warn!("rejected blocked property name `{name}` at {}", span.start);
        return Err(FormulaError::PrototypePollutionAttempt {
            segment: name.to_string(),
            position: Some(span.start),
        });
    }
    Ok(PathSegment::Field(name.to_string()))
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::Caret => BinaryOp::Pow,
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Ne => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::And => BinaryOp::And,
        TokenKind::Or => BinaryOp::Or,
        _ => return None,
    })
}
