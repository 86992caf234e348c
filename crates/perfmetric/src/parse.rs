//! Parser for metric formulas
//!
//! Recursive descent over the token stream produced by `lex::tokenize`.
//! Precedence, lowest first: `if`/`else`, `|`, `&`, comparisons, `+ -`,
//! `* /`, unary minus, primaries.

use std::ops::Range;

use crate::ast::{BinOp, Expr, Function};
use crate::lex::{Spanned, Token, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    UnexpectedToken,
    UnexpectedEnd,
    InvalidToken,
    UnknownFunction,
    Arity,
    InvalidArgument,
    DuplicateModifier,
    NonAssociative,
    NestingTooDeep,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub message: String,
    /// The formula being parsed
    pub text: String,
    /// Byte range of the offending input
    pub span: Range<usize>,
    pub line: usize,
    pub column: usize,
}

impl SyntaxError {
    pub(crate) fn new(
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        text: &str,
        span: Range<usize>,
    ) -> Self {
        let (line, column) = offset_to_line_column(text, span.start);
        Self {
            kind,
            message: message.into(),
            text: text.to_string(),
            span,
            line,
            column,
        }
    }

    pub fn offset(&self) -> usize {
        self.span.start
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {}, offset {}) in `{}`",
            self.message, self.line, self.column, self.span.start, self.text
        )
    }
}

impl std::error::Error for SyntaxError {}

fn offset_to_line_column(input: &str, offset: usize) -> (usize, usize) {
    let bounded = offset.min(input.len());
    let mut line = 1usize;
    let mut column = 1usize;

    for ch in input[..bounded].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    (line, column)
}

/// Deepest `(`, unary minus or `else` nesting the parser recurses through
pub const MAX_NESTING: usize = 64;

/// Deepest tree `parse` builds; passes over parsed trees recurse this far
pub const MAX_TREE_DEPTH: usize = 256;

/// Parse a metric formula
pub fn parse(text: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        text,
        tokens: &tokens,
        pos: 0,
        nesting: 0,
    };
    let expr = parser.expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(trailing) => Err(parser.error_at(
            SyntaxErrorKind::UnexpectedToken,
            format!("unexpected trailing {}", trailing.token.describe()),
            trailing.span.clone(),
        )),
    }
}

struct Parser<'a> {
    text: &'a str,
    tokens: &'a [Spanned],
    pos: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&'a Token> {
        self.peek().map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&'a Spanned> {
        let spanned = self.tokens.get(self.pos);
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, context: &str) -> Result<(), SyntaxError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {} {context}", expected.describe())))
        }
    }

    fn error_at(
        &self,
        kind: SyntaxErrorKind,
        message: impl Into<String>,
        span: Range<usize>,
    ) -> SyntaxError {
        SyntaxError::new(kind, message, self.text, span)
    }

    /// Error for whatever sits at the current position
    fn unexpected(&self, expectation: &str) -> SyntaxError {
        match self.peek() {
            Some(s) => self.error_at(
                SyntaxErrorKind::UnexpectedToken,
                format!("{expectation}, found {}", s.token.describe()),
                s.span.clone(),
            ),
            None => self.error_at(
                SyntaxErrorKind::UnexpectedEnd,
                format!("{expectation}, found end of input"),
                self.text.len()..self.text.len(),
            ),
        }
    }

    fn span_from(&self, start: usize) -> Range<usize> {
        let begin = self
            .tokens
            .get(start)
            .map_or(self.text.len(), |s| s.span.start);
        let end = self
            .pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(begin, |s| s.span.end);
        begin..end.max(begin)
    }

    /// Run `parse_inner` one nesting level deeper
    fn nested(
        &mut self,
        parse_inner: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        if self.nesting >= MAX_NESTING {
            let span = self
                .peek()
                .map_or(self.text.len()..self.text.len(), |s| s.span.clone());
            return Err(self.error_at(
                SyntaxErrorKind::NestingTooDeep,
                format!("expression nests deeper than {MAX_NESTING} levels"),
                span,
            ));
        }
        self.nesting += 1;
        let result = parse_inner(self);
        self.nesting -= 1;
        result
    }

    fn check_depth(&self, depth: usize, start: usize) -> Result<(), SyntaxError> {
        if depth > MAX_TREE_DEPTH {
            return Err(self.error_at(
                SyntaxErrorKind::NestingTooDeep,
                format!("expression is deeper than {MAX_TREE_DEPTH} levels"),
                self.span_from(start),
            ));
        }
        Ok(())
    }

    // ============ Conditional (lowest precedence) ============

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.pos;
        let then = self.or_expr()?;
        if !self.eat(&Token::If) {
            return Ok(then);
        }
        let predicate = self.or_expr()?;
        self.expect(Token::Else, "after `if` predicate")?;
        let otherwise = self.expr()?;
        let depth = 1 + then.depth().max(predicate.depth()).max(otherwise.depth());
        self.check_depth(depth, start)?;
        Ok(Expr::conditional(then, predicate, otherwise))
    }

    // ============ Binary operators ============

    /// Left-associative run of `operand (op operand)*`
    fn binary_chain(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr, SyntaxError>,
        operator: fn(&Token) -> Option<BinOp>,
    ) -> Result<Expr, SyntaxError> {
        let start = self.pos;
        let mut lhs = operand(self)?;
        let mut depth = None;
        while let Some(op) = self.peek_token().and_then(operator) {
            self.pos += 1;
            let rhs = operand(self)?;
            let joined = 1 + depth.unwrap_or_else(|| lhs.depth()).max(rhs.depth());
            self.check_depth(joined, start)?;
            depth = Some(joined);
            lhs = lhs.binary(op, rhs);
        }
        Ok(lhs)
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_chain(Self::and_expr, |t| (*t == Token::Pipe).then_some(BinOp::Or))
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_chain(Self::cmp_expr, |t| (*t == Token::Amp).then_some(BinOp::And))
    }

    fn cmp_expr(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.pos;
        let lhs = self.add_expr()?;
        let Some(op) = self.peek_token().and_then(cmp_op) else {
            return Ok(lhs);
        };
        self.pos += 1;
        let rhs = self.add_expr()?;
        if let Some(next) = self.peek().filter(|s| cmp_op(&s.token).is_some()) {
            return Err(self.error_at(
                SyntaxErrorKind::NonAssociative,
                "comparison operators cannot be chained; add parentheses",
                next.span.clone(),
            ));
        }
        self.check_depth(1 + lhs.depth().max(rhs.depth()), start)?;
        Ok(lhs.binary(op, rhs))
    }

    fn add_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_chain(Self::mul_expr, |t| match t {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn mul_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_chain(Self::unary_expr, |t| match t {
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            _ => None,
        })
    }

    /// `-literal` folds into the literal, `-x` becomes `0 - x`
    fn unary_expr(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.pos;
        if !self.eat(&Token::Minus) {
            return self.primary();
        }
        match self.nested(Self::unary_expr)? {
            Expr::Literal(value) => Ok(Expr::Literal(-value)),
            operand => {
                self.check_depth(1 + operand.depth(), start)?;
                Ok(Expr::lit(0.0).binary(BinOp::Sub, operand))
            }
        }
    }

    // ============ Primary expressions ============

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.pos;
        let Some(spanned) = self.advance() else {
            return Err(self.unexpected("expected an expression"));
        };
        match &spanned.token {
            Token::Number(value) => Ok(Expr::Literal(*value)),
            Token::Event(event) => Ok(Expr::Event(event.clone())),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "to close `(`")?;
                Ok(inner)
            }
            Token::Word(word) => {
                if self.peek_token() == Some(&Token::LParen) {
                    return self.call(word, start);
                }
                if Function::from_name(word).is_some() {
                    return Err(self.error_at(
                        SyntaxErrorKind::UnexpectedToken,
                        format!("function `{word}` must be called with arguments"),
                        spanned.span.clone(),
                    ));
                }
                Ok(Expr::event(word.as_str()))
            }
            other => {
                self.pos = start;
                Err(self.unexpected(&format!(
                    "expected an expression before {}",
                    other.describe()
                )))
            }
        }
    }

    fn call(&mut self, name: &str, start: usize) -> Result<Expr, SyntaxError> {
        let Some(function) = Function::from_name(name) else {
            return Err(self.error_at(
                SyntaxErrorKind::UnknownFunction,
                format!("unknown function `{name}`"),
                self.span_from(start),
            ));
        };
        self.expect(Token::LParen, "after function name")?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expr()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen, "to close argument list")?;
                break;
            }
        }

        if args.len() != function.arity() {
            return Err(self.error_at(
                SyntaxErrorKind::Arity,
                format!(
                    "`{name}` takes {} argument(s), got {}",
                    function.arity(),
                    args.len()
                ),
                self.span_from(start),
            ));
        }
        if function.takes_event() && !matches!(args[0], Expr::Event(_)) {
            return Err(self.error_at(
                SyntaxErrorKind::InvalidArgument,
                format!("`{name}` expects an event reference"),
                self.span_from(start),
            ));
        }
        let depth = 1 + args.iter().map(Expr::depth).max().unwrap_or(0);
        self.check_depth(depth, start)?;
        Ok(Expr::Call(function, args))
    }
}

fn cmp_op(token: &Token) -> Option<BinOp> {
    match token {
        Token::Lt => Some(BinOp::Lt),
        Token::Gt => Some(BinOp::Gt),
        Token::Le => Some(BinOp::Le),
        Token::Ge => Some(BinOp::Ge),
        _ => None,
    }
}

// ============ Sanity Tests ============
// Most testing is done via integration tests in tests/integration.rs
