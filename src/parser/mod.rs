//! Parser for filter rules
//!
//! This module implements a recursive descent parser that produces an AST
//! from a token stream. The parser is LL(1) except for assignment targets,
//! which look up to three tokens ahead.
//!
//! Precedence, lowest first: `;`, `:=`, `?:` / `if`, `|`, `^`, `&`,
//! comparison, `in` / `contains`, `like` / `rlike` / `irlike`, `+ -`,
//! `* / %`, unary, `**`, indexing, primary.

pub mod ast;

use crate::errors::{span_of, FilterError, FilterResult};
use crate::evaluator::builtins::FunctionRegistry;
use crate::lexer::token::{SourceLocation, Token, TokenKind};
use crate::lexer::Lexer;
use crate::stack;
use ast::*;

/// Default maximum nesting depth
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Largest nesting depth any parser accepts; larger requests are clamped
pub const MAX_PARSE_DEPTH: usize = 256;

/// Tokenize and parse a rule in one step
pub fn parse_rule(source: &str, registry: &FunctionRegistry) -> FilterResult<Rule> {
    let tokens = Lexer::new(source).tokenize()?;
    let rule = Parser::new(tokens, source, registry).parse()?;
    tracing::debug!(
        domain = "parse",
        bytes = source.len(),
        conditions = rule.condition_count(),
        "rule parsed"
    );
    Ok(rule)
}

/// Parser for filter rules
pub struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    source: String,
    registry: &'r FunctionRegistry,
    /// Current nesting depth
    depth: usize,
    max_depth: usize,
    /// Returned once the token stream is exhausted
    eof: Token,
}

impl<'r> Parser<'r> {
    /// Create a new parser from a token stream
    pub fn new(tokens: Vec<Token>, source: impl Into<String>, registry: &'r FunctionRegistry) -> Self {
        let source = source.into();
        let eof = Token::new(
            TokenKind::Eof,
            SourceLocation::new(1, 1, source.len(), 0),
        );
        Self {
            tokens,
            pos: 0,
            source,
            registry,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            eof,
        }
    }

    /// Override the maximum nesting depth, up to [`MAX_PARSE_DEPTH`]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.min(MAX_PARSE_DEPTH);
        self
    }

    /// Parse the whole rule
    pub fn parse(&mut self) -> FilterResult<Rule> {
        let body = self.parse_statements()?;
        if !self.is_at_end() {
            return Err(self.error_unexpected("end of rule"));
        }
        Ok(Rule::new(self.source.clone(), body))
    }

    /// Parse `;`-separated statements up to a closing token
    fn parse_statements(&mut self) -> FilterResult<Expr> {
        let start_loc = self.current_location();
        let mut statements = Vec::new();

        loop {
            while self.check(&TokenKind::Semicolon) {
                self.advance();
            }
            if self.at_statements_end() {
                break;
            }
            statements.push(self.parse_statement()?);
            if !self.check(&TokenKind::Semicolon) {
                break;
            }
        }

        match statements.len() {
            0 => Ok(Expr::Null(SourceLocation::new(
                start_loc.line,
                start_loc.column,
                start_loc.offset,
                0,
            ))),
            1 => Ok(statements.remove(0)),
            _ => {
                let first = statements[0].location().clone();
                let last = statements[statements.len() - 1].location().clone();
                Ok(Expr::Sequence(SequenceExpr {
                    statements,
                    location: first.span_to(&last),
                }))
            }
        }
    }

    /// Tokens that close a statement list
    fn at_statements_end(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::Comma
                | TokenKind::Then
                | TokenKind::Else
                | TokenKind::End
                | TokenKind::Colon
                | TokenKind::Eof
        )
    }

    /// Parse a statement: an assignment or a conditional expression
    fn parse_statement(&mut self) -> FilterResult<Expr> {
        self.enter()?;
        let result = stack::guarded(|| self.parse_statement_inner());
        self.leave();
        result
    }

    fn parse_statement_inner(&mut self) -> FilterResult<Expr> {
        let start_loc = self.current_location();

        if let TokenKind::Ident(name) = &self.current().kind {
            let name = name.clone();

            // `name := value`
            if self.peek_kind(1) == Some(&TokenKind::Assign) {
                self.advance();
                self.advance();
                return self.finish_assignment(AssignTarget::Var(name), start_loc.clone(), start_loc);
            }

            // `name[] := value`
            if self.peek_kind(1) == Some(&TokenKind::LeftBracket)
                && self.peek_kind(2) == Some(&TokenKind::RightBracket)
                && self.peek_kind(3) == Some(&TokenKind::Assign)
            {
                for _ in 0..4 {
                    self.advance();
                }
                return self.finish_assignment(AssignTarget::Append(name), start_loc.clone(), start_loc);
            }
        }

        let expr = self.parse_conditional()?;

        if !self.check(&TokenKind::Assign) {
            return Ok(expr);
        }

        // `name[index] := value`
        match expr {
            Expr::Index(IndexExpr { base, index, .. }) => match *base {
                Expr::Var(name, name_loc) => {
                    self.advance();
                    self.finish_assignment(AssignTarget::Index(name, index), name_loc, start_loc)
                }
                other => Err(self.invalid_assignment(other.location())),
            },
            other => Err(self.invalid_assignment(other.location())),
        }
    }

    /// Parse the value after `:=` and build the assignment node
    fn finish_assignment(
        &mut self,
        target: AssignTarget,
        name_location: SourceLocation,
        start_loc: SourceLocation,
    ) -> FilterResult<Expr> {
        let value = self.parse_statement()?;
        let end_loc = value.location().clone();
        Ok(Expr::Assign(AssignExpr {
            target,
            value: Box::new(value),
            name_location,
            location: start_loc.span_to(&end_loc),
        }))
    }

    /// Parse `if c then a [else b] [end]` or `c ? a : b`
    fn parse_conditional(&mut self) -> FilterResult<Expr> {
        let start_loc = self.current_location();

        if self.check(&TokenKind::If) {
            self.advance();
            let condition = self.parse_or()?;
            self.expect(&TokenKind::Then)?;
            let then_branch = self.parse_statements()?;
            let else_branch = if self.check(&TokenKind::Else) {
                self.advance();
                Some(Box::new(self.parse_statements()?))
            } else {
                None
            };
            if self.check(&TokenKind::End) {
                self.advance();
            }
            let end_loc = self.previous_location();

            return Ok(Expr::Conditional(ConditionalExpr {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch,
                style: ConditionalStyle::IfThen,
                location: start_loc.span_to(&end_loc),
            }));
        }

        let condition = self.parse_or()?;

        if !self.check(&TokenKind::Question) {
            return Ok(condition);
        }

        self.advance();
        let then_branch = self.parse_statement()?;
        self.expect(&TokenKind::Colon)?;
        let else_branch = self.parse_statement()?;
        let end_loc = else_branch.location().clone();

        Ok(Expr::Conditional(ConditionalExpr {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Some(Box::new(else_branch)),
            style: ConditionalStyle::Ternary,
            location: start_loc.span_to(&end_loc),
        }))
    }

    /// Parse OR chain: `a | b | c`
    fn parse_or(&mut self) -> FilterResult<Expr> {
        self.parse_bool_chain(BoolOp::Or, &TokenKind::Or, Self::parse_xor)
    }

    /// Parse XOR chain: `a ^ b ^ c`
    fn parse_xor(&mut self) -> FilterResult<Expr> {
        self.parse_bool_chain(BoolOp::Xor, &TokenKind::Xor, Self::parse_and)
    }

    /// Parse AND chain: `a & b & c`
    fn parse_and(&mut self) -> FilterResult<Expr> {
        self.parse_bool_chain(BoolOp::And, &TokenKind::And, Self::parse_comparison)
    }

    /// Collect operands of one boolean operator into a single n-ary node
    fn parse_bool_chain(
        &mut self,
        op: BoolOp,
        token: &TokenKind,
        operand: fn(&mut Self) -> FilterResult<Expr>,
    ) -> FilterResult<Expr> {
        let first = operand(self)?;
        if !self.check(token) {
            return Ok(first);
        }

        let start_loc = first.location().clone();
        let mut operands = vec![first];
        while self.check(token) {
            self.advance();
            operands.push(operand(self)?);
        }
        let end_loc = operands[operands.len() - 1].location().clone();

        Ok(Expr::BoolOp(BoolOpExpr {
            op,
            operands,
            location: start_loc.span_to(&end_loc),
        }))
    }

    /// Parse comparison: `==`, `!=`, `===`, `!==`, `<`, `<=`, `>`, `>=`
    fn parse_comparison(&mut self) -> FilterResult<Expr> {
        self.parse_left_assoc(Self::parse_containment, |kind| match kind {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::EqEqEq => Some(BinaryOp::StrictEq),
            TokenKind::NotEqEq => Some(BinaryOp::StrictNotEq),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::LtEq => Some(BinaryOp::LtEq),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::GtEq => Some(BinaryOp::GtEq),
            _ => None,
        })
    }

    /// Parse containment: `a in b`, `a contains b`
    fn parse_containment(&mut self) -> FilterResult<Expr> {
        self.parse_left_assoc(Self::parse_pattern, |kind| match kind {
            TokenKind::In => Some(BinaryOp::In),
            TokenKind::Contains => Some(BinaryOp::Contains),
            _ => None,
        })
    }

    /// Parse pattern match: `like` / `matches`, `rlike` / `regex`, `irlike`
    fn parse_pattern(&mut self) -> FilterResult<Expr> {
        self.parse_left_assoc(Self::parse_additive, |kind| match kind {
            TokenKind::Like => Some(BinaryOp::Like),
            TokenKind::Rlike => Some(BinaryOp::Rlike),
            TokenKind::Irlike => Some(BinaryOp::Irlike),
            _ => None,
        })
    }

    /// Parse additive expression: `a + b`, `a - b`
    fn parse_additive(&mut self) -> FilterResult<Expr> {
        self.parse_left_assoc(Self::parse_multiplicative, |kind| match kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    /// Parse multiplicative expression: `a * b`, `a / b`, `a % b`
    fn parse_multiplicative(&mut self) -> FilterResult<Expr> {
        self.parse_left_assoc(Self::parse_unary, |kind| match kind {
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            TokenKind::Percent => Some(BinaryOp::Mod),
            _ => None,
        })
    }

    /// Left-associative binary level. A single operator gives a
    /// [`BinaryExpr`]; longer runs are kept flat in a [`ChainExpr`], so a
    /// run of any length costs no nesting depth.
    fn parse_left_assoc(
        &mut self,
        operand: fn(&mut Self) -> FilterResult<Expr>,
        operator: fn(&TokenKind) -> Option<BinaryOp>,
    ) -> FilterResult<Expr> {
        let first = operand(self)?;
        let start_loc = first.location().clone();
        let mut links = Vec::new();

        while let Some(op) = operator(&self.current().kind) {
            self.advance();
            let right = operand(self)?;
            let location = start_loc.span_to(right.location());
            links.push(ChainLink {
                op,
                operand: right,
                location,
            });
        }

        Ok(match links.len() {
            0 => first,
            1 => {
                let link = links.remove(0);
                Expr::Binary(BinaryExpr {
                    left: Box::new(first),
                    op: link.op,
                    right: Box::new(link.operand),
                    location: link.location,
                })
            }
            _ => {
                let location = links[links.len() - 1].location.clone();
                Expr::Chain(ChainExpr {
                    first: Box::new(first),
                    links,
                    location,
                })
            }
        })
    }

    /// Parse unary expression: `!a`, `not a`, `-a`, `+a`
    fn parse_unary(&mut self) -> FilterResult<Expr> {
        let op = match self.current().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            _ => return self.parse_power(),
        };

        let start_loc = self.current_location();
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        let operand = operand?;
        let end_loc = operand.location().clone();

        Ok(Expr::Unary(UnaryExpr {
            op,
            operand: Box::new(operand),
            location: start_loc.span_to(&end_loc),
        }))
    }

    /// Parse exponent: `a ** b` (right-associative)
    fn parse_power(&mut self) -> FilterResult<Expr> {
        let base = self.parse_postfix()?;
        if !self.check(&TokenKind::StarStar) {
            return Ok(base);
        }

        self.advance();
        self.enter()?;
        let exponent = self.parse_unary();
        self.leave();
        let exponent = exponent?;

        let start_loc = base.location().clone();
        let end_loc = exponent.location().clone();
        Ok(Expr::Binary(BinaryExpr {
            left: Box::new(base),
            op: BinaryOp::Pow,
            right: Box::new(exponent),
            location: start_loc.span_to(&end_loc),
        }))
    }

    /// Parse postfix indexing: `a[i][j]`
    fn parse_postfix(&mut self) -> FilterResult<Expr> {
        let saved_depth = self.depth;
        let result = self.parse_postfix_inner();
        self.depth = saved_depth;
        result
    }

    fn parse_postfix_inner(&mut self) -> FilterResult<Expr> {
        let mut expr = self.parse_primary()?;

        while self.check(&TokenKind::LeftBracket) {
            // `x[] :=` is an append target, handled at statement level
            if self.peek_kind(1) == Some(&TokenKind::RightBracket) {
                break;
            }
            self.enter()?;
            let start_loc = expr.location().clone();
            self.advance();
            let index = self.parse_statement()?;
            self.expect(&TokenKind::RightBracket)?;
            let end_loc = self.previous_location();

            expr = Expr::Index(IndexExpr {
                base: Box::new(expr),
                index: Box::new(index),
                location: start_loc.span_to(&end_loc),
            });
        }

        Ok(expr)
    }

    /// Parse primary expression
    fn parse_primary(&mut self) -> FilterResult<Expr> {
        let loc = self.current_location();

        match &self.current().kind {
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true, loc))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false, loc))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null(loc))
            }
            TokenKind::Integer(n) => {
                let n = *n;
                self.advance();
                Ok(Expr::Integer(n, loc))
            }
            TokenKind::Float(n) => {
                let n = *n;
                self.advance();
                Ok(Expr::Float(n, loc))
            }
            TokenKind::String(s) => {
                let s = s.clone();
                self.advance();
                Ok(Expr::String(s, loc))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                if self.check(&TokenKind::LeftParen) {
                    self.parse_call(name, loc)
                } else {
                    Ok(Expr::Var(name, loc))
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_statements()?;
                self.expect(&TokenKind::RightParen)?;
                let end_loc = self.previous_location();
                Ok(Expr::Paren(Box::new(inner), loc.span_to(&end_loc)))
            }
            TokenKind::LeftBracket => self.parse_array(),
            _ => Err(self.error_unexpected("expression")),
        }
    }

    /// Parse call arguments after the function name; known functions are arity-checked
    fn parse_call(&mut self, name: String, start_loc: SourceLocation) -> FilterResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;

        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.parse_statement()?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(&TokenKind::RightParen)?;
        let location = start_loc.span_to(&self.previous_location());

        if let Some(function) = self.registry.get(&name) {
            if !function.accepts(args.len()) {
                return Err(FilterError::WrongArity {
                    src: self.source.clone(),
                    span: span_of(&location),
                    name: function.name().to_string(),
                    expected: function.arity_description(),
                    found: args.len(),
                });
            }
        }

        Ok(Expr::Call(CallExpr {
            name,
            args,
            location,
        }))
    }

    /// Parse array literal: `[a, b, c]` (trailing comma allowed)
    fn parse_array(&mut self) -> FilterResult<Expr> {
        let start_loc = self.current_location();
        self.expect(&TokenKind::LeftBracket)?;

        let mut elements = Vec::new();
        while !self.check(&TokenKind::RightBracket) {
            elements.push(self.parse_statement()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }

        self.expect(&TokenKind::RightBracket)?;
        let end_loc = self.previous_location();

        Ok(Expr::Array(ArrayExpr {
            elements,
            location: start_loc.span_to(&end_loc),
        }))
    }

    // Helper methods

    /// Go one nesting level deeper
    fn enter(&mut self) -> FilterResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(FilterError::NestingTooDeep {
                src: self.source.clone(),
                span: span_of(&self.current_location()),
                help: format!(
                    "the rule nests deeper than {} levels; split it into smaller expressions",
                    self.max_depth
                ),
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Get the current token
    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    /// Get the current token's location
    fn current_location(&self) -> SourceLocation {
        self.current().location.clone()
    }

    /// Get the previous token's location
    fn previous_location(&self) -> SourceLocation {
        if self.pos > 0 {
            self.tokens
                .get(self.pos - 1)
                .map_or_else(|| self.current_location(), |t| t.location.clone())
        } else {
            self.current_location()
        }
    }

    /// Kind of the token `n` positions ahead
    fn peek_kind(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    /// Check if we're at the end of input
    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    /// Check if current token matches expected kind
    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    /// Advance to next token
    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    /// Expect a specific token kind
    fn expect(&mut self, kind: &TokenKind) -> FilterResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_unexpected(&format!("'{}'", kind)))
        }
    }

    /// Create an "unexpected token" error
    fn error_unexpected(&self, expected: &str) -> FilterError {
        let found = self.current().kind.to_string();
        let help = match self.current().kind {
            TokenKind::Eof => "the rule ends too early".to_string(),
            TokenKind::Assign => "only variables can be assigned with :=".to_string(),
            _ => format!("expected {} here", expected),
        };
        FilterError::unexpected_token(
            self.source.clone(),
            &self.current_location(),
            expected,
            found,
            help,
        )
    }

    fn invalid_assignment(&self, location: &SourceLocation) -> FilterError {
        FilterError::InvalidAssignment {
            src: self.source.clone(),
            span: span_of(location),
        }
    }
}
