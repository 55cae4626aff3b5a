//! Recursive-descent parsing of the token stream into a [`Program`].
//!
//! ```text
//! program    = { statement }
//! statement  = funcDef | "return" expr ";" | identifier "=" expr ";" | expr ";"
//! funcDef    = "def" identifier "(" [ identifier { "," identifier } ] ")" "{" { statement } "}"
//! expr       = term { ("+" | "-") term }
//! term       = factor { ("*" | "/") factor }
//! factor     = "-" factor | number | call | identifier | "(" expr ")"
//! call       = identifier "(" [ expr { "," expr } ] ")"
//! ```
pub mod ast;

use ast::{BinaryOp, Expr, Ident, Program, Stmt};

use crate::lexer::{Span, Spanned, Token};

/// How deeply expressions and function definitions may nest. Every later
/// pass walks the tree recursively, so this bounds their stack use too.
pub const MAX_NESTING: usize = 256;

#[derive(thiserror::Error, Debug, PartialEq, Clone)]
pub enum ParseError {
    #[error("expected {expected} instead of '{found}'")]
    Unexpected {
        expected: &'static str,
        found: Token,
        span: Span,
    },
    #[error("expected {expected}, found end of input")]
    UnexpectedEnd { expected: &'static str, span: Span },
    #[error("nesting exceeds {limit} levels")]
    TooDeep { limit: usize, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            Self::Unexpected { span, .. }
            | Self::UnexpectedEnd { span, .. }
            | Self::TooDeep { span, .. } => span.clone(),
        }
    }
}

pub struct Parser<'t> {
    tokens: &'t [Spanned<Token>],
    pos: usize,
    // where an unexpected end of input is reported
    end: Span,
    // open parentheses, negations, argument lists and function bodies
    nesting: usize,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Spanned<Token>]) -> Self {
        let end = tokens
            .last()
            .map(|(_, span)| span.end..span.end)
            .unwrap_or(0..0);
        Self {
            tokens,
            pos: 0,
            end,
            nesting: 0,
        }
    }

    pub fn parse(mut self) -> Result<Program, ParseError> {
        let mut statements = vec![];
        while self.peek().is_some() {
            statements.push(self.statement()?);
        }
        Ok(Program(statements))
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_second(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos + 1).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Option<&'t Spanned<Token>> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn here(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map_or(self.end.clone(), |(_, span)| span.clone())
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                span: self.here(),
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    /// The height of a node over children at most `height` high.
    fn taller(&self, height: usize, at: &Span) -> Result<usize, ParseError> {
        if height >= MAX_NESTING {
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                span: at.clone(),
            });
        }
        Ok(height + 1)
    }

    fn error(&self, expected: &'static str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some((found, span)) => ParseError::Unexpected {
                expected,
                found: found.clone(),
                span: span.clone(),
            },
            None => ParseError::UnexpectedEnd {
                expected,
                span: self.end.clone(),
            },
        }
    }

    /// Consumes `token` if it is next.
    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<Span, ParseError> {
        match self.tokens.get(self.pos) {
            Some((found, span)) if found == token => {
                self.pos += 1;
                Ok(span.clone())
            }
            _ => Err(self.error(expected)),
        }
    }

    fn identifier(&mut self) -> Result<Ident, ParseError> {
        match self.tokens.get(self.pos) {
            Some((Token::Identifier(name), span)) => {
                self.pos += 1;
                Ok(Ident::new(name, span.clone()))
            }
            _ => Err(self.error("identifier")),
        }
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(Token::Def) => {
                self.enter()?;
                self.pos += 1;
                let definition = self.function_definition()?;
                self.leave();
                Ok(definition)
            }
            Some(Token::Return) => {
                let start = self.advance().map(|(_, span)| span.start).unwrap_or(0);
                let value = self.expr()?;
                let end = self.expect(&Token::Semicolon, "';'")?.end;
                Ok(Stmt::Return {
                    value,
                    span: start..end,
                })
            }
            Some(Token::Identifier(_)) if self.peek_second() == Some(&Token::Assign) => {
                let target = self.identifier()?;
                self.pos += 1;
                let value = self.expr()?;
                self.expect(&Token::Semicolon, "';'")?;
                Ok(Stmt::Assign { target, value })
            }
            _ => {
                let expr = self.expr()?;
                self.expect(&Token::Semicolon, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn function_definition(&mut self) -> Result<Stmt, ParseError> {
        let name = self.identifier()?;
        self.expect(&Token::LParen, "'('")?;
        let mut params = vec![];
        if !self.eat(&Token::RParen) {
            loop {
                params.push(self.identifier()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen, "')'")?;
        }

        self.expect(&Token::LBrace, "'{'")?;
        let mut body = vec![];
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error("'}'"));
            }
            body.push(self.statement()?);
        }
        Ok(Stmt::FuncDef { name, params, body })
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        Ok(self.sum()?.0)
    }

    // Chains of operators are built in a loop, so their height is tracked
    // alongside the expression instead of through recursion.
    fn sum(&mut self) -> Result<(Expr, usize), ParseError> {
        let (mut lhs, mut height) = self.product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok((lhs, height)),
            };
            let at = self.here();
            self.pos += 1;
            let (rhs, rhs_height) = self.product()?;
            height = self.taller(height.max(rhs_height), &at)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn product(&mut self) -> Result<(Expr, usize), ParseError> {
        let (mut lhs, mut height) = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok((lhs, height)),
            };
            let at = self.here();
            self.pos += 1;
            let (rhs, rhs_height) = self.factor()?;
            height = self.taller(height.max(rhs_height), &at)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn factor(&mut self) -> Result<(Expr, usize), ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                let at = self.here();
                self.enter()?;
                self.pos += 1;
                // no negation opcode exists, so -x is lowered to 0 - x
                let (operand, height) = self.factor()?;
                self.leave();
                let height = self.taller(height, &at)?;
                Ok((Expr::binary(BinaryOp::Sub, Expr::Number(0.0), operand), height))
            }
            Some(Token::Number(value)) => {
                self.pos += 1;
                Ok((Expr::Number(*value), 1))
            }
            Some(Token::Identifier(_)) if self.peek_second() == Some(&Token::LParen) => {
                let callee = self.identifier()?;
                self.enter()?;
                self.pos += 1;
                let mut args = vec![];
                let mut height = 0;
                if !self.eat(&Token::RParen) {
                    loop {
                        let (arg, arg_height) = self.sum()?;
                        args.push(arg);
                        height = height.max(arg_height);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "')'")?;
                }
                self.leave();
                let height = self.taller(height, &callee.span)?;
                Ok((Expr::Call { callee, args }, height))
            }
            Some(Token::Identifier(_)) => Ok((Expr::Variable(self.identifier()?), 1)),
            Some(Token::LParen) => {
                self.enter()?;
                self.pos += 1;
                let inner = self.sum()?;
                self.expect(&Token::RParen, "')'")?;
                self.leave();
                Ok(inner)
            }
            _ => Err(self.error("expression")),
        }
    }
}

/// Parses an already lexed token stream.
pub fn parse(tokens: &[Spanned<Token>]) -> Result<Program, ParseError> {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::{
        ast::{BinaryOp, Expr, Stmt},
        parse, ParseError, MAX_NESTING,
    };
    use crate::lexer::{tokenize, Token};
    use assert2::{assert, check, let_assert};

    fn parse_source(source: &str) -> Result<super::Program, ParseError> {
        let tokens = tokenize(source).expect("test source lexes");
        parse(&tokens)
    }

    #[test]
    fn subtraction_is_left_associative() {
        let_assert!(Ok(program) = parse_source("10 - 3 - 2;"));
        let_assert!([Stmt::Expr(Expr::Binary { op, lhs, rhs })] = program.statements());
        check!(*op == BinaryOp::Sub);
        check!(**rhs == Expr::Number(2.0));
        let_assert!(Expr::Binary { op: BinaryOp::Sub, .. } = &**lhs);
    }

    #[test]
    fn multiplication_binds_tighter() {
        let_assert!(Ok(program) = parse_source("x = 1 + 2 * 3;"));
        check!(program.to_string() == "x = (1 + (2 * 3));\n");
    }

    #[test]
    fn unary_minus_lowers_to_subtraction() {
        let_assert!(Ok(program) = parse_source("x = -(4);"));
        check!(program.to_string() == "x = (0 - 4);\n");
    }

    #[test]
    fn nested_definitions_and_calls() {
        let source = "def f(a, b) { def sum(a, b) { return a + b; } c = sum(a, b); return c / 2; } print(f(3, 4));";
        let_assert!(Ok(program) = parse_source(source));
        check!(
            program.dump()
                == "Def f(a, b)\n  Def sum(a, b)\n    Return\n      Binary +\n        Var a\n        Var b\n  Assign c\n    Call sum\n      Var a\n      Var b\n  Return\n    Binary /\n      Var c\n      Number 2\nExpr\n  Call print\n    Call f\n      Number 3\n      Number 4\n"
        );
    }

    #[test]
    fn empty_parameter_and_argument_lists() {
        let_assert!(Ok(program) = parse_source("def z() { return 0; } z();"));
        check!(program.statements().len() == 2);
    }

    #[test]
    fn missing_semicolon_is_positioned() {
        let_assert!(Err(err) = parse_source("a = 1\nb = 2;"));
        let_assert!(ParseError::Unexpected { expected, found, span } = err);
        check!(expected == "';'");
        check!(found == Token::Identifier("b".into()));
        check!(span == (6..7));
    }

    #[test]
    fn unclosed_body_reports_end_of_input() {
        let_assert!(Err(err) = parse_source("def f(a) { return a;"));
        assert!(matches!(err, ParseError::UnexpectedEnd { expected: "'}'", .. }));
        check!(err.span() == (20..20));
    }

    #[test]
    fn stray_operator() {
        let_assert!(Err(err) = parse_source("a = * 2;"));
        check!(err.to_string() == "expected expression instead of '*'");
    }

    fn chain(terms: usize) -> String {
        format!("x = {};", vec!["1"; terms].join(" + "))
    }

    #[test]
    fn operator_chains_are_bounded() {
        let_assert!(Ok(_) = parse_source(&chain(MAX_NESTING)));
        let_assert!(Err(err) = parse_source(&chain(MAX_NESTING + 1)));
        // the operator that would have made the tree too tall
        check!(err == ParseError::TooDeep { limit: MAX_NESTING, span: 1026..1027 });
        check!(err.to_string() == "nesting exceeds 256 levels");

        let_assert!(Err(ParseError::TooDeep { .. }) = parse_source(&chain(50_000)));
    }

    #[test]
    fn parentheses_are_bounded() {
        let nested = |depth: usize| format!("x = {}1{};", "(".repeat(depth), ")".repeat(depth));
        let_assert!(Ok(_) = parse_source(&nested(MAX_NESTING)));
        let_assert!(Err(err) = parse_source(&nested(10_000)));
        check!(err.span() == (260..261));
    }

    #[test]
    fn negations_and_calls_are_bounded() {
        let_assert!(Err(ParseError::TooDeep { .. }) = parse_source(&format!("x = {}1;", "-".repeat(10_000))));
        let calls = format!("x = {}1{};", "f(".repeat(10_000), ")".repeat(10_000));
        let_assert!(Err(ParseError::TooDeep { .. }) = parse_source(&calls));
    }

    #[test]
    fn function_definitions_are_bounded() {
        let source = format!("{}{}", "def f() { ".repeat(10_000), "}".repeat(10_000));
        let_assert!(Err(ParseError::TooDeep { .. }) = parse_source(&source));
    }
}
