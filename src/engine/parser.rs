//! Recursive-descent parser producing the statement tree the evaluator runs.

use super::lexer::{Token, TokenKind};
use super::EngineError;

/// Words that cannot be assigned to.
pub const KEYWORDS: &[&str] = &[
    "if", "elseif", "else", "end", "for", "while", "switch", "case", "otherwise", "try", "catch",
    "function", "return", "break", "continue",
];

/// Longest accepted variable name.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// `[A-Za-z][A-Za-z0-9_]*`, not a keyword, at most [`MAX_IDENTIFIER_LEN`] long.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_with_letter
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= MAX_IDENTIFIER_LEN
        && !KEYWORDS.contains(&name)
}

const UNSUPPORTED: &[&str] = &[
    "for", "while", "switch", "try", "function", "return", "break", "continue",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: String,
        fields: Vec<String>,
        value: Expr,
        line: usize,
    },
    Expr {
        expr: Expr,
        line: usize,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
        line: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    ElemMul,
    ElemDiv,
    ElemPow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    AndAnd,
    OrOr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Ident(String),
    Matrix(Vec<Vec<Expr>>),
    Cell(Vec<Vec<Expr>>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Range {
        start: Box<Expr>,
        step: Option<Box<Expr>>,
        stop: Box<Expr>,
    },
    /// `callee(args)`: indexing when the callee is a variable, otherwise a builtin call.
    Apply(Box<Expr>, Vec<Expr>),
    CellIndex(Box<Expr>, Vec<Expr>),
    Field(Box<Expr>, String),
    Transpose(Box<Expr>),
}

pub fn parse_program(tokens: Vec<Token>) -> Result<Vec<Stmt>, EngineError> {
    let mut parser = Parser::new(tokens);
    let statements = parser.block(&[])?;
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(token.line, format!("unexpected {}", describe(&token.kind))));
    }
    Ok(statements)
}

/// Parses text that must consist of exactly one expression, optionally
/// followed by a terminator.
pub fn parse_expression(tokens: Vec<Token>) -> Result<Expr, EngineError> {
    let mut parser = Parser::new(tokens);
    parser.skip_separators();
    if parser.peek().is_none() {
        return Err(parser.error_at(1, "empty expression"));
    }
    let expr = parser.expression()?;
    parser.skip_separators();
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(
            token.line,
            format!("unexpected {} after expression", describe(&token.kind)),
        ));
    }
    Ok(expr)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::Str(s) => format!("string '{}'", s),
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::Newline => "end of line".to_string(),
        other => format!("{:?}", other),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn line(&self) -> usize {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), EngineError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            let found = self
                .peek_kind()
                .map(describe)
                .unwrap_or_else(|| "end of script".to_string());
            Err(self.error(format!("expected {}, found {}", what, found)))
        }
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        self.error_at(self.line(), message)
    }

    fn error_at(&self, line: usize, message: impl Into<String>) -> EngineError {
        EngineError::Syntax {
            line,
            message: message.into(),
        }
    }

    fn at_keyword(&self, words: &[&str]) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Ident(name)) if words.contains(&name.as_str()))
    }

    fn skip_separators(&mut self) {
        while matches!(
            self.peek_kind(),
            Some(TokenKind::Newline | TokenKind::Semicolon | TokenKind::Comma)
        ) {
            self.pos += 1;
        }
    }

    /// Parses statements until one of `terminators` (left unconsumed) or
    /// the end of input when `terminators` is empty.
    fn block(&mut self, terminators: &[&str]) -> Result<Vec<Stmt>, EngineError> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                if terminators.is_empty() {
                    return Ok(statements);
                }
                return Err(self.error("missing 'end'"));
            }
            if self.at_keyword(terminators) {
                return Ok(statements);
            }
            statements.push(self.statement()?);
            match self.peek_kind() {
                None
                | Some(TokenKind::Newline | TokenKind::Semicolon | TokenKind::Comma) => {}
                Some(_) if self.at_keyword(terminators) => {}
                Some(kind) => {
                    let message = if *kind == TokenKind::Assign {
                        "indexed assignment is not supported".to_string()
                    } else {
                        format!("unexpected {}", describe(kind))
                    };
                    return Err(self.error(message));
                }
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, EngineError> {
        let line = self.line();
        if let Some(TokenKind::Ident(word)) = self.peek_kind() {
            let word = word.clone();
            if word == "if" {
                self.pos += 1;
                return self.if_statement(line);
            }
            if UNSUPPORTED.contains(&word.as_str()) {
                return Err(self.error(format!("'{}' is not supported in config scripts", word)));
            }
            if KEYWORDS.contains(&word.as_str()) {
                return Err(self.error(format!("unexpected '{}'", word)));
            }
            if let Some(fields) = self.assignment_target() {
                self.pos += 2 * fields.len() + 2;
                let value = self.expression()?;
                return Ok(Stmt::Assign {
                    target: word,
                    fields,
                    value,
                    line,
                });
            }
        }
        let expr = self.expression()?;
        Ok(Stmt::Expr { expr, line })
    }

    /// Looks ahead for `name(.field)* =` and returns the field path.
    fn assignment_target(&self) -> Option<Vec<String>> {
        let mut fields = Vec::new();
        let mut offset = 1;
        loop {
            match self.kind_at(offset) {
                Some(TokenKind::Assign) => return Some(fields),
                Some(TokenKind::Dot) => match self.kind_at(offset + 1) {
                    Some(TokenKind::Ident(field)) => {
                        fields.push(field.clone());
                        offset += 2;
                    }
                    _ => return None,
                },
                _ => return None,
            }
        }
    }

    fn if_statement(&mut self, line: usize) -> Result<Stmt, EngineError> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        let condition = self.expression()?;
        let body = self.block(&["elseif", "else", "end"])?;
        branches.push((condition, body));
        loop {
            let keyword = match self.advance().map(|t| t.kind) {
                Some(TokenKind::Ident(word)) => word,
                _ => return Err(self.error("missing 'end'")),
            };
            match keyword.as_str() {
                "elseif" => {
                    let condition = self.expression()?;
                    let body = self.block(&["elseif", "else", "end"])?;
                    branches.push((condition, body));
                }
                "else" => {
                    otherwise = Some(self.block(&["end"])?);
                }
                _ => break,
            }
        }
        Ok(Stmt::If {
            branches,
            otherwise,
            line,
        })
    }

    fn expression(&mut self) -> Result<Expr, EngineError> {
        self.binary_level(0)
    }

    fn binary_level(&mut self, level: usize) -> Result<Expr, EngineError> {
        const LEVELS: &[&[(TokenKind, BinaryOp)]] = &[
            &[(TokenKind::OrOr, BinaryOp::OrOr)],
            &[(TokenKind::AndAnd, BinaryOp::AndAnd)],
            &[(TokenKind::Or, BinaryOp::Or)],
            &[(TokenKind::And, BinaryOp::And)],
            &[
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::Ne),
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
        ];
        if level == LEVELS.len() {
            return self.range();
        }
        let mut lhs = self.binary_level(level + 1)?;
        'outer: loop {
            for (kind, op) in LEVELS[level] {
                if self.eat(kind) {
                    let rhs = self.binary_level(level + 1)?;
                    lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn range(&mut self) -> Result<Expr, EngineError> {
        let start = self.additive()?;
        if !self.eat(&TokenKind::Colon) {
            return Ok(start);
        }
        let second = self.additive()?;
        if self.eat(&TokenKind::Colon) {
            let stop = self.additive()?;
            return Ok(Expr::Range {
                start: Box::new(start),
                step: Some(Box::new(second)),
                stop: Box::new(stop),
            });
        }
        Ok(Expr::Range {
            start: Box::new(start),
            step: None,
            stop: Box::new(second),
        })
    }

    fn additive(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::DotStar) => BinaryOp::ElemMul,
                Some(TokenKind::DotSlash) => BinaryOp::ElemDiv,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, EngineError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Plus,
            Some(TokenKind::Not) => UnaryOp::Not,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, EngineError> {
        let mut base = self.postfix()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Caret) => BinaryOp::Pow,
                Some(TokenKind::DotCaret) => BinaryOp::ElemPow,
                _ => return Ok(base),
            };
            self.pos += 1;
            let exponent = self.power_operand()?;
            base = Expr::Binary(op, Box::new(base), Box::new(exponent));
        }
    }

    /// Exponents may carry their own sign: `2^-1`.
    fn power_operand(&mut self) -> Result<Expr, EngineError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Plus,
            Some(TokenKind::Not) => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.power_operand()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr, EngineError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Transpose) => {
                    self.pos += 1;
                    expr = Expr::Transpose(Box::new(expr));
                }
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    match self.advance().map(|t| t.kind) {
                        Some(TokenKind::Ident(field)) => {
                            expr = Expr::Field(Box::new(expr), field);
                        }
                        _ => return Err(self.error("expected field name after '.'")),
                    }
                }
                Some(TokenKind::LParen) => {
                    self.pos += 1;
                    let args = self.arguments(TokenKind::RParen, "')'")?;
                    expr = Expr::Apply(Box::new(expr), args);
                }
                Some(TokenKind::LBrace) => {
                    self.pos += 1;
                    let args = self.arguments(TokenKind::RBrace, "'}'")?;
                    expr = Expr::CellIndex(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>, EngineError> {
        let mut args = Vec::new();
        if self.eat(&close) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(close, what)?;
            return Ok(args);
        }
    }

    fn primary(&mut self) -> Result<Expr, EngineError> {
        let line = self.line();
        let token = self
            .advance()
            .ok_or_else(|| self.error_at(line, "unexpected end of script"))?;
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::Ident(name) => {
                if KEYWORDS.contains(&name.as_str()) {
                    return Err(self.error_at(line, format!("unexpected '{}'", name)));
                }
                Ok(Expr::Ident(name))
            }
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => Ok(Expr::Matrix(self.rows(TokenKind::RBracket)?)),
            TokenKind::LBrace => Ok(Expr::Cell(self.rows(TokenKind::RBrace)?)),
            other => Err(self.error_at(line, format!("unexpected {}", describe(&other)))),
        }
    }

    /// Rows of a `[...]` or `{...}` literal; empty rows are dropped.
    fn rows(&mut self, close: TokenKind) -> Result<Vec<Vec<Expr>>, EngineError> {
        let mut rows = Vec::new();
        let mut current = Vec::new();
        loop {
            match self.peek_kind() {
                Some(kind) if *kind == close => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::Semicolon) => {
                    self.pos += 1;
                    if !current.is_empty() {
                        rows.push(std::mem::take(&mut current));
                    }
                }
                Some(TokenKind::Comma) => {
                    self.pos += 1;
                }
                None => return Err(self.error("unclosed bracket")),
                Some(_) => current.push(self.expression()?),
            }
        }
        if !current.is_empty() {
            rows.push(current);
        }
        Ok(rows)
    }
}
