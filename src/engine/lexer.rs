//! Tokenizer for config scripts.
//!
//! Handles the context-sensitive parts of the syntax: apostrophes that are
//! either string delimiters or the transpose operator, `...` continuations,
//! and whitespace that separates elements inside `[...]` and `{...}`.

use super::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    DotStar,
    DotSlash,
    DotCaret,
    Transpose,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Newline,
    Colon,
    Dot,
}

impl TokenKind {
    /// Whether a token can end an operand, which decides how a following
    /// apostrophe or whitespace-separated sign is read.
    fn ends_value(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_)
                | TokenKind::Str(_)
                | TokenKind::Ident(_)
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Transpose
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, EngineError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    /// Open `(`, `[`, `{` characters, innermost last.
    groups: Vec<char>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            tokens: Vec::new(),
            groups: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            line: self.line,
        });
    }

    fn last_ends_value(&self) -> bool {
        self.tokens.last().is_some_and(|t| t.kind.ends_value())
    }

    fn in_concatenation(&self) -> bool {
        matches!(self.groups.last(), Some('[') | Some('{'))
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        EngineError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, EngineError> {
        let mut spaced = false;
        while let Some(c) = self.peek(0) {
            if c == ' ' || c == '\t' || c == '\r' {
                self.pos += 1;
                spaced = true;
                continue;
            }
            if c == '.' && self.peek(1) == Some('.') && self.peek(2) == Some('.') {
                self.skip_line();
                if self.peek(0) == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                spaced = true;
                continue;
            }
            if c == '%' {
                self.skip_line();
                continue;
            }
            if spaced
                && self.in_concatenation()
                && self.last_ends_value()
                && self.starts_element()
            {
                self.push(TokenKind::Comma);
            }
            spaced = false;
            self.lex_token(c)?;
        }
        if let Some(open) = self.groups.last() {
            return Err(self.error(format!("unclosed '{}'", open)));
        }
        Ok(self.tokens)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    /// Whether the character at the cursor begins a new element when it
    /// follows whitespace inside brackets.
    fn starts_element(&self) -> bool {
        let Some(c) = self.peek(0) else {
            return false;
        };
        let next = self.peek(1);
        match c {
            '+' | '-' => next.is_some_and(|n| !n.is_whitespace() && n != '='),
            '~' | '!' => next != Some('='),
            '.' => next.is_some_and(|n| n.is_ascii_digit()),
            '\'' | '"' | '(' | '[' | '{' => true,
            c => c.is_ascii_alphanumeric(),
        }
    }

    fn lex_token(&mut self, c: char) -> Result<(), EngineError> {
        let next = self.peek(1);
        match c {
            '\n' => {
                if self.in_concatenation() {
                    self.push(TokenKind::Semicolon);
                } else {
                    self.push(TokenKind::Newline);
                }
                self.pos += 1;
                self.line += 1;
            }
            '0'..='9' => self.lex_number()?,
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => self.lex_number()?,
            'a'..='z' | 'A'..='Z' => self.lex_ident(),
            '\'' => {
                if self.last_ends_value() && self.source_char_before_is_adjacent() {
                    self.pos += 1;
                    self.push(TokenKind::Transpose);
                } else {
                    self.lex_string('\'')?;
                }
            }
            '"' => self.lex_string('"')?,
            '.' => {
                let kind = match next {
                    Some('*') => Some(TokenKind::DotStar),
                    Some('/') => Some(TokenKind::DotSlash),
                    Some('^') => Some(TokenKind::DotCaret),
                    Some('\'') => Some(TokenKind::Transpose),
                    _ => None,
                };
                match kind {
                    Some(kind) => {
                        self.pos += 2;
                        self.push(kind);
                    }
                    None => {
                        self.pos += 1;
                        self.push(TokenKind::Dot);
                    }
                }
            }
            '=' if next == Some('=') => self.two(TokenKind::EqEq),
            '~' | '!' if next == Some('=') => self.two(TokenKind::NotEq),
            '<' if next == Some('=') => self.two(TokenKind::Le),
            '>' if next == Some('=') => self.two(TokenKind::Ge),
            '&' if next == Some('&') => self.two(TokenKind::AndAnd),
            '|' if next == Some('|') => self.two(TokenKind::OrOr),
            '(' | '[' | '{' => {
                self.groups.push(c);
                self.one(match c {
                    '(' => TokenKind::LParen,
                    '[' => TokenKind::LBracket,
                    _ => TokenKind::LBrace,
                });
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if self.groups.pop() != Some(expected) {
                    return Err(self.error(format!("unbalanced '{}'", c)));
                }
                self.one(match c {
                    ')' => TokenKind::RParen,
                    ']' => TokenKind::RBracket,
                    _ => TokenKind::RBrace,
                });
            }
            '=' => self.one(TokenKind::Assign),
            '<' => self.one(TokenKind::Lt),
            '>' => self.one(TokenKind::Gt),
            '&' => self.one(TokenKind::And),
            '|' => self.one(TokenKind::Or),
            '~' | '!' => self.one(TokenKind::Not),
            '+' => self.one(TokenKind::Plus),
            '-' => self.one(TokenKind::Minus),
            '*' => self.one(TokenKind::Star),
            '/' => self.one(TokenKind::Slash),
            '^' => self.one(TokenKind::Caret),
            ',' => self.one(TokenKind::Comma),
            ';' => self.one(TokenKind::Semicolon),
            ':' => self.one(TokenKind::Colon),
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        }
        Ok(())
    }

    fn source_char_before_is_adjacent(&self) -> bool {
        self.pos > 0 && !self.chars[self.pos - 1].is_whitespace()
    }

    fn one(&mut self, kind: TokenKind) {
        self.pos += 1;
        self.push(kind);
    }

    fn two(&mut self, kind: TokenKind) {
        self.pos += 2;
        self.push(kind);
    }

    fn lex_number(&mut self) -> Result<(), EngineError> {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek(0) == Some('.')
            && !matches!(self.peek(1), Some('*' | '/' | '^' | '\'' | '.'))
        {
            self.pos += 1;
            while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek(1), Some('+' | '-')));
            if self.peek(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1 + sign;
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("malformed number '{}'", text)))?;
        self.push(TokenKind::Number(value));
        Ok(())
    }

    fn lex_ident(&mut self) {
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.push(TokenKind::Ident(name));
    }

    fn lex_string(&mut self, delimiter: char) -> Result<(), EngineError> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek(0) {
                Some(c) if c == delimiter => {
                    if self.peek(1) == Some(delimiter) {
                        text.push(delimiter);
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        break;
                    }
                }
                Some('\n') | None => return Err(self.error("unterminated string")),
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::Str(text));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_apostrophe_after_value_is_transpose() {
        assert_eq!(
            kinds("x = v';"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Ident("v".into()),
                TokenKind::Transpose,
                TokenKind::Semicolon,
            ]
        );
        assert_eq!(kinds("s = 'a;b';")[2], TokenKind::Str("a;b".into()));
    }

    #[test]
    fn test_whitespace_separates_bracket_elements() {
        assert_eq!(
            kinds("[1 -2]"),
            vec![
                TokenKind::LBracket,
                TokenKind::Number(1.0),
                TokenKind::Comma,
                TokenKind::Minus,
                TokenKind::Number(2.0),
                TokenKind::RBracket,
            ]
        );
        assert_eq!(
            kinds("[1 - 2]"),
            vec![
                TokenKind::LBracket,
                TokenKind::Number(1.0),
                TokenKind::Minus,
                TokenKind::Number(2.0),
                TokenKind::RBracket,
            ]
        );
    }

    #[test]
    fn test_continuation_joins_lines() {
        let tokens = tokenize("a = 1 + ... trailing words\n  2;").unwrap();
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Newline));
        assert_eq!(tokens.last().map(|t| t.line), Some(2));
    }

    #[test]
    fn test_comment_and_double_quoted_string() {
        assert_eq!(
            kinds("a = \"say \"\"hi\"\"\"; % note"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Assign,
                TokenKind::Str("say \"hi\"".into()),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_reports_line() {
        let err = tokenize("a = 1;\nb = 'oops;\n").unwrap_err();
        assert_eq!(
            err,
            EngineError::Syntax {
                line: 2,
                message: "unterminated string".into()
            }
        );
    }
}
