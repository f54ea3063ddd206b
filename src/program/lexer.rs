//! Tokenizer for generated renderer source.

use std::fmt;

use crate::error::{ToolchainError, ToolchainErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Punct(char),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier '{}'", name),
            Self::Str(_) => f.write_str("string literal"),
            Self::Int(i) => write!(f, "integer {}", i),
            Self::Float(x) => write!(f, "float {}", x),
            Self::Punct(c) => write!(f, "'{}'", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

const PUNCTUATION: &[char] = &['#', '!', '[', ']', '=', '(', ')', '{', '}', ',', ';', '.'];

pub struct Lexer<'a> {
    input: &'a str,
    /// Byte offset into `input`.
    pos: usize,
    line: usize,
    line_start_pos: usize,
}

impl<'a> Lexer<'a> {
    pub const fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
        }
    }

    fn column(&self) -> usize {
        self.input
            .get(self.line_start_pos..self.pos)
            .map_or(0, |line| line.chars().count())
            + 1
    }

    /// Line and column just past the last character.
    pub fn end_position(&self) -> (usize, usize) {
        (self.line, self.column())
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos;
        }
        Some(c)
    }

    fn consume_while<F: Fn(char) -> bool>(&mut self, pred: F) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        self.input.get(start..self.pos).unwrap_or_default()
    }

    fn error(&self, expected: &str, found: String) -> ToolchainError {
        ToolchainError {
            line: self.line,
            column: self.column(),
            kind: ToolchainErrorKind::Syntax {
                expected: expected.to_string(),
                found,
            },
        }
    }

    /// Skips whitespace and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            self.consume_while(char::is_whitespace);
            if self.rest().starts_with("//") {
                self.consume_while(|c| c != '\n');
            } else {
                return;
            }
        }
    }

    pub fn tokenize(mut self) -> Result<(Vec<Token>, (usize, usize)), ToolchainError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let Some(c) = self.peek() else {
                return Ok((tokens, self.end_position()));
            };
            let (line, column) = (self.line, self.column());
            let kind = match c {
                '"' => TokenKind::Str(self.lex_string()?),
                '-' if self.peek_second().is_some_and(|d| d.is_ascii_digit()) => {
                    self.lex_number()?
                }
                c if c.is_ascii_digit() => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => TokenKind::Ident(
                    self.consume_while(|c| c.is_alphanumeric() || c == '_')
                        .to_string(),
                ),
                c if PUNCTUATION.contains(&c) => {
                    self.bump();
                    TokenKind::Punct(c)
                }
                c => return Err(self.error("token", format!("'{}'", c))),
            };
            tokens.push(Token { kind, line, column });
        }
    }

    fn lex_string(&mut self) -> Result<String, ToolchainError> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("'\"'", "end of input".to_string())),
                Some('"') => return Ok(value),
                Some('\\') => value.push(self.lex_escape()?),
                Some(c) => value.push(c),
            }
        }
    }

    fn lex_escape(&mut self) -> Result<char, ToolchainError> {
        match self.bump() {
            Some('"') => Ok('"'),
            Some('\\') => Ok('\\'),
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some('0') => Ok('\0'),
            Some('u') => {
                if self.bump() != Some('{') {
                    return Err(self.error("'{' after \\u", "malformed escape".to_string()));
                }
                let hex = self.consume_while(|c| c.is_ascii_hexdigit());
                let decoded = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
                match (decoded, self.bump()) {
                    (Some(c), Some('}')) => Ok(c),
                    _ => Err(self.error(
                        "unicode escape",
                        format!("'\\u{{{}'", hex),
                    )),
                }
            }
            Some(c) => Err(self.error("escape sequence", format!("'\\{}'", c))),
            None => Err(self.error("escape sequence", "end of input".to_string())),
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, ToolchainError> {
        let start = self.pos;
        let mut is_float = false;
        if self.peek() == Some('-') {
            self.bump();
        }
        self.consume_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            self.consume_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            self.consume_while(|c| c.is_ascii_digit());
        }

        let digits = self.input.get(start..self.pos).unwrap_or_default();
        let parsed = if is_float {
            digits.parse::<f64>().ok().map(TokenKind::Float)
        } else {
            digits.parse::<i64>().ok().map(TokenKind::Int)
        };
        parsed.ok_or_else(|| self.error("number", format!("'{}'", digits)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .0
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tokens_and_comments() {
        assert_eq!(
            kinds("// header\nlookup(c, \"k\");"),
            vec![
                TokenKind::Ident("lookup".to_string()),
                TokenKind::Punct('('),
                TokenKind::Ident("c".to_string()),
                TokenKind::Punct(','),
                TokenKind::Str("k".to_string()),
                TokenKind::Punct(')'),
                TokenKind::Punct(';'),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_numbers() {
        assert_eq!(
            kinds("42 -7 1.5 1e20 -2.5e-3 NODES[3].render"),
            vec![
                TokenKind::Int(42),
                TokenKind::Int(-7),
                TokenKind::Float(1.5),
                TokenKind::Float(1e20),
                TokenKind::Float(-2.5e-3),
                TokenKind::Ident("NODES".to_string()),
                TokenKind::Punct('['),
                TokenKind::Int(3),
                TokenKind::Punct(']'),
                TokenKind::Punct('.'),
                TokenKind::Ident("render".to_string()),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\\c\n\t\0\u{7}é""#),
            vec![TokenKind::Str("a\"b\\c\n\t\0\u{7}é".to_string())]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_positions() {
        let (tokens, end) = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!(end, (2, 4));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_errors() {
        let err = Lexer::new("\"open").tokenize().unwrap_err();
        assert!(matches!(
            err.kind,
            ToolchainErrorKind::Syntax { ref found, .. } if found == "end of input"
        ));

        let err = Lexer::new("a @").tokenize().unwrap_err();
        assert_eq!((err.line, err.column), (1, 3));

        let err = Lexer::new(r#""\q""#).tokenize().unwrap_err();
        assert!(matches!(err.kind, ToolchainErrorKind::Syntax { .. }));
    }
}
