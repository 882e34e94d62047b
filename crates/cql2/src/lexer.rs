use crate::error::{Cql2Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Eof,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.char_indices().peekable(),
            src,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(&(idx, c)) = self.chars.peek() else {
                tokens.push(Token::Eof);
                return Ok(tokens);
            };
            match c {
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                ',' => {
                    self.chars.next();
                    tokens.push(Token::Comma);
                }
                '=' => {
                    self.chars.next();
                    tokens.push(Token::Eq);
                }
                '<' => {
                    self.chars.next();
                    match self.chars.peek() {
                        Some(&(_, '>')) => {
                            self.chars.next();
                            tokens.push(Token::Ne);
                        }
                        Some(&(_, '=')) => {
                            self.chars.next();
                            tokens.push(Token::Le);
                        }
                        _ => tokens.push(Token::Lt),
                    }
                }
                '>' => {
                    self.chars.next();
                    if let Some(&(_, '=')) = self.chars.peek() {
                        self.chars.next();
                        tokens.push(Token::Ge);
                    } else {
                        tokens.push(Token::Gt);
                    }
                }
                '\'' => {
                    tokens.push(Token::Str(self.read_string()?));
                }
                '"' => {
                    tokens.push(Token::Ident(self.read_quoted_ident()?));
                }
                c if c.is_ascii_digit() || (c == '-' && self.peek_is_digit_after_sign()) => {
                    tokens.push(Token::Number(self.read_number()?));
                }
                c if c.is_alphabetic() || c == '_' => {
                    tokens.push(self.read_ident_or_keyword());
                }
                other => {
                    return Err(Cql2Error::Parse(format!(
                        "unexpected character {other:?} at byte {idx}"
                    )));
                }
            }
        }
    }

    fn peek_is_digit_after_sign(&self) -> bool {
        let mut clone = self.chars.clone();
        clone.next();
        matches!(clone.peek(), Some((_, c)) if c.is_ascii_digit())
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn read_string(&mut self) -> Result<String> {
        self.chars.next(); // opening quote
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    // Escaped quote: '' inside a string literal means a literal '.
                    if let Some(&(_, '\'')) = self.chars.peek() {
                        self.chars.next();
                        out.push('\'');
                        continue;
                    }
                    return Ok(out);
                }
                Some((_, c)) => out.push(c),
                None => return Err(Cql2Error::Parse("unterminated string literal".into())),
            }
        }
    }

    fn read_quoted_ident(&mut self) -> Result<String> {
        self.chars.next(); // opening quote
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(out),
                Some((_, c)) => out.push(c),
                None => return Err(Cql2Error::Parse("unterminated quoted identifier".into())),
            }
        }
    }

    fn read_number(&mut self) -> Result<f64> {
        let start = self.chars.peek().map(|&(i, _)| i).unwrap_or_default();
        if let Some(&(_, '-')) = self.chars.peek() {
            self.chars.next();
        }
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end]
            .parse::<f64>()
            .map_err(|e| Cql2Error::Parse(format!("invalid number literal: {e}")))
    }

    fn read_ident_or_keyword(&mut self) -> Token {
        let start = self.chars.peek().map(|&(i, _)| i).unwrap_or_default();
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(self.src[start..end].to_string())
    }
}
