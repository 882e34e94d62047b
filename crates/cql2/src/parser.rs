use crate::ast::{CmpOp, Expr};
use crate::error::{Cql2Error, Result};
use crate::lexer::{Lexer, Token};

pub fn parse_text(src: &str) -> Result<Expr> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn is_keyword(tok: &Token, kw: &str) -> bool {
    matches!(tok, Token::Ident(s) if s.eq_ignore_ascii_case(kw))
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        tok
    }

    fn expect_eof(&self) -> Result<()> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(Cql2Error::Parse(format!(
                "unexpected trailing tokens starting at {:?}",
                self.peek()
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and()?];
        while is_keyword(self.peek(), "OR") {
            self.advance();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("len checked")
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_not()?];
        while is_keyword(self.peek(), "AND") {
            self.advance();
            terms.push(self.parse_not()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("len checked")
        } else {
            Expr::And(terms)
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if is_keyword(self.peek(), "NOT") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;

        if is_keyword(self.peek(), "IS") {
            self.advance();
            let negated = if is_keyword(self.peek(), "NOT") {
                self.advance();
                true
            } else {
                false
            };
            if !is_keyword(self.peek(), "NULL") {
                return Err(Cql2Error::Parse("expected NULL after IS [NOT]".into()));
            }
            self.advance();
            return Ok(Expr::IsNull {
                lhs: Box::new(lhs),
                negated,
            });
        }

        let negated = if is_keyword(self.peek(), "NOT") {
            self.advance();
            true
        } else {
            false
        };

        if is_keyword(self.peek(), "IN") {
            self.advance();
            self.expect(Token::LParen)?;
            let mut list = Vec::new();
            if !matches!(self.peek(), Token::RParen) {
                loop {
                    list.push(self.parse_primary()?);
                    if matches!(self.peek(), Token::Comma) {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::In {
                lhs: Box::new(lhs),
                list,
                negated,
            });
        }

        if is_keyword(self.peek(), "LIKE") {
            self.advance();
            let pattern = self.parse_primary()?;
            return Ok(Expr::Like {
                lhs: Box::new(lhs),
                pattern: Box::new(pattern),
                negated,
            });
        }

        if negated {
            return Err(Cql2Error::Parse(
                "NOT must be followed by IN or LIKE here".into(),
            ));
        }

        let op = match self.peek() {
            Token::Eq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_primary()?;
        Ok(Expr::Cmp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::LParen => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Number(n) => Ok(Expr::Number(n.into())),
            Token::Ident(s) if s.eq_ignore_ascii_case("true") => Ok(Expr::Bool(true)),
            Token::Ident(s) if s.eq_ignore_ascii_case("false") => Ok(Expr::Bool(false)),
            Token::Ident(s) if s.eq_ignore_ascii_case("null") => Ok(Expr::Null),
            Token::Ident(s) => Ok(Expr::Property(s.split('.').map(str::to_string).collect())),
            other => Err(Cql2Error::Parse(format!(
                "unexpected token {other:?} while parsing an expression"
            ))),
        }
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        let got = self.advance();
        if got == want {
            Ok(())
        } else {
            Err(Cql2Error::Parse(format!("expected {want:?}, found {got:?}")))
        }
    }
}
