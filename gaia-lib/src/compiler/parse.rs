use crate::compiler::ast::{Expr, Program};
use crate::compiler::lexer::{lex, Token, TokenKind};
use crate::values::{v_bool, v_null, v_num, v_string, Failure, ObjId};

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

/// Parses a G source fragment into a program: a sequence of expressions
/// evaluated in order.
pub fn parse_program(src: &str) -> Result<Program, Failure> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
    };
    let mut exprs = Vec::new();
    while parser.peek_kind() != &TokenKind::Eof {
        exprs.push(parser.parse_expr()?);
    }
    Ok(Program(exprs))
}

/// Convenience for sources expected to hold exactly one expression.
pub fn parse_expr_src(src: &str) -> Result<Expr, Failure> {
    let mut program = parse_program(src)?;
    match program.0.len() {
        1 => Ok(program.0.remove(0)),
        n => Err(Failure::Parse {
            reason: format!("expected one expression, found {}", n),
            span: src.trim().chars().take(48).collect(),
        }),
    }
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, reason: &str) -> Failure {
        let span = if token.start < token.end && token.end <= self.src.len() {
            self.src[token.start..token.end].to_string()
        } else {
            self.src.trim().chars().take(32).collect()
        };
        Failure::Parse {
            reason: reason.to_string(),
            span,
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, Failure> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    expr = Expr::Attr {
                        target: Box::new(expr),
                        name: self.expect_symbol("attribute name after '.'")?,
                    };
                }
                TokenKind::Quote => {
                    self.advance();
                    let payload = self.parse_send_payload()?;
                    expr = Expr::Send {
                        target: Box::new(expr),
                        payload: Box::new(payload),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, Failure> {
        let token = self.advance();
        match token.kind {
            TokenKind::LBracket => self.parse_list(),
            TokenKind::Str(s) => Ok(Expr::Literal(v_string(s))),
            TokenKind::Num(n) => Ok(Expr::Literal(v_num(n))),
            TokenKind::ObjRef(name) => Ok(Expr::ObjRef(ObjId::new(name))),
            TokenKind::Symbol(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(v_bool(true)),
                "false" => Expr::Literal(v_bool(false)),
                "null" | "nil" => Expr::Literal(v_null()),
                _ => Expr::Symbol(name),
            }),
            TokenKind::At => self.parse_execution(),
            ref other => {
                let reason = format!("unexpected token {:?}", other);
                Err(self.error_at(&token, &reason))
            }
        }
    }

    /// `@ref`, `@ref.attr`, `@var`. The dot chain binds to the execution
    /// target, left-associatively.
    fn parse_execution(&mut self) -> Result<Expr, Failure> {
        let token = self.advance();
        let mut target = match token.kind {
            TokenKind::ObjRef(name) => Expr::ObjRef(ObjId::new(name)),
            TokenKind::Symbol(name) => Expr::Symbol(name),
            ref other => {
                return Err(self.error_at(
                    &token,
                    &format!("'@' requires an object reference or symbol, found {:?}", other),
                ))
            }
        };
        while self.peek_kind() == &TokenKind::Dot {
            self.advance();
            target = Expr::Attr {
                target: Box::new(target),
                name: self.expect_symbol("attribute name after '.'")?,
            };
        }
        Ok(Expr::Exec(Box::new(target)))
    }

    /// Payload of a send: a string literal delivered verbatim, or an
    /// `@`-execution whose result is delivered.
    fn parse_send_payload(&mut self) -> Result<Expr, Failure> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Expr::Literal(v_string(s))),
            TokenKind::At => self.parse_execution(),
            ref other => Err(self.error_at(
                &token,
                &format!("send payload must be text or an '@' expression, found {:?}", other),
            )),
        }
    }

    /// Inside `[...]` commas are separators exactly like spaces: runs of
    /// them introduce no elements. The empty-string literal is a real
    /// element.
    fn parse_list(&mut self) -> Result<Expr, Failure> {
        let mut items = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBracket => {
                    self.advance();
                    return Ok(Expr::List(items));
                }
                TokenKind::Eof => {
                    let token = self.peek().clone();
                    return Err(self.error_at(&token, "unclosed '['"));
                }
                _ => items.push(self.parse_expr()?),
            }
        }
    }

    fn expect_symbol(&mut self, what: &str) -> Result<String, Failure> {
        let token = self.advance();
        match token.kind {
            TokenKind::Symbol(name) => Ok(name),
            ref other => {
                Err(self.error_at(&token, &format!("expected {}, found {:?}", what, other)))
            }
        }
    }
}
