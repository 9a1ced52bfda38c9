use crate::values::Failure;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    LBracket,
    RBracket,
    Comma,
    At,
    Dot,
    Colon,
    /// The message operator: a `"` immediately following a send target.
    Quote,
    ObjRef(String),
    Str(String),
    Num(f64),
    Symbol(String),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '+' | '-' | '*' | '/' | '%' | '<' | '>' | '=' | '!' | '?' | '^' | '&')
}

fn is_symbol_continue(c: char) -> bool {
    is_symbol_start(c) || c.is_ascii_digit()
}

fn is_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    offset: usize,
    tokens: Vec<Token>,
    ws_since_last: bool,
    at_chain: bool,
}

/// Tokenizes a G source fragment. `"` is overloaded: it opens a string
/// literal, except when it abuts an object reference or the tail of an
/// `@`-expression, where it is the message operator introducing a send
/// payload.
pub fn lex(src: &str) -> Result<Vec<Token>, Failure> {
    lex_at_offset(src, 0)
}

fn lex_at_offset(src: &str, offset: usize) -> Result<Vec<Token>, Failure> {
    let mut lexer = Lexer {
        src,
        chars: src.char_indices().collect(),
        pos: 0,
        offset,
        tokens: Vec::new(),
        ws_since_last: true,
        at_chain: false,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    fn byte_pos(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, reason: &str, start: usize) -> Failure {
        let end = self.byte_pos().min(self.src.len());
        let span = self.src[start..end].trim().to_string();
        Failure::Parse {
            reason: reason.to_string(),
            span: if span.is_empty() {
                self.src.trim().chars().take(32).collect()
            } else {
                span
            },
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let end = self.byte_pos();
        // Track whether the previous token can end a send target, which is
        // what disambiguates the next `"`.
        match &kind {
            TokenKind::At => self.at_chain = true,
            TokenKind::Dot | TokenKind::Symbol(_) | TokenKind::ObjRef(_) => {}
            _ => self.at_chain = false,
        }
        self.tokens.push(Token {
            kind,
            start: start + self.offset,
            end: end + self.offset,
        });
        self.ws_since_last = false;
    }

    fn last_is_send_target(&self) -> bool {
        if self.ws_since_last {
            return false;
        }
        match self.tokens.last().map(|t| &t.kind) {
            Some(TokenKind::ObjRef(_)) => true,
            Some(TokenKind::Symbol(_)) => self.at_chain,
            _ => false,
        }
    }

    fn run(&mut self) -> Result<(), Failure> {
        while let Some(c) = self.peek() {
            let start = self.byte_pos();
            match c {
                _ if c.is_whitespace() => {
                    self.bump();
                    self.ws_since_last = true;
                    self.at_chain = false;
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    self.ws_since_last = true;
                    self.at_chain = false;
                }
                '[' => {
                    self.bump();
                    self.push(TokenKind::LBracket, start);
                }
                ']' => {
                    self.bump();
                    self.push(TokenKind::RBracket, start);
                }
                ',' => {
                    self.bump();
                    self.push(TokenKind::Comma, start);
                }
                '@' => {
                    self.bump();
                    self.push(TokenKind::At, start);
                }
                '.' => {
                    self.bump();
                    self.push(TokenKind::Dot, start);
                }
                ':' => {
                    self.bump();
                    self.push(TokenKind::Colon, start);
                }
                '#' => self.lex_objref(start)?,
                '"' => {
                    if self.last_is_send_target() {
                        self.lex_send_payload(start)?;
                    } else {
                        self.lex_string(start)?;
                    }
                }
                _ if c.is_ascii_digit() => self.lex_number(start)?,
                '+' | '-' if self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                    self.lex_number(start)?
                }
                _ if is_symbol_start(c) => self.lex_symbol(start),
                _ => return Err(self.error(&format!("unexpected character '{}'", c), start)),
            }
        }
        let end = self.src.len() + self.offset;
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            start: end,
            end,
        });
        Ok(())
    }

    fn lex_objref(&mut self, start: usize) -> Result<(), Failure> {
        self.bump(); // '#'
        let mut name = String::new();
        let mut colons = 0;
        while let Some(c) = self.peek() {
            if is_ref_char(c) {
                name.push(c);
                self.bump();
            } else if c == ':' && colons == 0 && !name.is_empty() {
                colons += 1;
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.error("object reference requires a name after '#'", start));
        }
        if name.ends_with(':') {
            return Err(self.error("object reference has an empty namespace segment", start));
        }
        self.push(TokenKind::ObjRef(name), start);
        Ok(())
    }

    /// Scans a quoted region, returning the raw (unprocessed) text and
    /// leaving the position just past the closing quote.
    fn scan_quoted(&mut self, start: usize) -> Result<String, Failure> {
        self.bump(); // opening '"'
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string", start)),
                Some('"') => return Ok(raw),
                Some('\\') => {
                    let Some(escaped) = self.bump() else {
                        return Err(self.error("unterminated string", start));
                    };
                    raw.push('\\');
                    raw.push(escaped);
                }
                Some(c) => raw.push(c),
            }
        }
    }

    fn lex_string(&mut self, start: usize) -> Result<(), Failure> {
        let raw = self.scan_quoted(start)?;
        let unescaped = unescape(&raw).map_err(|reason| self.error(&reason, start))?;
        self.push(TokenKind::Str(unescaped), start);
        Ok(())
    }

    /// A message operator followed by its payload, which runs to the closing
    /// quote: plain text delivers verbatim, an `@`-expression is lexed
    /// through so the parser can evaluate it.
    fn lex_send_payload(&mut self, start: usize) -> Result<(), Failure> {
        self.push(TokenKind::Quote, start);
        let payload_start = self.byte_pos();
        let raw = self.scan_quoted(payload_start)?;
        if raw.trim_start().starts_with('@') {
            let inner = lex_at_offset(&raw, payload_start + self.offset + 1)?;
            for token in inner {
                if token.kind != TokenKind::Eof {
                    self.tokens.push(token);
                }
            }
            self.ws_since_last = false;
            self.at_chain = false;
        } else {
            let unescaped = unescape(&raw).map_err(|reason| self.error(&reason, start))?;
            self.push(TokenKind::Str(unescaped), payload_start);
        }
        Ok(())
    }

    fn lex_number(&mut self, start: usize) -> Result<(), Failure> {
        let mut text = String::new();
        if matches!(self.peek(), Some('+') | Some('-')) {
            text.push(self.bump().unwrap());
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error("malformed number", start))?;
        self.push(TokenKind::Num(value), start);
        Ok(())
    }

    fn lex_symbol(&mut self, start: usize) {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_symbol_continue(c) {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(TokenKind::Symbol(name), start);
    }
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(format!("unknown escape '\\{}'", other)),
            None => return Err("dangling escape".to_string()),
        }
    }
    Ok(out)
}
