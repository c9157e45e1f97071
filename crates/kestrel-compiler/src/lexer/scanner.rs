use std::sync::LazyLock;

use num_bigint::BigUint;
use num_traits::ToPrimitive;

use super::token::punctuators;
use super::{Span, Token, TokenKind};

static PUNCTUATORS: LazyLock<Vec<(&'static str, TokenKind)>> = LazyLock::new(punctuators);

/// Produces tokens on demand from a source string.
///
/// The scanner is a byte cursor into the source, so cloning it is cheap
/// and yields an independent lookahead cursor.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    pub fn next_token(&mut self) -> Token {
        let newline_before = self.skip_trivia();
        let start = self.pos;
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.string(quote)
            }
            Some('0'..='9') => self.number(),
            Some('.') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number(),
            Some(c) if is_id_start(c) => self.word(),
            Some(_) => self.punctuator(),
        };
        Token {
            kind,
            span: Span::new(start, self.pos),
            newline_before,
        }
    }

    /// The token after the current position, without consuming it.
    pub fn peek_token(&self) -> Token {
        self.clone().next_token()
    }

    /// 1-based line and column of a byte offset.
    pub fn position(&self, offset: usize) -> (usize, usize) {
        let before = &self.source[..floor_char_boundary(self.source, offset)];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        (line, before[line_start..].chars().count() + 1)
    }

    pub fn slice(&self, span: Span) -> &'a str {
        let end = floor_char_boundary(self.source, span.end);
        let start = floor_char_boundary(self.source, span.start).min(end);
        &self.source[start..end]
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// Skips whitespace and comments. Returns whether a line terminator
    /// was crossed.
    fn skip_trivia(&mut self) -> bool {
        let mut newline = false;
        loop {
            let rest = self.rest();
            if rest.starts_with("//") {
                let len = rest.find(['\n', '\r', '\u{2028}', '\u{2029}']).unwrap_or(rest.len());
                self.pos += len;
            } else if let Some(body) = rest.strip_prefix("/*") {
                let len = body.find("*/").map_or(rest.len(), |i| i + 4);
                newline |= rest[..len].contains(is_line_terminator);
                self.pos += len;
            } else {
                match self.peek() {
                    Some(c) if is_line_terminator(c) => newline = true,
                    Some(c) if c.is_whitespace() || c == '\u{feff}' => {}
                    _ => return newline,
                }
                self.bump();
            }
        }
    }

    fn punctuator(&mut self) -> TokenKind {
        let rest = self.rest();
        // `a?.5:b` is a conditional, not an optional member access
        let optional_chain_on_digit =
            rest.starts_with("?.") && rest[2..].starts_with(|c: char| c.is_ascii_digit());
        let found = PUNCTUATORS
            .iter()
            .filter(|(text, _)| !(optional_chain_on_digit && *text == "?."))
            .find(|(text, _)| rest.starts_with(text));
        match found {
            Some((text, kind)) => {
                self.pos += text.len();
                kind.clone()
            }
            None => {
                self.bump();
                TokenKind::Invalid
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(is_id_continue) {
            self.bump();
        }
        let text = &self.source[start..self.pos];
        TokenKind::word(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string()))
    }

    fn string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return TokenKind::Invalid;
            };
            match c {
                _ if c == quote => return TokenKind::String(value),
                '\n' | '\r' => return TokenKind::Invalid,
                '\\' => match self.escape() {
                    Some(Some(decoded)) => value.push(decoded),
                    Some(None) => {}
                    None => return TokenKind::Invalid,
                },
                _ => value.push(c),
            }
        }
    }

    /// Decodes the escape after a backslash. `Some(None)` is a line
    /// continuation, `None` a malformed escape.
    fn escape(&mut self) -> Option<Option<char>> {
        let c = self.bump()?;
        let decoded = match c {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' if !self.peek().is_some_and(|d| d.is_ascii_digit()) => '\0',
            'x' => self.hex_digits(2)?,
            'u' if self.eat('{') => {
                let end = self.rest().find('}')?;
                let code = u32::from_str_radix(&self.rest()[..end], 16).ok()?;
                self.pos += end + 1;
                char::from_u32(code)?
            }
            'u' => self.hex_digits(4)?,
            '\n' | '\u{2028}' | '\u{2029}' => return Some(None),
            '\r' => {
                self.eat('\n');
                return Some(None);
            }
            other => other,
        };
        Some(Some(decoded))
    }

    fn hex_digits(&mut self, count: usize) -> Option<char> {
        let digits = self.rest().get(..count)?;
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        self.pos += count;
        char::from_u32(u32::from_str_radix(digits, 16).ok()?)
    }

    fn number(&mut self) -> TokenKind {
        let radix = match (self.peek(), self.peek_at(1)) {
            (Some('0'), Some('x' | 'X')) => 16,
            (Some('0'), Some('o' | 'O')) => 8,
            (Some('0'), Some('b' | 'B')) => 2,
            _ => 10,
        };
        if radix != 10 {
            let prefix = &self.source[self.pos..self.pos + 2];
            self.pos += 2;
            let digits = self.digits(radix);
            let is_bigint = self.eat('n');
            let Some(value) = BigUint::parse_bytes(digits.as_bytes(), radix) else {
                return TokenKind::Invalid;
            };
            if is_bigint {
                return TokenKind::BigInt(format!("{}{}", prefix.to_ascii_lowercase(), digits));
            }
            return value.to_f64().map_or(TokenKind::Invalid, TokenKind::Number);
        }

        let mut text = self.digits(10);
        if self.eat('n') {
            return TokenKind::BigInt(text);
        }
        if self.eat('.') {
            text.push('.');
            text.push_str(&self.digits(10));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_at(1).filter(|c| matches!(c, '+' | '-'));
            let digit_at = if sign.is_some() { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += digit_at;
                text.push('e');
                text.extend(sign);
                text.push_str(&self.digits(10));
            }
        }
        if text.starts_with('.') {
            text.insert(0, '0');
        }
        text.parse().map_or(TokenKind::Invalid, TokenKind::Number)
    }

    /// Digits of `radix`, with `_` separators dropped.
    fn digits(&mut self, radix: u32) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '_' {
                self.bump();
            } else if c.is_digit(radix) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_id_start(c: char) -> bool {
    c == '_' || c == '$' || unicode_xid::UnicodeXID::is_xid_start(c)
}

fn is_id_continue(c: char) -> bool {
    c == '_' || c == '$' || c == '\u{200c}' || c == '\u{200d}' || unicode_xid::UnicodeXID::is_xid_continue(c)
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
