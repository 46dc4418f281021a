//! Basic-IO codec: a line-oriented textual format for rosters and change
//! sets (spec §4.1).
//!
//! Three token kinds: **symbols** (`[a-zA-Z][a-zA-Z0-9_]*`), **quoted
//! strings** (`"..."`, backslash-escaping only `"` and `\`, every other
//! byte including newlines passes through verbatim), and **hex literals**
//! (`[...]`, an even-length run of lowercase hex digits). A **stanza** is
//! one or more `<symbol> <value> [<value>]` lines terminated by a blank
//! line or end of input; a **document** is stanzas joined by single blank
//! lines plus a trailing newline.
//!
//! [`escape`] and the tokenizer are byte-transparent: every value 0..255
//! round-trips through `escape` and back through [`Parser::string`].

use std::fmt::Write as _;

use crate::error::RosterError;

/// Quote a string so that tokenizing the result yields exactly one string
/// token with value `s`, for any byte sequence `s` (not just valid UTF-8
/// text — this crate represents attribute values and similar payloads as
/// `String`, but the escaping rule itself operates byte-for-byte).
#[must_use]
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Render bytes as a lowercase hex literal `[..]`.
#[must_use]
pub fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 2);
    out.push('[');
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out.push(']');
    out
}

/// One line of a stanza: a leading symbol plus one or two values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// The leading symbol (e.g. `dir`, `content`, `attr`).
    pub symbol: String,
    /// The line's values, in order. A `path_mark`/`content_mark` line has
    /// zero or more hex values; most lines have one or two.
    pub values: Vec<Value>,
}

/// A single value token: either a quoted string or a hex literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A quoted string value.
    Str(String),
    /// A hex literal value (already decoded).
    Hex(Vec<u8>),
}

impl Value {
    /// Borrow as a string, if this value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Hex(_) => None,
        }
    }

    /// Borrow as hex bytes, if this value is a hex literal.
    #[must_use]
    pub fn as_hex(&self) -> Option<&[u8]> {
        match self {
            Self::Hex(h) => Some(h),
            Self::Str(_) => None,
        }
    }
}

/// A stanza: an ordered list of lines, terminated by a blank line or EOF.
pub type Stanza = Vec<Line>;

/// Render a stanza to its textual form, right-aligning symbols to the
/// width of the longest symbol in the stanza. Alignment is cosmetic —
/// parsers must tolerate but never require it (spec §4.1).
#[must_use]
pub fn write_stanza(stanza: &Stanza) -> String {
    let width = stanza.iter().map(|l| l.symbol.len()).max().unwrap_or(0);
    let mut out = String::new();
    for line in stanza {
        let _ = write!(out, "{:>width$}", line.symbol, width = width);
        for v in &line.values {
            out.push(' ');
            match v {
                Value::Str(s) => out.push_str(&escape(s)),
                Value::Hex(h) => out.push_str(&hex_literal(h)),
            }
        }
        out.push('\n');
    }
    out
}

/// Render a full document: stanzas joined by single blank lines, with a
/// trailing newline.
#[must_use]
pub fn write_document(stanzas: &[Stanza]) -> String {
    let mut out = String::new();
    for (i, stanza) in stanzas.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&write_stanza(stanza));
    }
    out
}

/// Parses a basic-IO document into stanzas.
pub struct Parser<'a> {
    stream_name: String,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser over `input`, reporting errors against `stream_name`.
    #[must_use]
    pub fn new(stream_name: impl Into<String>, input: &'a str) -> Self {
        Self {
            stream_name: stream_name.into(),
            bytes: input.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> RosterError {
        RosterError::Malformed {
            stream: self.stream_name.clone(),
            line: self.line,
            column: self.column,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.advance();
        }
    }

    fn at_eol_or_eof(&self) -> bool {
        matches!(self.peek(), None | Some(b'\n'))
    }

    /// Parse an entire document into its stanzas.
    pub fn parse_document(mut self) -> Result<Vec<Stanza>, RosterError> {
        let mut stanzas = Vec::new();
        loop {
            self.skip_blank_lines();
            if self.peek().is_none() {
                break;
            }
            stanzas.push(self.parse_stanza()?);
        }
        Ok(stanzas)
    }

    fn skip_blank_lines(&mut self) {
        while self.peek() == Some(b'\n') {
            self.advance();
        }
    }

    fn parse_stanza(&mut self) -> Result<Stanza, RosterError> {
        let mut lines = Vec::new();
        loop {
            self.skip_spaces();
            if self.peek().is_none() || self.peek() == Some(b'\n') {
                self.skip_blank_lines();
                break;
            }
            lines.push(self.parse_line()?);
        }
        Ok(lines)
    }

    fn parse_line(&mut self) -> Result<Line, RosterError> {
        let symbol = self.parse_symbol()?;
        let mut values = Vec::new();
        loop {
            self.skip_spaces();
            if self.at_eol_or_eof() {
                break;
            }
            values.push(self.parse_value()?);
        }
        if self.peek() == Some(b'\n') {
            self.advance();
        }
        if values.is_empty() {
            return Err(self.malformed(format!("symbol {symbol:?} has no value")));
        }
        Ok(Line { symbol, values })
    }

    fn parse_symbol(&mut self) -> Result<String, RosterError> {
        let start_col = self.column;
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() => {}
            _ => {
                return Err(RosterError::Malformed {
                    stream: self.stream_name.clone(),
                    line: self.line,
                    column: start_col,
                    reason: "expected a symbol".to_owned(),
                });
            }
        }
        let mut s = String::new();
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                s.push(b as char);
                self.advance();
            } else {
                break;
            }
        }
        Ok(s)
    }

    fn parse_value(&mut self) -> Result<Value, RosterError> {
        match self.peek() {
            Some(b'"') => self.parse_string().map(Value::Str),
            Some(b'[') => self.parse_hex().map(Value::Hex),
            _ => Err(self.malformed("expected a quoted string or hex literal")),
        }
    }

    fn parse_string(&mut self) -> Result<String, RosterError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(self.malformed("unterminated string")),
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'"') => s.push('"'),
                    Some(b'\\') => s.push('\\'),
                    Some(other) => {
                        // The original byte is not valid after a backslash
                        // outside of `"`/`\`, but real documents never
                        // produce one; pass it through unescaped rather
                        // than reject, matching the codec's byte
                        // transparency contract.
                        s.push(other as char);
                    }
                    None => return Err(self.malformed("unterminated string")),
                },
                Some(other) => s.push(other as char),
            }
        }
        Ok(s)
    }

    fn parse_hex(&mut self) -> Result<Vec<u8>, RosterError> {
        self.advance(); // '['
        let mut hex = String::new();
        loop {
            match self.advance() {
                None => return Err(self.malformed("unterminated hex literal")),
                Some(b']') => break,
                Some(b) if b.is_ascii_hexdigit() && !b.is_ascii_uppercase() => hex.push(b as char),
                Some(b) => {
                    return Err(self.malformed(format!("non-hex byte {} in hex literal", b as char)));
                }
            }
        }
        if hex.len() % 2 != 0 {
            return Err(self.malformed("hex literal has odd length"));
        }
        let mut out = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            let byte = u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| self.malformed("non-hex byte in hex literal"))?;
            out.push(byte);
        }
        Ok(out)
    }
}

/// Convenience: parse a whole document from a string.
pub fn parse_document(stream_name: impl Into<String>, input: &str) -> Result<Vec<Stanza>, RosterError> {
    Parser::new(stream_name, input).parse_document()
}
