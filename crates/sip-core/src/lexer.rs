//! Character-class tokenizer for the RFC 3261 grammar.
//!
//! The lexer walks a character buffer and hands out typed [`Token`]s under a
//! *selected* grammar context. The context decides which keyword table is
//! active: in [`Context::Method`] the word `REGISTER` lexes as a
//! [`TokenKind::Method`] token, in [`Context::HeaderName`] the words `Via`
//! and `v` both lex as [`TokenKind::HeaderName`], and in
//! [`Context::UriScheme`] the words `sip`, `sips` and `tel` lex as
//! [`TokenKind::Scheme`]. Everything else falls back to generic words,
//! numbers and punctuation.
//!
//! Parsers combine the token layer with the char-level primitives
//! ([`Lexer::peek_ahead`], [`Lexer::consume`]) when a construct is defined
//! by raw character classes rather than by tokens (URI userinfo, quoted
//! strings, IPv6 literals).

use std::fmt;

use crate::error::{Error, Result};

/// Grammar symbol classes produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A known SIP method name (active in [`Context::Method`]).
    Method,
    /// A known header field name, full or compact (active in [`Context::HeaderName`]).
    HeaderName,
    /// A known URI scheme (active in [`Context::UriScheme`]).
    Scheme,
    /// A run of token characters that is not a keyword in the active context.
    Word,
    /// A run of decimal digits.
    Number,
    /// A double-quoted string; the token text carries the unescaped content.
    QuotedString,
    /// `:`
    Colon,
    /// `;`
    Semicolon,
    /// `,`
    Comma,
    /// `/`
    Slash,
    /// `@`
    At,
    /// `=`
    Equals,
    /// `<`
    LAngle,
    /// `>`
    RAngle,
    /// `*`
    Star,
    /// `?`
    Question,
    /// `&`
    Ampersand,
    /// A run of spaces and horizontal tabs.
    Whitespace,
    /// Any single character not covered above.
    Char,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Method => "method",
            TokenKind::HeaderName => "header name",
            TokenKind::Scheme => "uri scheme",
            TokenKind::Word => "word",
            TokenKind::Number => "number",
            TokenKind::QuotedString => "quoted string",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Comma => "','",
            TokenKind::Slash => "'/'",
            TokenKind::At => "'@'",
            TokenKind::Equals => "'='",
            TokenKind::LAngle => "'<'",
            TokenKind::RAngle => "'>'",
            TokenKind::Star => "'*'",
            TokenKind::Question => "'?'",
            TokenKind::Ampersand => "'&'",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Char => "character",
        };
        f.write_str(s)
    }
}

/// A single lexed token: its grammar symbol and its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Grammar symbol class.
    pub kind: TokenKind,
    /// Text value. For [`TokenKind::QuotedString`] this is the unescaped
    /// content without the surrounding quotes.
    pub text: String,
}

/// Keyword table selector.
///
/// Selecting a context is idempotent and never moves the buffer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Context {
    /// Words are checked against the SIP method table.
    Method,
    /// Words are checked against the header-name table (full and compact forms).
    HeaderName,
    /// Words are checked against the URI scheme table.
    UriScheme,
    /// No keyword table; words stay generic.
    #[default]
    Value,
}

const METHODS: &[&str] = &[
    "REGISTER", "INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "SUBSCRIBE", "NOTIFY", "PUBLISH",
    "MESSAGE", "REFER", "PRACK", "UPDATE", "INFO",
];

const HEADER_NAMES: &[&str] = &[
    "via", "v", "to", "t", "from", "f", "cseq", "call-id", "i", "contact", "m", "max-forwards",
    "route", "record-route", "expires", "min-expires", "content-type", "c", "content-length", "l",
    "event", "o", "subscription-state", "authorization", "www-authenticate", "proxy-authenticate",
    "proxy-authorization",
];

const SCHEMES: &[&str] = &["sip", "sips", "tel"];

/// Is `c` in the RFC 3261 `alphanum` class.
pub fn is_alphanum(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Is `c` a hexadecimal digit.
pub fn is_hex_digit(c: char) -> bool {
    c.is_ascii_hexdigit()
}

/// Is `c` in the RFC 3261 `mark` class.
pub fn is_mark(c: char) -> bool {
    matches!(c, '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')')
}

/// Is `c` in the RFC 3261 `token` charset (method names, parameter names,
/// event packages and the like).
pub fn is_token_char(c: char) -> bool {
    is_alphanum(c) || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '+' | '`' | '\'' | '~')
}

/// Is `c` legal inside a hostname label.
pub fn is_host_char(c: char) -> bool {
    is_alphanum(c) || c == '-' || c == '.'
}

/// Does `s` look like an IPv4 dotted-quad literal.
pub fn is_ipv4_literal(s: &str) -> bool {
    let octets: Vec<&str> = s.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|o| !o.is_empty() && o.len() <= 3 && o.chars().all(|c| c.is_ascii_digit()))
}

/// Does `s` (without brackets) look like an IPv6 literal.
pub fn is_ipv6_literal(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| is_hex_digit(c) || c == ':' || c == '.') && s.contains(':')
}

/// Tokenizer over a character buffer with a selectable keyword table.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    context: Context,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `input` in the [`Context::Value`] context.
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            pos: 0,
            context: Context::Value,
        }
    }

    /// Creates a lexer with an explicit starting context.
    pub fn with_context(input: &'a str, context: Context) -> Self {
        Lexer {
            input,
            pos: 0,
            context,
        }
    }

    /// Switches the active keyword table. Idempotent; the buffer position
    /// is untouched.
    pub fn select(&mut self, context: Context) {
        self.context = context;
    }

    /// Current byte offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True when the whole buffer has been consumed.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// The unconsumed remainder of the buffer.
    pub fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Next character without advancing, if any.
    pub fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Non-destructive lookahead `n` characters past the current position.
    /// Looking past the end of the buffer fails.
    pub fn peek_ahead(&self, n: usize) -> Result<char> {
        self.rest()
            .chars()
            .nth(n)
            .ok_or(Error::UnexpectedEndOfInput {
                position: self.input.len(),
            })
    }

    /// Consumes exactly `n` characters, returning the consumed slice.
    pub fn consume(&mut self, n: usize) -> Result<&'a str> {
        let mut end = self.pos;
        for _ in 0..n {
            match self.input[end..].chars().next() {
                Some(c) => end += c.len_utf8(),
                None => {
                    return Err(Error::UnexpectedEndOfInput {
                        position: self.input.len(),
                    })
                }
            }
        }
        let taken = &self.input[self.pos..end];
        self.pos = end;
        Ok(taken)
    }

    /// Consumes the longest prefix whose characters satisfy `pred`.
    pub fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(_, c)| !pred(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    /// Skips spaces and horizontal tabs.
    pub fn skip_ws(&mut self) {
        self.take_while(|c| c == ' ' || c == '\t');
    }

    /// Consumes `c` or fails with [`Error::UnexpectedToken`].
    pub fn expect_char(&mut self, c: char) -> Result<()> {
        match self.peek_char() {
            Some(got) if got == c => {
                self.pos += got.len_utf8();
                Ok(())
            }
            Some(got) => Err(Error::UnexpectedToken {
                expected: TokenKind::Char,
                found: got.to_string(),
                position: self.pos,
            }),
            None => Err(Error::UnexpectedEndOfInput { position: self.pos }),
        }
    }

    /// Lexes the next token and advances past it.
    pub fn next_token(&mut self) -> Result<Token> {
        let start = self.pos;
        let c = self.peek_char().ok_or(Error::UnexpectedEndOfInput {
            position: self.pos,
        })?;

        let token = match c {
            ' ' | '\t' => {
                let text = self.take_while(|c| c == ' ' || c == '\t').to_string();
                Token {
                    kind: TokenKind::Whitespace,
                    text,
                }
            }
            '"' => {
                let text = self.quoted_string()?;
                Token {
                    kind: TokenKind::QuotedString,
                    text,
                }
            }
            ':' | ';' | ',' | '/' | '@' | '=' | '<' | '>' | '*' | '?' | '&' => {
                self.pos += 1;
                Token {
                    kind: punctuation_kind(c),
                    text: c.to_string(),
                }
            }
            c if is_token_char(c) => {
                let text = self.take_while(is_token_char);
                Token {
                    kind: self.classify_word(text),
                    text: text.to_string(),
                }
            }
            other => {
                self.pos += other.len_utf8();
                Token {
                    kind: TokenKind::Char,
                    text: other.to_string(),
                }
            }
        };

        debug_assert!(self.pos > start);
        Ok(token)
    }

    /// Lexes the next token without advancing.
    pub fn peek_token(&self) -> Result<Token> {
        let mut probe = self.clone();
        probe.next_token()
    }

    /// Consumes and returns the next token only if it matches `expected`;
    /// otherwise fails with [`Error::UnexpectedToken`] carrying the
    /// offending position.
    pub fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        let position = self.pos;
        let token = self.peek_token()?;
        if token.kind == expected {
            self.next_token()
        } else {
            Err(Error::UnexpectedToken {
                expected,
                found: token.text,
                position,
            })
        }
    }

    /// Reads a double-quoted string starting at the current position,
    /// unescaping backslash pairs, and returns the content.
    pub fn quoted_string(&mut self) -> Result<String> {
        self.expect_char('"')?;
        let mut out = String::new();
        loop {
            match self.peek_char() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek_char().ok_or(Error::UnexpectedEndOfInput {
                        position: self.pos,
                    })?;
                    out.push(escaped);
                    self.pos += escaped.len_utf8();
                }
                Some(c) => {
                    out.push(c);
                    self.pos += c.len_utf8();
                }
                None => {
                    return Err(Error::UnexpectedEndOfInput { position: self.pos });
                }
            }
        }
    }

    fn classify_word(&self, word: &str) -> TokenKind {
        if !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
            return TokenKind::Number;
        }
        let keyword = match self.context {
            Context::Method => METHODS.contains(&word),
            Context::HeaderName => HEADER_NAMES.contains(&word.to_ascii_lowercase().as_str()),
            Context::UriScheme => SCHEMES.contains(&word.to_ascii_lowercase().as_str()),
            Context::Value => false,
        };
        if keyword {
            match self.context {
                Context::Method => TokenKind::Method,
                Context::HeaderName => TokenKind::HeaderName,
                Context::UriScheme => TokenKind::Scheme,
                Context::Value => TokenKind::Word,
            }
        } else {
            TokenKind::Word
        }
    }
}

fn punctuation_kind(c: char) -> TokenKind {
    match c {
        ':' => TokenKind::Colon,
        ';' => TokenKind::Semicolon,
        ',' => TokenKind::Comma,
        '/' => TokenKind::Slash,
        '@' => TokenKind::At,
        '=' => TokenKind::Equals,
        '<' => TokenKind::LAngle,
        '>' => TokenKind::RAngle,
        '*' => TokenKind::Star,
        '?' => TokenKind::Question,
        '&' => TokenKind::Ampersand,
        _ => unreachable!("not punctuation: {c}"),
    }
}
