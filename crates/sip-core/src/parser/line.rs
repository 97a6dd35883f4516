//! Request-line and status-line parsing.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::lexer::{Context, Lexer, TokenKind};
use crate::parser::uri::parse_uri;
use crate::types::{Method, StatusCode, Uri};

/// The only protocol version this stack speaks.
pub const SIP_VERSION: &str = "SIP/2.0";

/// Parses `Method SP Request-URI SP SIP/2.0`.
pub fn parse_request_line(line: &str, base: usize) -> Result<(Method, Uri)> {
    let mut lexer = Lexer::with_context(line, Context::Method);
    let token = lexer.next_token()?;
    if !matches!(token.kind, TokenKind::Method | TokenKind::Word) {
        return Err(Error::parse(base, format!("invalid method {:?}", token.text)));
    }
    let method = Method::from_str(&token.text)
        .map_err(|_| Error::parse(base, format!("invalid method {:?}", token.text)))?;

    lexer.expect(TokenKind::Whitespace)?;
    let uri_base = base + lexer.position();
    let uri_text = lexer.take_while(|c| c != ' ' && c != '\t');
    if uri_text.is_empty() {
        return Err(Error::parse(uri_base, "request line missing Request-URI"));
    }
    let uri = parse_uri(uri_text, uri_base)?;

    lexer.expect(TokenKind::Whitespace)?;
    let version = lexer.rest().trim_end();
    if version != SIP_VERSION {
        return Err(Error::parse(
            base + lexer.position(),
            format!("unsupported SIP version {version:?}"),
        ));
    }
    Ok((method, uri))
}

/// Parses `SIP/2.0 SP 3-digit-code SP reason-phrase`.
pub fn parse_status_line(line: &str, base: usize) -> Result<(StatusCode, String)> {
    let rest = line.strip_prefix(SIP_VERSION).ok_or_else(|| {
        Error::parse(base, format!("status line must start with {SIP_VERSION}"))
    })?;
    let rest = rest.strip_prefix(' ').ok_or_else(|| {
        Error::parse(base + SIP_VERSION.len(), "missing space after SIP version")
    })?;

    let code_text: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if code_text.len() != 3 {
        return Err(Error::parse(
            base + SIP_VERSION.len() + 1,
            format!("status code must be three digits, got {code_text:?}"),
        ));
    }
    let code: u16 = code_text
        .parse()
        .map_err(|_| Error::parse(base, "unparseable status code"))?;

    let after_code = &rest[code_text.len()..];
    let reason = match after_code.strip_prefix(' ') {
        Some(r) => r.to_string(),
        None if after_code.is_empty() => String::new(),
        None => {
            return Err(Error::parse(
                base + SIP_VERSION.len() + 1 + code_text.len(),
                "missing space before reason phrase",
            ));
        }
    };
    Ok((StatusCode(code), reason))
}

/// The "starts with SIP-version token" heuristic that separates responses
/// from requests.
pub fn is_status_line(line: &str) -> bool {
    line.starts_with("SIP/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line() {
        let (method, uri) = parse_request_line("REGISTER sip:example.com SIP/2.0", 0).unwrap();
        assert_eq!(method, Method::Register);
        assert_eq!(uri.to_string(), "sip:example.com");
    }

    #[test]
    fn request_line_extension_method() {
        let (method, _) = parse_request_line("PING sip:example.com SIP/2.0", 0).unwrap();
        assert_eq!(method, Method::Other("PING".into()));
    }

    #[test]
    fn request_line_bad_version() {
        assert!(parse_request_line("INVITE sip:a@b SIP/3.0", 0).is_err());
        assert!(parse_request_line("INVITE sip:a@b", 0).is_err());
    }

    #[test]
    fn status_line() {
        let (code, reason) = parse_status_line("SIP/2.0 180 Ringing", 0).unwrap();
        assert_eq!(code, StatusCode(180));
        assert_eq!(reason, "Ringing");
    }

    #[test]
    fn status_line_empty_reason() {
        let (code, reason) = parse_status_line("SIP/2.0 200", 0).unwrap();
        assert_eq!(code, StatusCode::OK);
        assert_eq!(reason, "");
    }

    #[test]
    fn status_line_multi_word_reason() {
        let (_, reason) = parse_status_line("SIP/2.0 404 Not Found", 0).unwrap();
        assert_eq!(reason, "Not Found");
    }

    #[test]
    fn status_code_must_be_three_digits() {
        assert!(parse_status_line("SIP/2.0 20 OK", 0).is_err());
        assert!(parse_status_line("SIP/2.0 2000 OK", 0).is_err());
    }

    #[test]
    fn heuristic() {
        assert!(is_status_line("SIP/2.0 200 OK"));
        assert!(!is_status_line("INVITE sip:a@b SIP/2.0"));
    }
}
