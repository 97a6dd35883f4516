//! URI parsing: SIP/SIPS, TEL, and opaque schemes.

use crate::error::{Error, Result};
use crate::lexer::{
    is_alphanum, is_host_char, is_ipv4_literal, is_ipv6_literal, is_token_char, Context, Lexer,
    TokenKind,
};
use crate::parser::params::{parse_params, scan_delimiter};
use crate::types::{Host, Params, SipUri, TelUri, Uri};

/// Parses a complete URI. `base` is the byte offset of `s` in the
/// surrounding buffer.
///
/// Unknown schemes are carried opaquely, never rejected; a missing or
/// syntactically invalid scheme is an error.
pub fn parse_uri(s: &str, base: usize) -> Result<Uri> {
    let mut lexer = Lexer::with_context(s, Context::UriScheme);
    let token = lexer.next_token()?;
    if !matches!(token.kind, TokenKind::Scheme | TokenKind::Word | TokenKind::Number) {
        return Err(Error::parse(base, format!("invalid URI scheme {:?}", token.text)));
    }
    let scheme = token.text;
    if scheme.is_empty()
        || !scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        || !scheme.chars().all(|c| is_alphanum(c) || matches!(c, '+' | '-' | '.'))
    {
        return Err(Error::parse(base, format!("invalid URI scheme {scheme:?}")));
    }
    lexer
        .expect(TokenKind::Colon)
        .map_err(|_| Error::parse(base + lexer.position(), "URI scheme must be followed by ':'"))?;
    let rest = lexer.rest();
    let rest_base = base + lexer.position();

    match scheme.to_ascii_lowercase().as_str() {
        "sip" => parse_sip_rest(rest, rest_base, false).map(Uri::Sip),
        "sips" => parse_sip_rest(rest, rest_base, true).map(Uri::Sip),
        "tel" => parse_tel_rest(rest, rest_base).map(Uri::Tel),
        _ => Ok(Uri::Other {
            scheme,
            opaque: rest.to_string(),
        }),
    }
}

fn parse_sip_rest(s: &str, base: usize, secure: bool) -> Result<SipUri> {
    // Everything before the first top-level ';' or '?' is userinfo@hostport.
    let head_end = scan_delimiter(s, &[';', '?']).unwrap_or(s.len());
    let head = &s[..head_end];
    if head.is_empty() {
        return Err(Error::parse(base, "empty SIP URI host part"));
    }

    let (user, password, hostport, hostport_base) = match head.rfind('@') {
        Some(at) => {
            let userinfo = &head[..at];
            let (user, password) = match userinfo.find(':') {
                Some(colon) => (
                    userinfo[..colon].to_string(),
                    Some(userinfo[colon + 1..].to_string()),
                ),
                None => (userinfo.to_string(), None),
            };
            if user.is_empty() {
                return Err(Error::parse(base, "empty user part before '@'"));
            }
            (Some(user), password, &head[at + 1..], base + at + 1)
        }
        None => (None, None, head, base),
    };

    let (host, port) = parse_host_port(hostport, hostport_base)?;

    let mut params = Params::new();
    let mut headers = Vec::new();
    if head_end < s.len() {
        let tail = &s[head_end..];
        let (param_str, header_str) = match tail.strip_prefix(';') {
            Some(after) => match scan_delimiter(after, &['?']) {
                Some(q) => (&after[..q], Some(&after[q + 1..])),
                None => (after, None),
            },
            // Tail starts with '?'; headers only.
            None => ("", tail.strip_prefix('?')),
        };
        if !param_str.is_empty() {
            params = parse_params(param_str, base + head_end + 1)?;
        }
        if let Some(header_str) = header_str {
            headers = parse_uri_headers(header_str, base + head_end)?;
        }
    }

    Ok(SipUri {
        secure,
        user,
        password,
        host,
        port,
        params,
        headers,
    })
}

/// Parses `host[:port]`, accepting domain names, IPv4 literals and
/// bracketed IPv6 literals.
pub fn parse_host_port(s: &str, base: usize) -> Result<(Host, Option<u16>)> {
    if s.is_empty() {
        return Err(Error::parse(base, "empty host"));
    }
    let (host, port_str) = if let Some(rest) = s.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| Error::parse(base, "unterminated IPv6 literal"))?;
        let literal = &rest[..close];
        if !is_ipv6_literal(literal) {
            return Err(Error::parse(base, format!("invalid IPv6 literal {literal:?}")));
        }
        let after = &rest[close + 1..];
        let port_str = match after.strip_prefix(':') {
            Some(p) => Some(p),
            None if after.is_empty() => None,
            None => {
                return Err(Error::parse(base, "unexpected text after IPv6 literal"));
            }
        };
        (Host::Ipv6(literal.to_string()), port_str)
    } else {
        let (name, port_str) = match s.find(':') {
            Some(colon) => (&s[..colon], Some(&s[colon + 1..])),
            None => (s, None),
        };
        if name.is_empty() || !name.chars().all(is_host_char) {
            return Err(Error::parse(base, format!("invalid host {name:?}")));
        }
        let host = if is_ipv4_literal(name) {
            Host::Ipv4(name.to_string())
        } else {
            Host::Domain(name.to_string())
        };
        (host, port_str)
    };

    let port = match port_str {
        Some(p) => Some(p.parse::<u16>().map_err(|_| {
            Error::parse(base, format!("invalid port {p:?}"))
        })?),
        None => None,
    };
    Ok((host, port))
}

fn parse_uri_headers(s: &str, base: usize) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for piece in s.split('&') {
        if piece.is_empty() {
            continue;
        }
        let eq = piece
            .find('=')
            .ok_or_else(|| Error::parse(base, format!("URI header without '=': {piece:?}")))?;
        headers.push((piece[..eq].to_string(), piece[eq + 1..].to_string()));
    }
    Ok(headers)
}

fn parse_tel_rest(s: &str, base: usize) -> Result<TelUri> {
    let number_end = scan_delimiter(s, &[';']).unwrap_or(s.len());
    let raw_number = &s[..number_end];
    let (global, digits) = match raw_number.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, raw_number),
    };
    if digits.is_empty()
        || !digits
            .chars()
            .all(|c| c.is_ascii_hexdigit() || matches!(c, '-' | '.' | '(' | ')' | '*' | '#'))
    {
        return Err(Error::parse(
            base,
            format!("invalid telephone number {raw_number:?}"),
        ));
    }
    let params = if number_end < s.len() {
        parse_params(&s[number_end + 1..], base + number_end + 1)?
    } else {
        Params::new()
    };
    Ok(TelUri {
        number: digits.to_string(),
        global,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sip_uri() {
        let uri = parse_uri("sip:alice:secret@example.com:5061;transport=tcp?subject=hi", 0)
            .unwrap();
        let sip = uri.as_sip().unwrap();
        assert!(!sip.secure);
        assert_eq!(sip.user.as_deref(), Some("alice"));
        assert_eq!(sip.password.as_deref(), Some("secret"));
        assert_eq!(sip.host, Host::Domain("example.com".into()));
        assert_eq!(sip.port, Some(5061));
        assert_eq!(sip.params.get("transport"), Some("tcp"));
        assert_eq!(sip.headers, vec![("subject".to_string(), "hi".to_string())]);
    }

    #[test]
    fn sips_scheme_sets_secure() {
        let uri = parse_uri("sips:example.com", 0).unwrap();
        assert!(uri.as_sip().unwrap().secure);
    }

    #[test]
    fn ipv6_host() {
        let uri = parse_uri("sip:[2001:db8::1]:5060", 0).unwrap();
        let sip = uri.as_sip().unwrap();
        assert_eq!(sip.host, Host::Ipv6("2001:db8::1".into()));
        assert_eq!(sip.port, Some(5060));
    }

    #[test]
    fn tel_uri_global_and_params() {
        let uri = parse_uri("tel:+1-212-555-0123;phone-context=example.com", 0).unwrap();
        match uri {
            Uri::Tel(tel) => {
                assert!(tel.global);
                assert_eq!(tel.number, "1-212-555-0123");
                assert_eq!(tel.params.get("phone-context"), Some("example.com"));
            }
            other => panic!("not a tel uri: {other:?}"),
        }
    }

    #[test]
    fn unknown_scheme_is_opaque_not_error() {
        let uri = parse_uri("mailto:watson@bell-telephone.com", 0).unwrap();
        assert_eq!(uri.scheme(), "mailto");
        assert_eq!(uri.to_string(), "mailto:watson@bell-telephone.com");
    }

    #[test]
    fn duplicate_uri_parameter_is_fatal() {
        assert!(parse_uri("sip:example.com;transport=udp;transport=tcp", 0).is_err());
    }

    #[test]
    fn missing_scheme_colon_is_error() {
        assert!(parse_uri("example.com", 0).is_err());
    }

    #[test]
    fn bad_port_is_error() {
        assert!(parse_uri("sip:example.com:99999", 0).is_err());
    }
}
