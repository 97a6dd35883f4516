//! Per-header parsers and the name-keyed factory.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::lexer::{is_token_char, Context, Lexer, TokenKind};
use crate::parser::address::{parse_address, parse_address_list};
use crate::parser::params::{parse_params, scan_delimiter, split_top_level};
use crate::parser::uri::parse_host_port;
use crate::types::{Auth, Header, HeaderName, MediaType, Method, TokenParams, ViaHop};

/// Parses one header line's value into a typed [`Header`].
///
/// `name` is the raw header name (full or compact); `value` the unfolded
/// text after the colon; `base` the byte offset of `value` in the message
/// buffer. Unknown names come back as [`Header::Extension`] untouched.
pub fn parse_header(name: &str, value: &str, base: usize) -> Result<Header> {
    let header_name = HeaderName::from_str(name).map_err(|_| {
        Error::parse(base, format!("invalid header name {name:?}"))
    })?;
    let value = value.trim();
    match header_name {
        HeaderName::Via => Ok(Header::Via(parse_via(value, base)?)),
        HeaderName::To => Ok(Header::To(parse_address(value, base)?)),
        HeaderName::From => Ok(Header::From(parse_address(value, base)?)),
        HeaderName::CSeq => parse_cseq(value, base),
        HeaderName::CallId => parse_call_id(value, base),
        HeaderName::Contact => Ok(Header::Contact(parse_address_list(value, base)?)),
        HeaderName::MaxForwards => Ok(Header::MaxForwards(parse_uint(value, base)?)),
        HeaderName::Route => Ok(Header::Route(parse_address_list(value, base)?)),
        HeaderName::RecordRoute => Ok(Header::RecordRoute(parse_address_list(value, base)?)),
        HeaderName::Expires => Ok(Header::Expires(parse_uint(value, base)?)),
        HeaderName::MinExpires => Ok(Header::MinExpires(parse_uint(value, base)?)),
        HeaderName::ContentType => Ok(Header::ContentType(parse_media_type(value, base)?)),
        HeaderName::ContentLength => Ok(Header::ContentLength(parse_uint(value, base)?)),
        HeaderName::Event => Ok(Header::Event(parse_token_params(value, base)?)),
        HeaderName::SubscriptionState => {
            Ok(Header::SubscriptionState(parse_token_params(value, base)?))
        }
        HeaderName::Authorization => Ok(Header::Authorization(parse_auth(value, base)?)),
        HeaderName::WwwAuthenticate => Ok(Header::WwwAuthenticate(parse_auth(value, base)?)),
        HeaderName::ProxyAuthenticate => Ok(Header::ProxyAuthenticate(parse_auth(value, base)?)),
        HeaderName::ProxyAuthorization => {
            Ok(Header::ProxyAuthorization(parse_auth(value, base)?))
        }
        HeaderName::Other(name) => Ok(Header::Extension {
            name,
            value: value.to_string(),
        }),
    }
}

/// Parses a Via value: one or more comma-separated hops.
pub fn parse_via(value: &str, base: usize) -> Result<Vec<ViaHop>> {
    let mut hops = Vec::new();
    let mut offset = 0usize;
    for piece in split_top_level(value, ',') {
        hops.push(parse_via_hop(piece.trim(), base + offset)?);
        offset += piece.len() + 1;
    }
    if hops.is_empty() {
        return Err(Error::parse(base, "empty Via header"));
    }
    Ok(hops)
}

fn parse_via_hop(s: &str, base: usize) -> Result<ViaHop> {
    let mut lexer = Lexer::new(s);
    let protocol = lexer.expect(TokenKind::Word)?.text;
    lexer.expect(TokenKind::Slash)?;
    let version = word_or_number(&mut lexer)?;
    lexer.expect(TokenKind::Slash)?;
    let transport = lexer.expect(TokenKind::Word)?.text;
    lexer.expect(TokenKind::Whitespace)?;
    lexer.skip_ws();

    // sent-by runs to the first ';' (params) or '(' (comment) or end.
    let rest = lexer.rest();
    let rest_base = base + lexer.position();
    let sent_by_end = rest
        .char_indices()
        .find(|(_, c)| matches!(c, ';' | '(' | ' ' | '\t'))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let (host, port) = parse_host_port(rest[..sent_by_end].trim(), rest_base)?;

    // Anything after sent-by: parameters interleaved with at most one
    // parenthetical comment (kept tolerant, comment discarded).
    let mut tail = rest[sent_by_end..].trim_start();
    let mut tail_base = rest_base + sent_by_end;
    let mut param_text = String::new();
    while !tail.is_empty() {
        if let Some(after) = tail.strip_prefix('(') {
            let consumed = skip_comment(after, tail_base)?;
            tail = after[consumed..].trim_start();
            tail_base += 1 + consumed;
        } else if let Some(after) = tail.strip_prefix(';') {
            let end = after
                .char_indices()
                .find(|(_, c)| *c == '(')
                .map(|(i, _)| i)
                .unwrap_or(after.len());
            if !param_text.is_empty() {
                param_text.push(';');
            }
            param_text.push_str(after[..end].trim_end());
            tail = after[end..].trim_start();
            tail_base += 1 + end;
        } else {
            return Err(Error::parse(
                tail_base,
                format!("unexpected text in Via: {tail:?}"),
            ));
        }
    }
    let params = if param_text.is_empty() {
        crate::types::Params::new()
    } else {
        parse_params(&param_text, rest_base + sent_by_end)?
    };

    Ok(ViaHop {
        protocol,
        version,
        transport,
        host,
        port,
        params,
    })
}

/// Skips a parenthetical comment body (opening paren already consumed),
/// honoring backslash escapes and nesting. Returns the number of bytes
/// consumed including the closing paren.
fn skip_comment(s: &str, base: usize) -> Result<usize> {
    let mut depth = 1usize;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
    }
    Err(Error::parse(base, "unterminated comment in Via"))
}

fn word_or_number(lexer: &mut Lexer<'_>) -> Result<String> {
    // "2.0" lexes as a single token-char word; "2" alone as a number.
    let token = lexer.next_token()?;
    match token.kind {
        TokenKind::Word | TokenKind::Number => Ok(token.text),
        _ => Err(Error::UnexpectedToken {
            expected: TokenKind::Word,
            found: token.text,
            position: lexer.position(),
        }),
    }
}

fn parse_cseq(value: &str, base: usize) -> Result<Header> {
    let mut lexer = Lexer::new(value);
    let seq_token = lexer.expect(TokenKind::Number)?;
    let seq: u32 = seq_token.text.parse().map_err(|_| {
        Error::parse(base, format!("CSeq number out of range: {}", seq_token.text))
    })?;
    lexer.expect(TokenKind::Whitespace)?;
    lexer.select(Context::Method);
    let method_token = lexer.next_token()?;
    if !matches!(method_token.kind, TokenKind::Method | TokenKind::Word) {
        return Err(Error::parse(base, "CSeq missing method"));
    }
    if !lexer.rest().trim().is_empty() {
        return Err(Error::parse(base, "trailing text after CSeq"));
    }
    let method = Method::from_str(&method_token.text)
        .map_err(|_| Error::parse(base, format!("invalid CSeq method {:?}", method_token.text)))?;
    Ok(Header::CSeq { seq, method })
}

fn parse_call_id(value: &str, base: usize) -> Result<Header> {
    if value.is_empty() || value.contains(char::is_whitespace) {
        return Err(Error::parse(base, format!("invalid Call-ID {value:?}")));
    }
    Ok(Header::CallId(value.to_string()))
}

/// Parses a non-negative integer header value.
pub fn parse_uint<T: FromStr>(value: &str, base: usize) -> Result<T> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::parse(
            base,
            format!("expected non-negative integer, got {value:?}"),
        ));
    }
    value
        .parse()
        .map_err(|_| Error::parse(base, format!("integer out of range: {value:?}")))
}

fn parse_media_type(value: &str, base: usize) -> Result<MediaType> {
    let mut lexer = Lexer::new(value);
    let type_ = lexer.expect(TokenKind::Word)?.text;
    lexer.expect(TokenKind::Slash)?;
    let subtype = lexer.expect(TokenKind::Word)?.text;
    lexer.skip_ws();
    let params = match lexer.peek_char() {
        None => crate::types::Params::new(),
        Some(';') => {
            lexer.consume(1)?;
            parse_params(lexer.rest(), base + lexer.position())?
        }
        Some(c) => {
            return Err(Error::parse(
                base + lexer.position(),
                format!("unexpected {c:?} in Content-Type"),
            ));
        }
    };
    Ok(MediaType {
        type_,
        subtype,
        params,
    })
}

fn parse_token_params(value: &str, base: usize) -> Result<TokenParams> {
    let token_end = scan_delimiter(value, &[';']).unwrap_or(value.len());
    let token = value[..token_end].trim();
    if token.is_empty() || !token.chars().all(|c| is_token_char(c) || c == '.') {
        return Err(Error::parse(base, format!("invalid token {token:?}")));
    }
    let params = if token_end < value.len() {
        parse_params(&value[token_end + 1..], base + token_end + 1)?
    } else {
        crate::types::Params::new()
    };
    Ok(TokenParams {
        value: token.to_string(),
        params,
    })
}

/// Parses a challenge or credentials value: `Scheme name=value, ...`.
///
/// Parameter values may be quoted; a duplicate parameter name is a fatal
/// error, matching the rule for every other parameter list.
pub fn parse_auth(value: &str, base: usize) -> Result<Auth> {
    let mut lexer = Lexer::new(value);
    let scheme = lexer.expect(TokenKind::Word)?.text;
    lexer.expect(TokenKind::Whitespace)?;
    let mut auth = Auth::new(scheme);
    let rest = lexer.rest();
    let rest_base = base + lexer.position();
    let mut offset = 0usize;
    for piece in split_top_level(rest, ',') {
        let piece_base = rest_base + offset;
        offset += piece.len() + 1;
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        let eq = scan_delimiter(trimmed, &['=']).ok_or_else(|| {
            Error::parse(piece_base, format!("auth parameter without '=': {trimmed:?}"))
        })?;
        let name = trimmed[..eq].trim();
        if name.is_empty() || !name.chars().all(is_token_char) {
            return Err(Error::parse(
                piece_base,
                format!("invalid auth parameter name {name:?}"),
            ));
        }
        if auth.get(name).is_some() {
            return Err(Error::parse(
                piece_base,
                format!("duplicate auth parameter {name:?}"),
            ));
        }
        let raw_value = trimmed[eq + 1..].trim();
        if raw_value.starts_with('"') {
            let mut vlexer = Lexer::new(raw_value);
            let unquoted = vlexer.quoted_string()?;
            if !vlexer.rest().trim().is_empty() {
                return Err(Error::parse(piece_base, "trailing text after quoted value"));
            }
            auth.push(name, unquoted, true);
        } else {
            auth.push(name, raw_value, false);
        }
    }
    if auth.params.is_empty() {
        return Err(Error::parse(base, "auth header without parameters"));
    }
    Ok(auth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Host;

    #[test]
    fn factory_dispatches_compact_names() {
        let h = parse_header("i", "1@127.0.0.1", 0).unwrap();
        assert_eq!(h, Header::CallId("1@127.0.0.1".into()));
        let h = parse_header("l", "0", 0).unwrap();
        assert_eq!(h, Header::ContentLength(0));
    }

    #[test]
    fn unknown_header_becomes_extension() {
        let h = parse_header("X-Custom", "anything; at=all", 0).unwrap();
        assert_eq!(
            h,
            Header::Extension {
                name: "X-Custom".into(),
                value: "anything; at=all".into()
            }
        );
    }

    #[test]
    fn via_with_branch_and_rport() {
        let hops = parse_via("SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bK1;rport", 0).unwrap();
        assert_eq!(hops.len(), 1);
        let hop = &hops[0];
        assert_eq!(hop.transport, "UDP");
        assert_eq!(hop.host, Host::Ipv4("127.0.0.1".into()));
        assert_eq!(hop.port, Some(5060));
        assert_eq!(hop.branch(), Some("z9hG4bK1"));
        assert!(hop.params.contains("rport"));
    }

    #[test]
    fn via_comment_with_escapes_is_discarded() {
        let hops = parse_via(
            r#"SIP/2.0/TCP host.example.com (behind \(NAT\));branch=z9hG4bK2"#,
            0,
        )
        .unwrap();
        assert_eq!(hops[0].branch(), Some("z9hG4bK2"));
        assert_eq!(hops[0].host, Host::Domain("host.example.com".into()));
    }

    #[test]
    fn via_multiple_hops() {
        let hops =
            parse_via("SIP/2.0/UDP a.example.com;branch=1, SIP/2.0/TCP b.example.com;branch=2", 0)
                .unwrap();
        assert_eq!(hops.len(), 2);
    }

    #[test]
    fn cseq_parses_number_and_method() {
        let h = parse_header("CSeq", "42 INVITE", 0).unwrap();
        assert_eq!(
            h,
            Header::CSeq {
                seq: 42,
                method: Method::Invite
            }
        );
        assert!(parse_header("CSeq", "INVITE 42", 0).is_err());
    }

    #[test]
    fn content_type_with_params() {
        let h = parse_header("Content-Type", "application/sdp;charset=utf-8", 0).unwrap();
        match h {
            Header::ContentType(mt) => {
                assert_eq!(mt.type_, "application");
                assert_eq!(mt.subtype, "sdp");
                assert_eq!(mt.params.get("charset"), Some("utf-8"));
            }
            other => panic!("wrong header: {other:?}"),
        }
    }

    #[test]
    fn subscription_state_terminated() {
        let h = parse_header("Subscription-State", "terminated;reason=timeout", 0).unwrap();
        match h {
            Header::SubscriptionState(tp) => {
                assert!(tp.is_terminated());
                assert_eq!(tp.params.get("reason"), Some("timeout"));
            }
            other => panic!("wrong header: {other:?}"),
        }
    }

    #[test]
    fn www_authenticate_digest_challenge() {
        let h = parse_header(
            "WWW-Authenticate",
            r#"Digest realm="example.com", nonce="abc123", qop="auth", algorithm=MD5"#,
            0,
        )
        .unwrap();
        match h {
            Header::WwwAuthenticate(auth) => {
                assert_eq!(auth.scheme, "Digest");
                assert_eq!(auth.get("realm"), Some("example.com"));
                assert_eq!(auth.get("nonce"), Some("abc123"));
                assert_eq!(auth.get("algorithm"), Some("MD5"));
            }
            other => panic!("wrong header: {other:?}"),
        }
    }

    #[test]
    fn duplicate_auth_parameter_is_fatal() {
        assert!(parse_auth(r#"Digest realm="a", realm="b""#, 0).is_err());
    }

    #[test]
    fn negative_or_garbage_integers_rejected() {
        assert!(parse_header("Expires", "-1", 0).is_err());
        assert!(parse_header("Content-Length", "12ab", 0).is_err());
        assert!(parse_header("Max-Forwards", "", 0).is_err());
    }
}
