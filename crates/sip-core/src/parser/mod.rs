//! Top-level SIP message parsing.
//!
//! Raw bytes come in, a [`Message`] comes out. The assembly is tolerant by
//! default: a malformed header line does not abort the whole message but is
//! routed through a pluggable recovery policy, because real peers routinely
//! send slightly non-conforming extension headers. Singleton-header
//! violations and body-length lies are structural and always fatal.

pub mod address;
pub mod headers;
pub mod line;
pub mod params;
pub mod uri;

use std::str::FromStr;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Header, HeaderName, Headers, Message, Request, Response};

pub use address::{parse_address, parse_address_list};
pub use headers::{parse_auth, parse_header, parse_via};
pub use line::{is_status_line, parse_request_line, parse_status_line, SIP_VERSION};
pub use params::{parse_params, scan_delimiter, split_top_level};
pub use uri::parse_uri;

/// A malformed header line, as handed to the recovery policy.
#[derive(Debug)]
pub struct HeaderIssue<'a> {
    /// Raw header name.
    pub name: &'a str,
    /// Raw header value.
    pub value: &'a str,
    /// The parse failure.
    pub error: Error,
}

/// What to do with a malformed header line.
#[derive(Debug)]
pub enum HeaderRecovery {
    /// Fail the whole message with the header's error.
    Abort,
    /// Drop the header line.
    Skip,
    /// Keep a caller-supplied header in its place.
    Substitute(Header),
}

/// Parses a message with the default recovery policy: each malformed
/// header is downgraded to a raw extension header.
pub fn parse_message(input: &[u8]) -> Result<Message> {
    parse_message_with_policy(input, &mut |issue: &HeaderIssue<'_>| {
        debug!(
            name = issue.name,
            error = %issue.error,
            "malformed header downgraded to extension"
        );
        HeaderRecovery::Substitute(Header::Extension {
            name: issue.name.to_string(),
            value: issue.value.to_string(),
        })
    })
}

/// Parses a message, consulting `policy` for every malformed header line.
pub fn parse_message_with_policy(
    input: &[u8],
    policy: &mut dyn FnMut(&HeaderIssue<'_>) -> HeaderRecovery,
) -> Result<Message> {
    let (head_end, body_start) = head_body_split(input);
    let head = std::str::from_utf8(&input[..head_end])
        .map_err(|e| Error::parse(e.valid_up_to(), "message head is not valid UTF-8"))?;

    let lines = unfold_lines(head);
    let mut iter = lines.into_iter();
    let (first_offset, first_line) = iter
        .next()
        .ok_or_else(|| Error::parse(0, "empty message"))?;

    let mut headers = Headers::new();
    let mut seen_singletons: Vec<HeaderName> = Vec::new();

    for (offset, logical_line) in iter {
        if logical_line.is_empty() {
            continue;
        }
        let colon = logical_line.find(':').ok_or_else(|| {
            Error::parse(offset, format!("header line without ':': {logical_line:?}"))
        })?;
        let name = logical_line[..colon].trim();
        let value = logical_line[colon + 1..].trim();
        let value_offset = offset + colon + 1;

        // Singleton enforcement is structural; it happens on the name and
        // is never softened by the recovery policy.
        if let Ok(header_name) = HeaderName::from_str(name) {
            if header_name.is_singleton() {
                if seen_singletons.contains(&header_name) {
                    return Err(Error::parse(
                        offset,
                        format!("duplicate {header_name} header"),
                    ));
                }
                seen_singletons.push(header_name);
            }
        }

        match headers::parse_header(name, value, value_offset) {
            Ok(header) => headers.push(header),
            Err(error) => {
                let issue = HeaderIssue { name, value, error };
                match policy(&issue) {
                    HeaderRecovery::Abort => return Err(issue.error),
                    HeaderRecovery::Skip => continue,
                    HeaderRecovery::Substitute(header) => headers.push(header),
                }
            }
        }
    }

    let body = extract_body(input, body_start, &headers)?;

    if line::is_status_line(&first_line) {
        let (status, reason) = line::parse_status_line(&first_line, first_offset)?;
        Ok(Message::Response(Response {
            status,
            reason,
            headers,
            body,
        }))
    } else {
        let (method, uri) = line::parse_request_line(&first_line, first_offset)?;
        Ok(Message::Request(Request {
            method,
            uri,
            headers,
            body,
        }))
    }
}

/// Parses a message that must be a request.
pub fn parse_request(input: &[u8]) -> Result<Request> {
    match parse_message(input)? {
        Message::Request(req) => Ok(req),
        Message::Response(_) => Err(Error::parse(0, "expected a request, got a response")),
    }
}

/// Parses a message that must be a response.
pub fn parse_response(input: &[u8]) -> Result<Response> {
    match parse_message(input)? {
        Message::Response(resp) => Ok(resp),
        Message::Request(_) => Err(Error::parse(0, "expected a response, got a request")),
    }
}

/// Locates the blank line separating head from body. Accepts `\r\n` and
/// bare `\n` terminators, in any mixture. Returns
/// `(head_end, body_start)`; with no blank line the whole input is head.
fn head_body_split(input: &[u8]) -> (usize, usize) {
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'\n' {
            let j = i + 1;
            if j < input.len() && input[j] == b'\n' {
                return (i, j + 1);
            }
            if j + 1 < input.len() && input[j] == b'\r' && input[j + 1] == b'\n' {
                return (i, j + 2);
            }
        }
        i += 1;
    }
    (input.len(), input.len())
}

/// Splits the head into logical lines, joining folded continuation lines
/// (leading SP/HT) with a single space. Each logical line keeps the byte
/// offset of its first physical line.
fn unfold_lines(head: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    let mut offset = 0usize;
    for raw in head.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let starts_folded = line.starts_with(' ') || line.starts_with('\t');
        match lines.last_mut() {
            Some((_, prev)) if starts_folded && !prev.is_empty() => {
                prev.push(' ');
                prev.push_str(line.trim_start());
            }
            _ => lines.push((offset, line.to_string())),
        }
        offset += raw.len() + 1;
    }
    // A trailing terminator yields one empty artifact line.
    if matches!(lines.last(), Some((_, l)) if l.is_empty()) {
        lines.pop();
    }
    lines
}

fn extract_body(input: &[u8], body_start: usize, headers: &Headers) -> Result<Bytes> {
    let available = &input[body_start.min(input.len())..];
    match headers.content_length() {
        Some(declared) => {
            let declared = declared as usize;
            if declared > available.len() {
                return Err(Error::parse(
                    body_start,
                    format!(
                        "Content-Length {declared} exceeds available body ({} bytes)",
                        available.len()
                    ),
                ));
            }
            Ok(Bytes::copy_from_slice(&available[..declared]))
        }
        None => Ok(Bytes::copy_from_slice(available)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Method;

    const REGISTER: &str = "REGISTER sip:example.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bK1\r\n\
        From: <sip:alice@example.com>;tag=abc\r\n\
        To: <sip:alice@example.com>\r\n\
        Call-ID: 1@127.0.0.1\r\n\
        CSeq: 1 REGISTER\r\n\
        Max-Forwards: 70\r\n\
        Content-Length: 0\r\n\r\n";

    #[test]
    fn parses_the_reference_register() {
        let msg = parse_message(REGISTER.as_bytes()).unwrap();
        let req = msg.as_request().expect("a request");
        assert_eq!(req.method, Method::Register);
        assert_eq!(req.headers.len(), 7);
        assert!(req.body.is_empty());
        assert_eq!(req.headers.cseq().unwrap().0, 1);
        assert_eq!(req.headers.from_addr().unwrap().tag(), Some("abc"));
    }

    #[test]
    fn accepts_bare_lf_terminators() {
        let text = REGISTER.replace("\r\n", "\n");
        let msg = parse_message(text.as_bytes()).unwrap();
        assert!(msg.as_request().is_some());
    }

    #[test]
    fn unfolds_continuation_lines() {
        let text = "INVITE sip:b@example.com SIP/2.0\r\n\
            Via: SIP/2.0/UDP a.example.com\r\n\
            From: <sip:a@example.com>;tag=1\r\n\
            To: <sip:b@example.com>\r\n\
            Call-ID: x\r\n\
            CSeq: 1 INVITE\r\n\
            Subject: I know you're\r\n there\r\n\r\n";
        let msg = parse_message(text.as_bytes()).unwrap();
        let headers = msg.headers();
        let subject = headers
            .get(&HeaderName::Other("Subject".into()))
            .unwrap()
            .to_string();
        assert_eq!(subject, "Subject: I know you're there");
    }

    #[test]
    fn duplicate_singleton_is_fatal_even_with_lenient_policy() {
        let text = "OPTIONS sip:b SIP/2.0\r\nTo: <sip:b@x.com>\r\nTo: <sip:c@x.com>\r\n\r\n";
        let err = parse_message(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate To"));
    }

    #[test]
    fn malformed_header_substituted_by_default() {
        let text = "OPTIONS sip:b@x.com SIP/2.0\r\nExpires: not-a-number\r\n\r\n";
        let msg = parse_message(text.as_bytes()).unwrap();
        let h = msg.headers().get(&HeaderName::Other("Expires".into()));
        assert!(
            matches!(h, Some(Header::Extension { value, .. }) if value == "not-a-number"),
            "got {h:?}"
        );
    }

    #[test]
    fn abort_policy_propagates_the_header_error() {
        let text = "OPTIONS sip:b@x.com SIP/2.0\r\nExpires: not-a-number\r\n\r\n";
        let err = parse_message_with_policy(text.as_bytes(), &mut |_| HeaderRecovery::Abort)
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn skip_policy_drops_the_header() {
        let text = "OPTIONS sip:b@x.com SIP/2.0\r\nExpires: not-a-number\r\n\r\n";
        let msg =
            parse_message_with_policy(text.as_bytes(), &mut |_| HeaderRecovery::Skip).unwrap();
        assert!(msg
            .headers()
            .get(&HeaderName::Other("Expires".into()))
            .is_none());
    }

    #[test]
    fn body_respects_content_length() {
        let text = "MESSAGE sip:b@x.com SIP/2.0\r\nContent-Length: 5\r\n\r\nhelloEXTRA";
        let msg = parse_message(text.as_bytes()).unwrap();
        assert_eq!(&msg.as_request().unwrap().body[..], b"hello");
    }

    #[test]
    fn content_length_beyond_buffer_is_fatal() {
        let text = "MESSAGE sip:b@x.com SIP/2.0\r\nContent-Length: 50\r\n\r\nshort";
        assert!(parse_message(text.as_bytes()).is_err());
    }

    #[test]
    fn response_parses() {
        let text = "SIP/2.0 180 Ringing\r\nTo: <sip:b@x.com>;tag=z\r\nCSeq: 1 INVITE\r\n\r\n";
        let resp = parse_response(text.as_bytes()).unwrap();
        assert!(resp.status.is_provisional());
        assert_eq!(resp.headers.to_addr().unwrap().tag(), Some("z"));
    }

    #[test]
    fn round_trip_is_header_set_equivalent() {
        let msg = parse_message(REGISTER.as_bytes()).unwrap();
        let rendered = msg.to_string();
        let reparsed = parse_message(rendered.as_bytes()).unwrap();
        assert_eq!(msg, reparsed);
    }
}
