//! Requests, responses and the ordered header list.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::address::Address;
use crate::types::header::{Header, ViaHop};
use crate::types::header_name::HeaderName;
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

/// An insertion-ordered list of headers.
///
/// Order is preserved both across names and within a name (topmost value
/// of a repeated header = first added). Singleton enforcement happens in
/// the message parser; the list itself accepts whatever it is given so
/// builders can stage intermediate states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// An empty header list.
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no headers are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a header at the end.
    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// The first header with `name`.
    pub fn get(&self, name: &HeaderName) -> Option<&Header> {
        self.0.iter().find(|h| &h.name() == name)
    }

    /// All headers with `name`, topmost first.
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a Header> {
        self.0.iter().filter(move |h| &h.name() == name)
    }

    /// Replaces the first header with the same name (removing any other
    /// occurrences), or appends when absent.
    pub fn set(&mut self, header: Header) {
        let name = header.name();
        match self.0.iter().position(|h| h.name() == name) {
            Some(idx) => {
                self.0[idx] = header;
                let mut i = idx + 1;
                while i < self.0.len() {
                    if self.0[i].name() == name {
                        self.0.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.0.push(header),
        }
    }

    /// Removes every header with `name`, returning how many were removed.
    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.0.len();
        self.0.retain(|h| &h.name() != name);
        before - self.0.len()
    }

    /// Iterates headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    /// Mutable iteration, for in-place header rewrites.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Header> {
        self.0.iter_mut()
    }

    // Typed accessors for the headers the state machines consult.

    /// The CSeq header, as `(sequence, method)`.
    pub fn cseq(&self) -> Option<(u32, &Method)> {
        match self.get(&HeaderName::CSeq) {
            Some(Header::CSeq { seq, method }) => Some((*seq, method)),
            _ => None,
        }
    }

    /// The Call-ID value.
    pub fn call_id(&self) -> Option<&str> {
        match self.get(&HeaderName::CallId) {
            Some(Header::CallId(id)) => Some(id),
            _ => None,
        }
    }

    /// The From address.
    pub fn from_addr(&self) -> Option<&Address> {
        match self.get(&HeaderName::From) {
            Some(Header::From(addr)) => Some(addr),
            _ => None,
        }
    }

    /// The To address.
    pub fn to_addr(&self) -> Option<&Address> {
        match self.get(&HeaderName::To) {
            Some(Header::To(addr)) => Some(addr),
            _ => None,
        }
    }

    /// The topmost Via hop.
    pub fn via_top(&self) -> Option<&ViaHop> {
        match self.get(&HeaderName::Via) {
            Some(Header::Via(hops)) => hops.first(),
            _ => None,
        }
    }

    /// Every Contact address across all Contact header lines.
    pub fn contacts(&self) -> impl Iterator<Item = &Address> {
        self.0
            .iter()
            .filter_map(|h| match h {
                Header::Contact(addrs) => Some(addrs.iter()),
                _ => None,
            })
            .flatten()
    }

    /// The Expires header value in seconds.
    pub fn expires(&self) -> Option<u32> {
        match self.get(&HeaderName::Expires) {
            Some(Header::Expires(n)) => Some(*n),
            _ => None,
        }
    }

    /// The declared Content-Length, if present.
    pub fn content_length(&self) -> Option<u64> {
        match self.get(&HeaderName::ContentLength) {
            Some(Header::ContentLength(n)) => Some(*n),
            _ => None,
        }
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for header in &self.0 {
            write!(f, "{header}\r\n")?;
        }
        Ok(())
    }
}

/// A SIP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Request-URI.
    pub uri: Uri,
    /// Header list in wire order.
    pub headers: Headers,
    /// Body bytes; empty when the message has no body.
    #[serde(skip)]
    pub body: Bytes,
}

impl Request {
    /// A bodyless request for `method` targeting `uri`.
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n{}\r\n", self.method, self.uri, self.headers)?;
        if !self.body.is_empty() {
            f.write_str(&String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}

/// A SIP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Status code.
    pub status: StatusCode,
    /// Reason phrase as received or built.
    pub reason: String,
    /// Header list in wire order.
    pub headers: Headers,
    /// Body bytes.
    #[serde(skip)]
    pub body: Bytes,
}

impl Response {
    /// A bodyless response with the default reason phrase for `status`.
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SIP/2.0 {} {}\r\n{}\r\n",
            self.status, self.reason, self.headers
        )?;
        if !self.body.is_empty() {
            f.write_str(&String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}

/// Either kind of SIP message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// A request.
    Request(Request),
    /// A response.
    Response(Response),
}

impl Message {
    /// The header list of either kind.
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }

    /// The request form, if this is a request.
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    /// The response form, if this is a response.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(r) => Some(r),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => r.fmt(f),
            Message::Response(r) => r.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::uri::{Host, SipUri};

    fn sip_uri(host: &str) -> Uri {
        Uri::Sip(SipUri::new(Host::Domain(host.into())))
    }

    #[test]
    fn per_name_order_topmost_first() {
        let mut headers = Headers::new();
        headers.push(Header::Extension {
            name: "X-A".into(),
            value: "first".into(),
        });
        headers.push(Header::Extension {
            name: "X-A".into(),
            value: "second".into(),
        });
        let name = HeaderName::Other("X-A".into());
        let values: Vec<String> = headers.get_all(&name).map(|h| h.to_string()).collect();
        assert_eq!(values, vec!["X-A: first", "X-A: second"]);
    }

    #[test]
    fn set_replaces_first_and_drops_rest() {
        let mut headers = Headers::new();
        headers.push(Header::Expires(60));
        headers.push(Header::CallId("x".into()));
        headers.push(Header::Expires(120));
        headers.set(Header::Expires(30));
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.expires(), Some(30));
    }

    #[test]
    fn request_renders_with_blank_line() {
        let mut req = Request::new(Method::Register, sip_uri("example.com"));
        req.headers.push(Header::MaxForwards(70));
        assert_eq!(
            req.to_string(),
            "REGISTER sip:example.com SIP/2.0\r\nMax-Forwards: 70\r\n\r\n"
        );
    }

    #[test]
    fn response_carries_reason() {
        let resp = Response::new(StatusCode::OK);
        assert!(resp.to_string().starts_with("SIP/2.0 200 OK\r\n"));
    }
}
