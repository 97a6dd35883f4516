//! SIP header field names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A SIP header field name.
///
/// Header names are case-insensitive on the wire; this enum preserves the
/// canonical capitalization for the headers the stack parses and routes
/// everything else through [`HeaderName::Other`]. Compact single-letter
/// forms resolve to the same variant as the full name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    /// Via: path taken by the request so far
    Via,
    /// To: logical recipient
    To,
    /// From: initiator of the request
    From,
    /// CSeq: command sequence number
    CSeq,
    /// Call-ID: unique identifier for this call
    CallId,
    /// Contact: where subsequent requests should be sent
    Contact,
    /// Max-Forwards: hop limit
    MaxForwards,
    /// Route: forced route for a request
    Route,
    /// Record-Route: proxies that want to stay in the path
    RecordRoute,
    /// Expires: registration or subscription lifetime
    Expires,
    /// Min-Expires: minimum lifetime a registrar will accept
    MinExpires,
    /// Content-Type: media type of the body
    ContentType,
    /// Content-Length: size of the body in bytes
    ContentLength,
    /// Event: event package for SUBSCRIBE/NOTIFY
    Event,
    /// Subscription-State: state of the subscription in NOTIFY
    SubscriptionState,
    /// Authorization: credentials for a UA
    Authorization,
    /// WWW-Authenticate: challenge from a UA or registrar
    WwwAuthenticate,
    /// Proxy-Authenticate: challenge from a proxy
    ProxyAuthenticate,
    /// Proxy-Authorization: credentials for a proxy
    ProxyAuthorization,
    /// Any extension header name.
    Other(String),
}

impl HeaderName {
    /// Canonical name of the header.
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::To => "To",
            HeaderName::From => "From",
            HeaderName::CSeq => "CSeq",
            HeaderName::CallId => "Call-ID",
            HeaderName::Contact => "Contact",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::Expires => "Expires",
            HeaderName::MinExpires => "Min-Expires",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::Event => "Event",
            HeaderName::SubscriptionState => "Subscription-State",
            HeaderName::Authorization => "Authorization",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::Other(s) => s,
        }
    }

    /// Headers that may appear at most once per message.
    pub fn is_singleton(&self) -> bool {
        matches!(
            self,
            HeaderName::To
                | HeaderName::From
                | HeaderName::CSeq
                | HeaderName::CallId
                | HeaderName::MaxForwards
        )
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::parse(0, "empty header name"));
        }
        let lower = s.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "via" | "v" => HeaderName::Via,
            "to" | "t" => HeaderName::To,
            "from" | "f" => HeaderName::From,
            "cseq" => HeaderName::CSeq,
            "call-id" | "i" => HeaderName::CallId,
            "contact" | "m" => HeaderName::Contact,
            "max-forwards" => HeaderName::MaxForwards,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "expires" => HeaderName::Expires,
            "min-expires" => HeaderName::MinExpires,
            "content-type" | "c" => HeaderName::ContentType,
            "content-length" | "l" => HeaderName::ContentLength,
            "event" | "o" => HeaderName::Event,
            "subscription-state" => HeaderName::SubscriptionState,
            "authorization" => HeaderName::Authorization,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            _ => HeaderName::Other(s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_and_compact_forms() {
        assert_eq!(HeaderName::from_str("Via").unwrap(), HeaderName::Via);
        assert_eq!(HeaderName::from_str("v").unwrap(), HeaderName::Via);
        assert_eq!(HeaderName::from_str("i").unwrap(), HeaderName::CallId);
        assert_eq!(HeaderName::from_str("cSeq").unwrap(), HeaderName::CSeq);
        assert!(matches!(
            HeaderName::from_str("X-Custom").unwrap(),
            HeaderName::Other(s) if s == "X-Custom"
        ));
        assert!(HeaderName::from_str("").is_err());
    }

    #[test]
    fn singletons() {
        assert!(HeaderName::To.is_singleton());
        assert!(HeaderName::MaxForwards.is_singleton());
        assert!(!HeaderName::Via.is_singleton());
        assert!(!HeaderName::Contact.is_singleton());
    }
}
