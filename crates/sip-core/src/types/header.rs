//! The tagged header union and its component types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::address::Address;
use crate::types::header_name::HeaderName;
use crate::types::method::Method;
use crate::types::param::Params;
use crate::types::uri::Host;

/// One hop of a Via header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViaHop {
    /// Protocol name, normally `SIP`.
    pub protocol: String,
    /// Protocol version, normally `2.0`.
    pub version: String,
    /// Transport token (`UDP`, `TCP`, `TLS`, ...).
    pub transport: String,
    /// The sent-by host.
    pub host: Host,
    /// The sent-by port, if explicit.
    pub port: Option<u16>,
    /// Via parameters (`branch`, `received`, `rport`, ...).
    pub params: Params,
}

impl ViaHop {
    /// The branch parameter, if present.
    pub fn branch(&self) -> Option<&str> {
        self.params.get("branch")
    }
}

impl fmt::Display for ViaHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} {}",
            self.protocol, self.version, self.transport, self.host
        )?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "{}", self.params)
    }
}

/// A single `name=value` pair in a credentials or challenge header.
///
/// Digest grammar mixes quoted and unquoted values (`nonce="..."` but
/// `nc=00000001`), so the quoting of each pair is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParam {
    /// Parameter name.
    pub name: String,
    /// Parameter value, unquoted.
    pub value: String,
    /// Whether the value was (and will be rendered) quoted.
    pub quoted: bool,
}

impl fmt::Display for AuthParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted {
            write!(
                f,
                "{}=\"{}\"",
                self.name,
                self.value.replace('\\', "\\\\").replace('"', "\\\"")
            )
        } else {
            write!(f, "{}={}", self.name, self.value)
        }
    }
}

/// A challenge (WWW-Authenticate / Proxy-Authenticate) or credentials
/// (Authorization / Proxy-Authorization) header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    /// Authentication scheme, normally `Digest`.
    pub scheme: String,
    /// Comma-separated parameters, in order, duplicate-free.
    pub params: Vec<AuthParam>,
}

impl Auth {
    /// A new value for `scheme` with no parameters yet.
    pub fn new(scheme: impl Into<String>) -> Self {
        Auth {
            scheme: scheme.into(),
            params: Vec::new(),
        }
    }

    /// The value of `name` (case-insensitive), if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }

    /// Appends a parameter. The parsers guarantee uniqueness; builder use
    /// is expected to do the same.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>, quoted: bool) {
        self.params.push(AuthParam {
            name: name.into(),
            value: value.into(),
            quoted,
        });
    }
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == 0 {
                write!(f, " {param}")?;
            } else {
                write!(f, ", {param}")?;
            }
        }
        Ok(())
    }
}

/// A `type/subtype` media type with parameters, for Content-Type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    /// Top-level type (`application`).
    pub type_: String,
    /// Subtype (`sdp`).
    pub subtype: String,
    /// Media type parameters.
    pub params: Params,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.type_, self.subtype, self.params)
    }
}

/// A token-plus-parameters header value (Event, Subscription-State).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenParams {
    /// The leading token.
    pub value: String,
    /// Trailing parameters.
    pub params: Params,
}

impl TokenParams {
    /// True when the token is `terminated` (Subscription-State use).
    pub fn is_terminated(&self) -> bool {
        self.value.eq_ignore_ascii_case("terminated")
    }
}

impl fmt::Display for TokenParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.params)
    }
}

/// A parsed SIP header.
///
/// One variant per header type this stack understands, each owning its
/// parsed fields. Unknown headers keep their raw name and value in
/// [`Header::Extension`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Header {
    /// Via hops; one header line may carry several, comma-separated.
    Via(Vec<ViaHop>),
    /// To address.
    To(Address),
    /// From address.
    From(Address),
    /// CSeq sequence number and method.
    CSeq {
        /// Monotonic sequence number.
        seq: u32,
        /// The request method the sequence number belongs to.
        method: Method,
    },
    /// Call-ID opaque identifier.
    CallId(String),
    /// Contact entries; the wildcard `*` is a single wildcard address.
    Contact(Vec<Address>),
    /// Max-Forwards hop count.
    MaxForwards(u32),
    /// Route entries.
    Route(Vec<Address>),
    /// Record-Route entries.
    RecordRoute(Vec<Address>),
    /// Expires, in seconds.
    Expires(u32),
    /// Min-Expires, in seconds.
    MinExpires(u32),
    /// Content-Type media type.
    ContentType(MediaType),
    /// Content-Length, in bytes.
    ContentLength(u64),
    /// Event package.
    Event(TokenParams),
    /// Subscription-State value.
    SubscriptionState(TokenParams),
    /// Authorization credentials.
    Authorization(Auth),
    /// WWW-Authenticate challenge.
    WwwAuthenticate(Auth),
    /// Proxy-Authenticate challenge.
    ProxyAuthenticate(Auth),
    /// Proxy-Authorization credentials.
    ProxyAuthorization(Auth),
    /// Any other header, raw.
    Extension {
        /// Header name as received.
        name: String,
        /// Raw value text.
        value: String,
    },
}

impl Header {
    /// The name this header renders under.
    pub fn name(&self) -> HeaderName {
        match self {
            Header::Via(_) => HeaderName::Via,
            Header::To(_) => HeaderName::To,
            Header::From(_) => HeaderName::From,
            Header::CSeq { .. } => HeaderName::CSeq,
            Header::CallId(_) => HeaderName::CallId,
            Header::Contact(_) => HeaderName::Contact,
            Header::MaxForwards(_) => HeaderName::MaxForwards,
            Header::Route(_) => HeaderName::Route,
            Header::RecordRoute(_) => HeaderName::RecordRoute,
            Header::Expires(_) => HeaderName::Expires,
            Header::MinExpires(_) => HeaderName::MinExpires,
            Header::ContentType(_) => HeaderName::ContentType,
            Header::ContentLength(_) => HeaderName::ContentLength,
            Header::Event(_) => HeaderName::Event,
            Header::SubscriptionState(_) => HeaderName::SubscriptionState,
            Header::Authorization(_) => HeaderName::Authorization,
            Header::WwwAuthenticate(_) => HeaderName::WwwAuthenticate,
            Header::ProxyAuthenticate(_) => HeaderName::ProxyAuthenticate,
            Header::ProxyAuthorization(_) => HeaderName::ProxyAuthorization,
            Header::Extension { name, .. } => HeaderName::Other(name.clone()),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name())?;
        match self {
            Header::Via(hops) => write_list(f, hops),
            Header::To(addr) | Header::From(addr) => write!(f, "{addr}"),
            Header::CSeq { seq, method } => write!(f, "{seq} {method}"),
            Header::CallId(id) => write!(f, "{id}"),
            Header::Contact(addrs) => write_list(f, addrs),
            Header::MaxForwards(n) => write!(f, "{n}"),
            Header::Route(addrs) | Header::RecordRoute(addrs) => write_list(f, addrs),
            Header::Expires(n) | Header::MinExpires(n) => write!(f, "{n}"),
            Header::ContentType(mt) => write!(f, "{mt}"),
            Header::ContentLength(n) => write!(f, "{n}"),
            Header::Event(tp) | Header::SubscriptionState(tp) => write!(f, "{tp}"),
            Header::Authorization(a)
            | Header::WwwAuthenticate(a)
            | Header::ProxyAuthenticate(a)
            | Header::ProxyAuthorization(a) => write!(f, "{a}"),
            Header::Extension { value, .. } => write!(f, "{value}"),
        }
    }
}
