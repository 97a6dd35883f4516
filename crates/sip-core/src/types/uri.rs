//! URI types: SIP/SIPS, TEL and opaque fallbacks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::param::Params;

/// The host part of a SIP URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Host {
    /// A DNS hostname.
    Domain(String),
    /// A dotted-quad IPv4 literal.
    Ipv4(String),
    /// An IPv6 literal (stored without the surrounding brackets).
    Ipv6(String),
}

impl Host {
    /// The host text without IPv6 brackets.
    pub fn as_str(&self) -> &str {
        match self {
            Host::Domain(s) | Host::Ipv4(s) | Host::Ipv6(s) => s,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Domain(s) | Host::Ipv4(s) => f.write_str(s),
            Host::Ipv6(s) => write!(f, "[{s}]"),
        }
    }
}

/// A `sip:` or `sips:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipUri {
    /// True for `sips:`.
    pub secure: bool,
    /// The user part, if any.
    pub user: Option<String>,
    /// The password part, if any. Rarely used; kept for round-tripping.
    pub password: Option<String>,
    /// Host name or address literal.
    pub host: Host,
    /// Explicit port, if any.
    pub port: Option<u16>,
    /// URI parameters, order-preserving, duplicate-free.
    pub params: Params,
    /// URI headers (`?name=value&...`), order-preserving.
    pub headers: Vec<(String, String)>,
}

impl SipUri {
    /// A minimal `sip:host` URI.
    pub fn new(host: Host) -> Self {
        SipUri {
            secure: false,
            user: None,
            password: None,
            host,
            port: None,
            params: Params::new(),
            headers: Vec::new(),
        }
    }

    /// The URI scheme text.
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "sips"
        } else {
            "sip"
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme())?;
        if let Some(user) = &self.user {
            write!(f, "{user}")?;
            if let Some(password) = &self.password {
                write!(f, ":{password}")?;
            }
            write!(f, "@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "{}", self.params)?;
        for (i, (name, value)) in self.headers.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// A `tel:` URI (RFC 3966).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelUri {
    /// The dialed digits, including visual separators, without the leading `+`.
    pub number: String,
    /// True for a global number (`tel:+...`).
    pub global: bool,
    /// URI parameters.
    pub params: Params,
}

impl fmt::Display for TelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tel:{}{}{}",
            if self.global { "+" } else { "" },
            self.number,
            self.params
        )
    }
}

/// A parsed URI.
///
/// Unrecognized schemes are never rejected; RFC 3261 permits arbitrary
/// schemes in addresses, so they are carried opaquely in [`Uri::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Uri {
    /// `sip:` / `sips:`
    Sip(SipUri),
    /// `tel:`
    Tel(TelUri),
    /// Anything else, kept verbatim.
    Other {
        /// The scheme before the colon.
        scheme: String,
        /// Everything after the colon, unparsed.
        opaque: String,
    },
}

impl Uri {
    /// The URI scheme text.
    pub fn scheme(&self) -> &str {
        match self {
            Uri::Sip(u) => u.scheme(),
            Uri::Tel(_) => "tel",
            Uri::Other { scheme, .. } => scheme,
        }
    }

    /// The SIP form, when this is a SIP/SIPS URI.
    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(u) => Some(u),
            _ => None,
        }
    }

    /// Mutable SIP form.
    pub fn as_sip_mut(&mut self) -> Option<&mut SipUri> {
        match self {
            Uri::Sip(u) => Some(u),
            _ => None,
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::Sip(u) => u.fmt(f),
            Uri::Tel(u) => u.fmt(f),
            Uri::Other { scheme, opaque } => write!(f, "{scheme}:{opaque}"),
        }
    }
}
