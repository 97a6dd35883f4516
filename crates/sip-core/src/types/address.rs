//! Addresses: display name + URI, as used by From/To/Contact/Route.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lexer::is_token_char;
use crate::types::param::Params;
use crate::types::uri::{Host, SipUri, Uri};

/// Syntactic form of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressKind {
    /// The Contact wildcard `*` (unregister-all).
    Wildcard,
    /// `[display-name] <uri>`
    NameAddr,
    /// A bare `uri`.
    AddrSpec,
}

/// A SIP address with optional display name and trailing parameters.
///
/// Owned by the headers that embed one (From, To, Contact, Route,
/// Record-Route). The wildcard form carries a placeholder URI that is
/// never rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Display name, if any. Stored unquoted.
    pub display_name: Option<String>,
    /// The address URI.
    pub uri: Uri,
    /// Which syntactic form this address was written in.
    pub kind: AddressKind,
    /// Header parameters following the address (`;tag=...`, `;q=...`).
    pub params: Params,
}

impl Address {
    /// A plain `addr-spec` address around `uri`.
    pub fn new(uri: Uri) -> Self {
        Address {
            display_name: None,
            uri,
            kind: AddressKind::AddrSpec,
            params: Params::new(),
        }
    }

    /// A `name-addr` address with an optional display name.
    pub fn name_addr(display_name: Option<String>, uri: Uri) -> Self {
        Address {
            display_name,
            uri,
            kind: AddressKind::NameAddr,
            params: Params::new(),
        }
    }

    /// The Contact wildcard `*`.
    pub fn wildcard() -> Self {
        Address {
            display_name: None,
            uri: Uri::Sip(SipUri::new(Host::Domain(String::new()))),
            kind: AddressKind::Wildcard,
            params: Params::new(),
        }
    }

    /// True for the Contact wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.kind == AddressKind::Wildcard
    }

    /// The dialog tag parameter, if present.
    pub fn tag(&self) -> Option<&str> {
        self.params.tag()
    }

    /// Sets the dialog tag parameter.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.set("tag", Some(tag.into()));
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddressKind::Wildcard => write!(f, "*")?,
            AddressKind::AddrSpec => write!(f, "{}", self.uri)?,
            AddressKind::NameAddr => {
                if let Some(name) = &self.display_name {
                    if !name.is_empty() && name.chars().all(|c| is_token_char(c) || c == ' ') {
                        write!(f, "{name} ")?;
                    } else {
                        write!(
                            f,
                            "\"{}\" ",
                            name.replace('\\', "\\\\").replace('"', "\\\"")
                        )?;
                    }
                }
                write!(f, "<{}>", self.uri)?;
            }
        }
        write!(f, "{}", self.params)
    }
}
