//! SIP request methods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lexer::is_token_char;

/// A SIP request method.
///
/// The methods this stack acts on get their own variants; anything else a
/// peer sends is preserved verbatim in [`Method::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// REGISTER (RFC 3261)
    Register,
    /// INVITE (RFC 3261)
    Invite,
    /// ACK (RFC 3261)
    Ack,
    /// BYE (RFC 3261)
    Bye,
    /// CANCEL (RFC 3261)
    Cancel,
    /// OPTIONS (RFC 3261)
    Options,
    /// SUBSCRIBE (RFC 3265)
    Subscribe,
    /// NOTIFY (RFC 3265)
    Notify,
    /// PUBLISH (RFC 3903)
    Publish,
    /// MESSAGE (RFC 3428)
    Message,
    /// REFER (RFC 3515)
    Refer,
    /// PRACK (RFC 3262)
    Prack,
    /// UPDATE (RFC 3311)
    Update,
    /// INFO (RFC 6086)
    Info,
    /// Any extension method.
    Other(String),
}

impl Method {
    /// Canonical on-the-wire spelling.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Publish => "PUBLISH",
            Method::Message => "MESSAGE",
            Method::Refer => "REFER",
            Method::Prack => "PRACK",
            Method::Update => "UPDATE",
            Method::Info => "INFO",
            Method::Other(s) => s,
        }
    }

    /// Methods whose successful transactions establish a dialog.
    pub fn establishes_dialog(&self) -> bool {
        matches!(self, Method::Invite | Method::Subscribe | Method::Refer)
    }

    /// Methods that are only legal inside an existing dialog.
    pub fn requires_dialog(&self) -> bool {
        matches!(
            self,
            Method::Bye | Method::Notify | Method::Prack | Method::Update
        )
    }

    /// Methods whose bindings are kept alive by periodic refresh.
    pub fn is_refreshable(&self) -> bool {
        matches!(self, Method::Register | Method::Subscribe | Method::Publish)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "REGISTER" => Ok(Method::Register),
            "INVITE" => Ok(Method::Invite),
            "ACK" => Ok(Method::Ack),
            "BYE" => Ok(Method::Bye),
            "CANCEL" => Ok(Method::Cancel),
            "OPTIONS" => Ok(Method::Options),
            "SUBSCRIBE" => Ok(Method::Subscribe),
            "NOTIFY" => Ok(Method::Notify),
            "PUBLISH" => Ok(Method::Publish),
            "MESSAGE" => Ok(Method::Message),
            "REFER" => Ok(Method::Refer),
            "PRACK" => Ok(Method::Prack),
            "UPDATE" => Ok(Method::Update),
            "INFO" => Ok(Method::Info),
            other => {
                if other.is_empty() || !other.chars().all(is_token_char) {
                    Err(Error::parse(0, format!("invalid method name {other:?}")))
                } else {
                    Ok(Method::Other(other.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_and_extension_methods() {
        assert_eq!(Method::from_str("REGISTER").unwrap(), Method::Register);
        assert_eq!(
            Method::from_str("CUSTOM").unwrap(),
            Method::Other("CUSTOM".into())
        );
        assert!(Method::from_str("BAD METHOD").is_err());
    }

    #[test]
    fn classification() {
        assert!(Method::Invite.establishes_dialog());
        assert!(Method::Bye.requires_dialog());
        assert!(Method::Publish.is_refreshable());
        assert!(!Method::Options.is_refreshable());
    }
}
