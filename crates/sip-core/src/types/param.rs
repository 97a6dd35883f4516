//! Ordered parameter lists shared by URIs and headers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lexer::is_token_char;

/// An ordered `;name=value` parameter list.
///
/// Names are case-insensitive and each name holds at most one value; the
/// parsers treat a duplicate name as a fatal error, so a populated `Params`
/// never contains one. Insertion order is preserved for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params(Vec<(String, Option<String>)>);

impl Params {
    /// An empty parameter list.
    pub fn new() -> Self {
        Params(Vec::new())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no parameters are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends `name` unless it is already present (case-insensitive).
    /// Returns `false` on a duplicate, leaving the list untouched.
    pub fn try_insert(&mut self, name: impl Into<String>, value: Option<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.0.push((name, value));
        true
    }

    /// Sets `name` to `value`, replacing any existing entry in place.
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        if let Some(entry) = self
            .0
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            entry.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    /// True when `name` is present (case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// The value of `name`, if present. Flag parameters yield `Some(None)`
    /// from [`Params::entry`] but `None` here.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entry(name).and_then(|v| v.as_deref())
    }

    /// The stored entry for `name`: `None` when absent, `Some(None)` for a
    /// valueless flag, `Some(Some(v))` otherwise.
    pub fn entry(&self, name: &str) -> Option<&Option<String>> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Removes `name`, returning whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.0.len() != before
    }

    /// Iterates parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    /// The `expires` parameter as a non-negative integer, if present and
    /// well-formed.
    pub fn expires(&self) -> Option<u32> {
        self.get("expires").and_then(|v| v.parse().ok())
    }

    /// The `tag` parameter.
    pub fn tag(&self) -> Option<&str> {
        self.get("tag")
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.0 {
            match value {
                None => write!(f, ";{name}")?,
                Some(v) if v.chars().all(is_token_char) && !v.is_empty() => {
                    write!(f, ";{name}={v}")?
                }
                // Bracket-enclosed values carry their own delimiter
                // suppression; emit them verbatim.
                Some(v) if v.starts_with('<') && v.ends_with('>') => {
                    write!(f, ";{name}={v}")?
                }
                Some(v) => {
                    // Needs quoting to survive re-parsing.
                    write!(
                        f,
                        ";{name}=\"{}\"",
                        v.replace('\\', "\\\\").replace('"', "\\\"")
                    )?
                }
            }
        }
        Ok(())
    }
}
