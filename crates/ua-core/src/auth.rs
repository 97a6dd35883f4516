//! Digest authentication (RFC 2617, MD5).
//!
//! Only the client side is implemented: answering `WWW-Authenticate` and
//! `Proxy-Authenticate` challenges. `qop=auth` is supported with a fresh
//! cnonce per answer; `auth-int` and non-MD5 algorithms are rejected.

use md5::{Digest, Md5};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use uasip_sip_core::{Auth, Method};

use crate::error::{Error, Result};

/// A username/password pair for one protection domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

impl DigestCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        DigestCredentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Builds the credentials header value answering `challenge` for a request
/// with `method` and request-URI `uri`.
pub fn answer_challenge(
    challenge: &Auth,
    creds: &DigestCredentials,
    method: &Method,
    uri: &str,
) -> Result<Auth> {
    let mut cnonce = [0u8; 8];
    SmallRng::from_entropy().fill_bytes(&mut cnonce);
    answer_challenge_with_cnonce(challenge, creds, method, uri, &hex(&cnonce))
}

fn answer_challenge_with_cnonce(
    challenge: &Auth,
    creds: &DigestCredentials,
    method: &Method,
    uri: &str,
    cnonce: &str,
) -> Result<Auth> {
    if !challenge.scheme.eq_ignore_ascii_case("Digest") {
        return Err(Error::invalid_operation(format!(
            "unsupported authentication scheme {:?}",
            challenge.scheme
        )));
    }
    if let Some(alg) = challenge.get("algorithm") {
        if !alg.eq_ignore_ascii_case("MD5") {
            return Err(Error::invalid_operation(format!(
                "unsupported digest algorithm {alg:?}"
            )));
        }
    }
    let realm = challenge
        .get("realm")
        .ok_or_else(|| Error::invalid_operation("challenge without realm"))?;
    let nonce = challenge
        .get("nonce")
        .ok_or_else(|| Error::invalid_operation("challenge without nonce"))?;

    // Pick qop=auth when offered; auth-int needs the body hash which we
    // do not compute.
    let qop = challenge.get("qop").and_then(|offered| {
        offered
            .split(',')
            .map(str::trim)
            .find(|q| q.eq_ignore_ascii_case("auth"))
            .map(str::to_string)
    });
    if challenge.get("qop").is_some() && qop.is_none() {
        return Err(Error::invalid_operation(
            "challenge offers no supported qop",
        ));
    }

    let ha1 = md5_hex(&format!("{}:{realm}:{}", creds.username, creds.password));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    let nc = "00000001";
    let response = match &qop {
        Some(q) => md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{q}:{ha2}")),
        None => md5_hex(&format!("{ha1}:{nonce}:{ha2}")),
    };

    let opaque = challenge.get("opaque").map(str::to_string);
    let mut answer = Auth::new("Digest");
    answer.push("username", &creds.username, true);
    answer.push("realm", realm, true);
    answer.push("nonce", nonce, true);
    answer.push("uri", uri, true);
    answer.push("response", response, true);
    answer.push("algorithm", "MD5", false);
    if let Some(q) = qop {
        answer.push("qop", q, false);
        answer.push("nc", nc, false);
        answer.push("cnonce", cnonce, true);
    }
    if let Some(opaque) = opaque {
        answer.push("opaque", opaque, true);
    }
    Ok(answer)
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
