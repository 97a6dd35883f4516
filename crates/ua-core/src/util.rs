//! Identifier generation for tags, branches and Call-IDs.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use uasip_sip_core::{Header, Host, Request};
use uuid::Uuid;

/// RFC 3261 magic cookie prefix for Via branches.
const BRANCH_COOKIE: &str = "z9hG4bK";

/// A fresh, globally unique Via branch.
pub fn new_branch() -> String {
    format!("{BRANCH_COOKIE}{}", Uuid::new_v4().simple())
}

/// A fresh From/To tag.
pub fn new_tag() -> String {
    let mut rng = SmallRng::from_entropy();
    (0..8)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

/// A fresh Call-ID scoped to `host`.
pub fn new_call_id(host: &str) -> String {
    format!("{}@{host}", Uuid::new_v4().simple())
}

/// Classifies a textual host into the URI host taxonomy.
pub(crate) fn classify_host(host: &str) -> Host {
    if uasip_sip_core::lexer::is_ipv4_literal(host) {
        Host::Ipv4(host.to_string())
    } else if uasip_sip_core::lexer::is_ipv6_literal(host) {
        Host::Ipv6(host.trim_matches(['[', ']']).to_string())
    } else {
        Host::Domain(host.to_string())
    }
}

/// Bumps CSeq and replaces the top Via branch ahead of a re-origination.
pub(crate) fn bump_for_resend(request: &mut Request) {
    for header in request.headers.iter_mut() {
        match header {
            Header::CSeq { seq, .. } => *seq += 1,
            Header::Via(hops) => {
                if let Some(hop) = hops.first_mut() {
                    hop.params.set("branch", Some(new_branch()));
                }
            }
            _ => {}
        }
    }
}
