//! The security collaborator seam.
//!
//! Embedders decide which local listening points the stack may claim.
//! The default policy allows everything.

/// Decides whether the stack may listen at a local binding.
pub trait PermissionCheck: Send + Sync {
    /// Whether listening on `host:port` for `scheme` (`sip` or `sips`)
    /// is allowed.
    fn allow_listen(&self, host: &str, port: u16, scheme: &str) -> bool;
}

/// Permissive default policy.
#[derive(Debug, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn allow_listen(&self, _host: &str, _port: u16, _scheme: &str) -> bool {
        true
    }
}
