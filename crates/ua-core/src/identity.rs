//! The identity collaborator seam.
//!
//! Connections ask this store for the local address-of-record when
//! building From, and for credentials when a challenge arrives. The
//! in-memory implementation is enough for tests and single-user devices.

use std::collections::HashMap;
use std::sync::Mutex;

use uasip_sip_core::Uri;

use crate::auth::DigestCredentials;

/// Supplies the local identity and per-realm credentials.
pub trait IdentityStore: Send + Sync {
    /// The local address-of-record, used for From (and To on REGISTER).
    /// `None` makes the client fall back to an anonymous From.
    fn default_identity(&self) -> Option<Uri>;

    /// Credentials for `realm`, if provisioned.
    fn credentials_for(&self, realm: &str) -> Option<DigestCredentials>;
}

/// Map-backed identity store.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    local: Mutex<Option<Uri>>,
    by_realm: Mutex<HashMap<String, DigestCredentials>>,
    fallback: Mutex<Option<DigestCredentials>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(local: Uri) -> Self {
        let store = Self::default();
        *store.local.lock().unwrap() = Some(local);
        store
    }

    /// Registers credentials for one realm.
    pub fn add_credentials(&self, realm: impl Into<String>, creds: DigestCredentials) {
        self.by_realm.lock().unwrap().insert(realm.into(), creds);
    }

    /// Credentials to use when no realm-specific entry matches.
    pub fn set_fallback(&self, creds: DigestCredentials) {
        *self.fallback.lock().unwrap() = Some(creds);
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn default_identity(&self) -> Option<Uri> {
        self.local.lock().unwrap().clone()
    }

    fn credentials_for(&self, realm: &str) -> Option<DigestCredentials> {
        self.by_realm
            .lock()
            .unwrap()
            .get(realm)
            .cloned()
            .or_else(|| self.fallback.lock().unwrap().clone())
    }
}
