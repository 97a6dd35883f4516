//! Error types for the user-agent layer.

use thiserror::Error;

/// Result type for all ua-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by connections, dialogs and the refresh machinery.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was attempted outside its legal state-machine state.
    /// Always surfaced to the caller, never retried internally.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An operation is semantically disallowed for the current
    /// message/method combination.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The transaction layer could not supply a transaction.
    #[error("transaction unavailable: {0}")]
    TransactionUnavailable(String),

    /// Transport or transaction-layer failure without a more specific kind.
    #[error("general failure: {0}")]
    GeneralError(String),

    /// Transport I/O failure; the owning connection is closed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Credentials were exhausted or rejected during automatic
    /// re-authentication.
    #[error("authentication failed after {attempts} attempt(s)")]
    AuthenticationFailed {
        /// How many automatic re-originations were tried.
        attempts: u32,
    },

    /// Message grammar failure bubbled up from sip-core.
    #[error(transparent)]
    Parse(#[from] uasip_sip_core::Error),

    /// The local listening point refused by the security collaborator.
    #[error("listening on {0} not permitted")]
    NotPermitted(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidState`].
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Shorthand for [`Error::InvalidOperation`].
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }
}
