//! Error types for SIP message parsing.

use thiserror::Error;

use crate::lexer::TokenKind;

/// Result type for all sip-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the lexer and the grammar parsers.
///
/// Every variant that originates in the grammar carries the byte offset
/// into the buffer being parsed, so callers can report where a message
/// went wrong. There is no recovery at this level; the message parser
/// decides per header whether to abort, skip, or substitute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The buffer ended in the middle of a construct.
    #[error("unexpected end of input at byte {position}")]
    UnexpectedEndOfInput {
        /// Byte offset where more input was required.
        position: usize,
    },

    /// The next token did not match what the grammar required.
    #[error("expected {expected} at byte {position}, found {found:?}")]
    UnexpectedToken {
        /// Token kind the parser required.
        expected: TokenKind,
        /// Text of the token actually present.
        found: String,
        /// Byte offset of the offending token.
        position: usize,
    },

    /// Malformed grammar with a free-form description.
    #[error("parse error at byte {position}: {message}")]
    Parse {
        /// Byte offset of the offending input.
        position: usize,
        /// Description of the violation.
        message: String,
    },
}

impl Error {
    /// Shorthand for a [`Error::Parse`] with a formatted message.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            position,
            message: message.into(),
        }
    }

    /// Byte offset the error refers to.
    pub fn position(&self) -> usize {
        match self {
            Error::UnexpectedEndOfInput { position } => *position,
            Error::UnexpectedToken { position, .. } => *position,
            Error::Parse { position, .. } => *position,
        }
    }
}
