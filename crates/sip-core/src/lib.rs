//! # uasip-sip-core
//!
//! RFC 3261 message grammar for the uasip stack: a context-driven
//! tokenizer, recursive-descent parsers for the message and header
//! grammars, and the in-memory message model.
//!
//! The crate is transport-agnostic; it turns bytes into [`Message`]
//! values and renders them back. The user-agent state machines live in
//! `uasip-ua-core`.
//!
//! ## Example
//!
//! ```rust
//! use uasip_sip_core::{parse_message, Message, Method};
//!
//! let raw = b"OPTIONS sip:carol@chicago.example.com SIP/2.0\r\n\
//!     Via: SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bKhjhs8ass877\r\n\
//!     Max-Forwards: 70\r\n\
//!     To: <sip:carol@chicago.example.com>\r\n\
//!     From: Alice <sip:alice@atlanta.example.com>;tag=1928301774\r\n\
//!     Call-ID: a84b4c76e66710\r\n\
//!     CSeq: 63104 OPTIONS\r\n\
//!     Content-Length: 0\r\n\r\n";
//!
//! let msg = parse_message(raw).unwrap();
//! match msg {
//!     Message::Request(req) => assert_eq!(req.method, Method::Options),
//!     Message::Response(_) => unreachable!(),
//! }
//! ```

pub mod error;
pub mod lexer;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use lexer::{Context, Lexer, Token, TokenKind};
pub use parser::{
    parse_message, parse_message_with_policy, parse_request, parse_response, parse_uri,
    HeaderIssue, HeaderRecovery,
};
pub use types::{
    Address, AddressKind, Auth, AuthParam, Header, HeaderName, Headers, Host, MediaType, Message,
    Method, Params, Request, Response, SipUri, StatusCode, TelUri, TokenParams, Uri, ViaHop,
};
