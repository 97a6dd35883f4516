//! # uasip-ua-core
//!
//! RFC 3261 user-agent state machines on top of `uasip-sip-core`:
//! client and server connections, dialog usage tracking, automatic
//! registration/subscription refresh and transparent digest
//! authentication.
//!
//! The crate owns no sockets. Embedders supply the collaborators — a
//! [`Transport`], an [`IdentityStore`], a [`PermissionCheck`] and a
//! [`TimerService`] — and wire received messages into the connections;
//! everything else (header construction, state legality, challenges,
//! refreshes) happens here.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use uasip_sip_core::{parse_uri, Method};
//! use uasip_ua_core::{
//!     AllowAll, InMemoryIdentityStore, LoopbackTransport, TokioTimer, UaStack,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = Arc::new(InMemoryIdentityStore::with_identity(
//!     parse_uri("sip:alice@example.com", 0)?,
//! ));
//! let stack = UaStack::new(identity, Arc::new(AllowAll), Box::new(TokioTimer));
//!
//! let transport = Arc::new(LoopbackTransport::new("192.0.2.1", 5060));
//! let conn = stack.client_connection(transport);
//! conn.init_request(Method::Register, parse_uri("sip:example.com", 0)?)?;
//! conn.send().await?;
//! while conn.receive(Duration::from_secs(5)).await? {
//!     // inspect conn.last_response()
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod dialog;
pub mod error;
pub mod identity;
pub mod refresh;
pub mod security;
pub mod server;
pub mod stack;
pub mod timer;
pub mod transport;

mod util;

pub use auth::{answer_challenge, DigestCredentials};
pub use client::{ClientConnection, ClientState};
pub use dialog::{Dialog, DialogState, SharedDialog};
pub use error::{Error, Result};
pub use identity::{IdentityStore, InMemoryIdentityStore};
pub use refresh::{RefreshId, RefreshListener, RefreshManager};
pub use security::{AllowAll, PermissionCheck};
pub use server::{ServerConnection, ServerState};
pub use stack::{Listener, RequestSink, UaStack};
pub use timer::{BoxedTask, TimerHandle, TimerService, TokioTimer};
pub use transport::{LocalContact, LoopbackTransport, Transport};
