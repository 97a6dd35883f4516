//! The in-memory SIP message model.

pub mod address;
pub mod header;
pub mod header_name;
pub mod message;
pub mod method;
pub mod param;
pub mod status;
pub mod uri;

pub use address::{Address, AddressKind};
pub use header::{Auth, AuthParam, Header, MediaType, TokenParams, ViaHop};
pub use header_name::HeaderName;
pub use message::{Headers, Message, Request, Response};
pub use method::Method;
pub use param::Params;
pub use status::StatusCode;
pub use uri::{Host, SipUri, TelUri, Uri};
