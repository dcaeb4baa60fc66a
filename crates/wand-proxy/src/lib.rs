//! Session-gated reverse proxy for wand.
//!
//! Every inbound request either carries a session cookie, carries a link
//! token as its whole path, or is refused. Authenticated requests are
//! streamed to the session's target; see [`ProxyDispatcher`] for the
//! routing rules.
//!
//! # How it fits in the stack
//!
//! ```text
//! client ──→ HttpListener ──→ Handler (ProxyDispatcher)
//!                                 │ admit: cookie / token → Admission
//!                                 │        (AuthCoordinator, SessionStore)
//!                                 ▼
//!                             Forwarder ──→ target origin
//! ```
//!
//! TLS is not terminated here. Run wand behind a TLS terminator, or point
//! a plain-HTTP deployment at it for local use.

mod cookie;
mod dispatch;
mod error;
mod forward;
mod listener;

pub use cookie::CredentialCookie;
pub use dispatch::{Admission, ProxyDispatcher};
pub use error::{ProxyError, Rejection};
pub use forward::Forwarder;
pub use listener::{ConnectionId, HttpListener};

use std::future::Future;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};

/// Boxed error carried by response bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body type for everything wand serves: upstream streams and
/// locally generated responses alike.
pub type ProxyBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

/// An empty response body.
pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// A response body holding `bytes`.
pub fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

/// Turns one request into one response.
///
/// Implementations report failures as responses; the listener never sees
/// an error.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        req: Request<Incoming>,
        conn: ConnectionId,
    ) -> impl Future<Output = Response<ProxyBody>> + Send;
}
