//! Per-request routing: authenticate, then forward.
//!
//! Each request walks a small state machine:
//!
//! ```text
//!                  ┌── valid session cookie ─────────────────┐
//!                  │                                         ▼
//! Unauthenticated ─┼── /<token>, no valid cookie ─→ Redeeming ─→ Authenticated ─→ Forwarding ─→ Forwarded
//!                  │                                   │                              │
//!                  └── neither ──────────────→ Rejected ◄── AuthError    upstream error ─→ 502
//! ```
//!
//! - A live session cookie always wins. The path is forwarded as is, even
//!   if it happens to be token-shaped.
//! - A token-shaped path (exactly [`TOKEN_LEN`] characters after the `/`)
//!   without a live cookie is redeemed. On success the response carries a
//!   fresh cookie and the request is forwarded to the target root, so the
//!   token never reaches the upstream.
//! - A cookie that names an unknown or expired session, with no token to
//!   fall back on, is rejected.
//!
//! Every rejection is a bare 401. The reason is only logged.
//!
//! [`TOKEN_LEN`]: wand_session::TOKEN_LEN

use std::sync::Arc;

use bytes::Bytes;
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderMap, HeaderValue, SET_COOKIE};
use hyper::{Request, Response};
use tracing::{debug, error, warn};
use wand_session::{AuthCoordinator, SessionId, SessionStore, Target, is_token_shaped};

use crate::{
    BoxError, ConnectionId, CredentialCookie, Forwarder, Handler, ProxyBody, ProxyError,
    Rejection, empty,
};

/// The outcome of authenticating a request.
#[derive(Debug, Clone)]
pub struct Admission {
    pub session_id: SessionId,
    pub target: Target,
    /// Set when the request redeemed a link and the client needs a cookie.
    pub set_cookie: Option<HeaderValue>,
    /// Replaces the inbound path and query when forwarding.
    pub upstream_path: Option<String>,
}

/// Routes inbound requests to their session's target.
pub struct ProxyDispatcher {
    auth: Arc<AuthCoordinator>,
    sessions: Arc<SessionStore>,
    cookie: CredentialCookie,
    forwarder: Forwarder,
}

impl ProxyDispatcher {
    pub fn new(
        auth: Arc<AuthCoordinator>,
        sessions: Arc<SessionStore>,
        cookie: CredentialCookie,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            auth,
            sessions,
            cookie,
            forwarder,
        }
    }

    /// Authenticates a request from its path, query and headers.
    ///
    /// # Errors
    /// - [`ProxyError::Unauthorized`] with the [`Rejection`] reason
    /// - [`ProxyError::Internal`] if redemption could not mint a session
    pub fn admit(
        &self,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<Admission, ProxyError> {
        let cookie_session = self.cookie.read(headers).map(|id| self.sessions.get(id));
        let token = path.strip_prefix('/').filter(|segment| is_token_shaped(segment));

        // Authenticated straight from the cookie.
        let rejection = match cookie_session {
            Some(Some(session)) if self.sessions.is_live(&session) => {
                return Ok(Admission {
                    session_id: session.id,
                    target: session.target,
                    set_cookie: None,
                    upstream_path: None,
                });
            }
            Some(Some(_)) => Rejection::SessionNotLive,
            Some(None) => Rejection::UnknownSession,
            None => Rejection::MissingCredential,
        };

        let Some(token) = token else {
            return Err(rejection.into());
        };

        // Redeeming.
        let grant = self.auth.redeem(token)?;
        let set_cookie = self.cookie.issue(&grant)?;
        let upstream_path = match query {
            Some(query) => format!("/?{query}"),
            None => "/".to_string(),
        };
        Ok(Admission {
            session_id: grant.session_id,
            target: grant.target,
            set_cookie: Some(set_cookie),
            upstream_path: Some(upstream_path),
        })
    }

    /// Authenticates and forwards one request, always producing a
    /// response.
    ///
    /// A redeeming request gets its cookie even when the upstream fails,
    /// so a 502 doesn't cost the visitor the session.
    pub async fn dispatch<B>(&self, req: Request<B>, conn: ConnectionId) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let admission = match self.admit(req.uri().path(), req.uri().query(), req.headers()) {
            Ok(admission) => admission,
            Err(e) => return self.fail(conn, &e),
        };

        debug!(
            %conn,
            method = %req.method(),
            session_id = %admission.session_id,
            target = %admission.target,
            redeemed = admission.set_cookie.is_some(),
            "request authenticated"
        );

        let forwarded = self
            .forwarder
            .forward(req, &admission.target, admission.upstream_path.as_deref())
            .await;
        let mut response = match forwarded {
            Ok(response) => response,
            Err(e) => self.fail(conn, &e),
        };
        if let Some(cookie) = admission.set_cookie {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        response
    }

    fn fail(&self, conn: ConnectionId, err: &ProxyError) -> Response<ProxyBody> {
        match err {
            ProxyError::Unauthorized(reason) => warn!(%conn, %reason, "request rejected"),
            ProxyError::Upstream(e) => warn!(%conn, error = %e, "upstream unreachable"),
            e => error!(%conn, error = %e, "request failed"),
        }
        let mut response = Response::new(empty());
        *response.status_mut() = err.status();
        response
    }
}

impl Handler for ProxyDispatcher {
    async fn handle(&self, req: Request<Incoming>, conn: ConnectionId) -> Response<ProxyBody> {
        self.dispatch(req, conn).await
    }
}
