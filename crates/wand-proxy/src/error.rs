use hyper::StatusCode;
use hyper::header::InvalidHeaderValue;
use wand_session::{AuthError, SessionError};

/// Why a request was refused before reaching the upstream.
///
/// Every variant becomes the same bare 401. They differ only in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Neither a session cookie nor a token-shaped path.
    #[error("no session credential or link token")]
    MissingCredential,

    /// The cookie names a session that doesn't exist.
    #[error("no such session")]
    UnknownSession,

    /// The cookie names a session whose validity has passed.
    #[error("session is no longer valid")]
    SessionNotLive,

    /// The link token could not be redeemed.
    #[error("redemption refused: {0}")]
    Redeem(#[from] AuthError),
}

/// Errors that can occur in the proxy layer.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request was not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] Rejection),

    /// Connecting to or talking with the target failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    /// Minting a session failed (entropy or collision).
    #[error("internal error: {0}")]
    Internal(#[source] SessionError),

    /// A header we generate could not be encoded.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// The upstream HTTP client could not be built.
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    /// Binding or inspecting a listener failed.
    #[error("listener failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// The status the client sees for this error.
    ///
    /// Auth failures and gateway failures are kept apart: a dead upstream
    /// is never reported as 401.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::InvalidHeader(_) | Self::Client(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SessionError> for ProxyError {
    fn from(err: SessionError) -> Self {
        match err.auth_kind() {
            Some(kind) => Self::Unauthorized(Rejection::Redeem(kind)),
            None => Self::Internal(err),
        }
    }
}
