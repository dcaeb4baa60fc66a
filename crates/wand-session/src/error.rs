//! Error types for the session layer.

/// Why a link token could not be redeemed.
///
/// All three variants end the redemption attempt and all three look the
/// same to the end user (a bare 401). They stay distinct here so logs can
/// tell a typo apart from a replayed or stale link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No link was ever issued under this token (or it has been evicted).
    #[error("no such link")]
    NotFound,

    /// The link's `expires_at` has passed. Remaining uses don't matter.
    #[error("link has expired")]
    Expired,

    /// Every use of the link has already been redeemed.
    #[error("link has been used up")]
    Exhausted,
}

/// Errors that can occur while minting links or sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Redemption was refused. See [`AuthError`].
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The OS random source failed to produce bytes.
    ///
    /// There is no weaker fallback: without randomness we can't mint
    /// tokens, so the operation fails outright.
    #[error("random source failed: {0}")]
    Entropy(String),

    /// A freshly generated identifier already exists in its table.
    ///
    /// With 256 bits of entropy this should never happen. If it does,
    /// the random source is broken, and retrying would only hide that.
    #[error("generated {0} collides with an existing entry")]
    Collision(&'static str),
}

impl SessionError {
    /// Returns `true` for failures of the process itself (entropy,
    /// collisions) as opposed to a caller presenting a bad token.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Entropy(_) | Self::Collision(_))
    }

    /// The redemption failure kind, if this is one.
    pub fn auth_kind(&self) -> Option<AuthError> {
        match self {
            Self::Auth(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Why a string could not be turned into a [`Target`](crate::Target).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// No target was given at all.
    #[error("target URL not provided")]
    Missing,

    /// The input did not parse as an absolute URL.
    #[error("error parsing target URL: {0}")]
    Malformed(String),

    /// Only `http` and `https` targets can be proxied.
    #[error("unsupported target scheme {0:?}")]
    UnsupportedScheme(String),

    /// The URL carries more than an origin (credentials, a path, a query
    /// or a fragment). Links are bound to an origin only.
    #[error("target must be a bare origin, got {0:?}")]
    NotAnOrigin(String),
}
