//! Error types for the issuance layer.

use wand_session::{SessionError, TargetError};

/// Why a link could not be issued.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// The target did not normalize to an origin.
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),

    /// The target is on the denylist. The message deliberately doesn't
    /// say which entry matched.
    #[error("invalid target")]
    Denied { target: String },

    /// The query string itself could not be decoded (bad percent-encoding,
    /// or a parameter given twice).
    #[error("malformed parameters: {0}")]
    Params(String),

    /// Storing the link failed. Always fatal, see
    /// [`SessionError::is_fatal`].
    #[error(transparent)]
    Internal(#[from] SessionError),
}

impl IssueError {
    /// Returns `true` for problems with the caller's input, which should be
    /// answered with a client error rather than a server error.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}
