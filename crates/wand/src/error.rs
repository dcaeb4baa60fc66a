//! Unified error type for wand.

use wand_issue::IssueError;
use wand_proxy::ProxyError;
use wand_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` variants let `?` lift sub-crate errors straight into
/// this one.
#[derive(Debug, thiserror::Error)]
pub enum WandError {
    /// The command line or environment describes an unusable setup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A session-level error (token minting, lookups).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An issuance error (invalid or denylisted target).
    #[error(transparent)]
    Issue(#[from] IssueError),

    /// A proxy-level error (binding, forwarding, rejected credentials).
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use wand_session::{AuthError, TargetError};

    #[test]
    fn test_from_session_error() {
        let err: WandError = SessionError::from(AuthError::Exhausted).into();
        assert!(matches!(err, WandError::Session(_)));
    }

    #[test]
    fn test_from_issue_error() {
        let err: WandError = IssueError::from(TargetError::Missing).into();
        assert!(matches!(err, WandError::Issue(_)));
    }

    #[test]
    fn test_from_proxy_error() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        let err: WandError = ProxyError::from(io).into();
        assert!(matches!(err, WandError::Proxy(_)));
        assert!(err.to_string().contains("taken"));
    }

    #[test]
    fn test_config_error_message() {
        let err = WandError::Config("domain must not be empty".into());
        assert_eq!(err.to_string(), "invalid configuration: domain must not be empty");
    }
}
