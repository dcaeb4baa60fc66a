//! Link issuance.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use wand_session::{Clock, LinkRegistry, LinkToken, NewLink, Target, TargetError, deadline};

use crate::{Denylist, IssueError, IssueOptions, IssueParams};

/// A freshly stored link, ready to hand to a user.
#[derive(Debug, Clone)]
pub struct IssuedLink {
    pub token: LinkToken,
    /// The fully qualified link, e.g. `https://wand.example/<token>`.
    pub url: String,
    pub target: Target,
    pub expires_at: DateTime<Utc>,
    pub remaining_uses: u32,
    pub session_duration: Duration,
}

/// Validates issuance requests and stores the resulting links.
pub struct IssuanceService {
    links: Arc<LinkRegistry>,
    clock: Arc<dyn Clock>,
    denylist: Denylist,
    link_base: String,
}

impl IssuanceService {
    /// `domain` is where the proxy is reachable. A bare domain gets an
    /// `https://` prefix; one that already carries a scheme is used as is.
    pub fn new(
        links: Arc<LinkRegistry>,
        clock: Arc<dyn Clock>,
        denylist: Denylist,
        domain: &str,
    ) -> Self {
        let domain = domain.trim().trim_end_matches('/');
        let link_base = if domain.contains("://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        };
        Self {
            links,
            clock,
            denylist,
            link_base,
        }
    }

    /// The prefix every issued link starts with.
    pub fn link_base(&self) -> &str {
        &self.link_base
    }

    pub fn denylist(&self) -> &Denylist {
        &self.denylist
    }

    /// Issues a link to `target` (host and optional port, no scheme).
    ///
    /// `options` are clamped into their safe ranges before use.
    ///
    /// # Errors
    /// - [`IssueError::InvalidTarget`] if `target` is not a bare origin
    /// - [`IssueError::Denied`] if it normalizes to a denylisted origin;
    ///   nothing is stored
    /// - [`IssueError::Internal`] if the registry could not mint a token
    pub fn issue(
        &self,
        target: &str,
        tls: bool,
        options: &IssueOptions,
    ) -> Result<IssuedLink, IssueError> {
        let target = Target::parse(target, tls).inspect_err(|e| {
            warn!(target, error = %e, "issuance rejected: invalid target");
        })?;
        if self.denylist.contains(&target) {
            warn!(%target, "issuance rejected: target is denylisted");
            return Err(IssueError::Denied {
                target: target.to_string(),
            });
        }

        let options = options.clamped();
        let expires_at = deadline(self.clock.now(), options.link_expiry);
        let token = self.links.create(NewLink {
            target: target.clone(),
            remaining_uses: options.link_uses,
            expires_at,
            session_duration: options.session_duration,
        })?;

        let url = format!("{}/{}", self.link_base, token.as_str());
        info!(
            token = %token,
            %target,
            uses = options.link_uses,
            %expires_at,
            session_duration = ?options.session_duration,
            "link issued"
        );

        Ok(IssuedLink {
            token,
            url,
            target,
            expires_at,
            remaining_uses: options.link_uses,
            session_duration: options.session_duration,
        })
    }

    /// Issues a link from raw query parameters, applying the default/clamp
    /// rule to every option.
    pub fn issue_params(&self, params: &IssueParams) -> Result<IssuedLink, IssueError> {
        let target = params
            .target
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(TargetError::Missing)?;
        let options = IssueOptions::from_params(params);
        self.issue(target, params.wants_tls(), &options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wand_session::{ManualClock, OsRandom};

    fn service(domain: &str, denied: &[&str]) -> (IssuanceService, Arc<LinkRegistry>) {
        let clock = ManualClock::starting_now();
        let links = Arc::new(LinkRegistry::new(Arc::new(clock.clone()), Arc::new(OsRandom)));
        let denylist = denied.iter().collect();
        let service = IssuanceService::new(Arc::clone(&links), Arc::new(clock), denylist, domain);
        (service, links)
    }

    #[test]
    fn test_new_bare_domain_gets_https_prefix() {
        let (svc, _) = service("wand.example", &[]);
        assert_eq!(svc.link_base(), "https://wand.example");
    }

    #[test]
    fn test_new_domain_with_scheme_used_verbatim() {
        let (svc, _) = service("http://127.0.0.1:8080/", &[]);
        assert_eq!(svc.link_base(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_issue_returns_link_with_domain_and_token() {
        let (svc, links) = service("wand.example", &[]);

        let issued = svc.issue("example.com", false, &IssueOptions::default()).unwrap();

        assert_eq!(
            issued.url,
            format!("https://wand.example/{}", issued.token.as_str())
        );
        assert_eq!(issued.target.as_str(), "http://example.com");
        let stored = links.lookup(issued.token.as_str()).expect("stored");
        assert_eq!(stored.target(), &issued.target);
        assert_eq!(stored.remaining_uses(), 1);
        assert_eq!(stored.expires_at(), issued.expires_at);
    }

    #[test]
    fn test_issue_denylisted_target_stores_nothing() {
        let (svc, links) = service("wand.example", &["localhost:6060"]);

        let err = svc
            .issue("localhost:6060", true, &IssueOptions::default())
            .unwrap_err();

        assert!(matches!(err, IssueError::Denied { .. }));
        assert_eq!(err.to_string(), "invalid target");
        assert!(links.is_empty());
    }

    #[test]
    fn test_issue_with_path_is_invalid_target() {
        let (svc, links) = service("wand.example", &[]);

        let err = svc
            .issue("example.com/secret", false, &IssueOptions::default())
            .unwrap_err();

        assert!(matches!(err, IssueError::InvalidTarget(TargetError::NotAnOrigin(_))));
        assert!(err.is_validation());
        assert!(links.is_empty());
    }

    #[test]
    fn test_issue_params_missing_target_is_invalid_target() {
        let (svc, _) = service("wand.example", &[]);

        let err = svc.issue_params(&IssueParams::default()).unwrap_err();

        assert!(matches!(err, IssueError::InvalidTarget(TargetError::Missing)));
        assert_eq!(err.to_string(), "target URL not provided");
    }

    #[test]
    fn test_issue_params_tls_hint_produces_https_target() {
        let (svc, _) = service("wand.example", &[]);
        let params = IssueParams::from_query("target=example.com&TLS").unwrap();

        let issued = svc.issue_params(&params).unwrap();

        assert_eq!(issued.target.as_str(), "https://example.com");
    }
}
