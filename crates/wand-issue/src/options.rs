//! Issuance parameters and the default/clamp policy.
//!
//! Every numeric option follows the same rule: absent or unparseable input
//! takes the default, anything else is clamped into `[min, max]`. Input is
//! never rejected for being out of range; a warning is logged instead.
//!
//! | option | default | min | max |
//! |---|---|---|---|
//! | `ses_duration` | 30m | 1m | 180m |
//! | `expires_in` | 5m | 30s | 10m |
//! | `link_uses` | 1 | 1 | 5 |

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::IssueError;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Default and inclusive range for one option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds<T> {
    pub default: T,
    pub min: T,
    pub max: T,
}

impl<T: Ord + Copy> Bounds<T> {
    /// Clamps `value` into `[min, max]`.
    pub fn clamp(&self, value: T) -> T {
        value.clamp(self.min, self.max)
    }
}

const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

/// How long sessions created from a link stay valid.
pub const SESSION_DURATION: Bounds<Duration> = Bounds {
    default: minutes(30),
    min: minutes(1),
    max: minutes(180),
};

/// How long a link can be redeemed for after issuance.
pub const LINK_EXPIRY: Bounds<Duration> = Bounds {
    default: minutes(5),
    min: Duration::from_secs(30),
    max: minutes(10),
};

/// How many times a link can be redeemed.
pub const LINK_USES: Bounds<i64> = Bounds {
    default: 1,
    min: 1,
    max: 5,
};

// ---------------------------------------------------------------------------
// IssueParams
// ---------------------------------------------------------------------------

/// Raw issuance parameters as they arrive in a query string.
///
/// All fields are optional strings; interpretation happens in
/// [`IssueOptions::from_params`] and [`IssuanceService::issue_params`](crate::IssuanceService::issue_params).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IssueParams {
    /// Host (and optional port) to proxy to. Required.
    pub target: Option<String>,
    /// Present means `https`. The value is ignored.
    #[serde(rename = "TLS", alias = "tls")]
    pub tls: Option<String>,
    /// Link expiry, e.g. `90s` or `5m`.
    pub expires_in: Option<String>,
    /// Number of redemptions allowed.
    pub link_uses: Option<String>,
    /// Session validity, e.g. `1h30m`.
    pub ses_duration: Option<String>,
}

impl IssueParams {
    /// Decodes `target=...&TLS&expires_in=...` style query strings.
    ///
    /// ```rust
    /// use wand_issue::IssueParams;
    ///
    /// let params = IssueParams::from_query("target=example.com&TLS").unwrap();
    /// assert_eq!(params.target.as_deref(), Some("example.com"));
    /// assert!(params.wants_tls());
    /// ```
    pub fn from_query(query: &str) -> Result<Self, IssueError> {
        serde_urlencoded::from_str(query).map_err(|e| IssueError::Params(e.to_string()))
    }

    /// Whether the transport hint asks for an `https` target.
    pub fn wants_tls(&self) -> bool {
        self.tls.is_some()
    }
}

// ---------------------------------------------------------------------------
// IssueOptions
// ---------------------------------------------------------------------------

/// Resolved, in-range options for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueOptions {
    pub link_expiry: Duration,
    pub link_uses: u32,
    pub session_duration: Duration,
}

impl Default for IssueOptions {
    fn default() -> Self {
        Self {
            link_expiry: LINK_EXPIRY.default,
            link_uses: LINK_USES.default as u32,
            session_duration: SESSION_DURATION.default,
        }
    }
}

impl IssueOptions {
    /// Applies the default/clamp rule to every numeric parameter.
    pub fn from_params(params: &IssueParams) -> Self {
        let link_expiry = resolve(
            "expires_in",
            params.expires_in.as_deref(),
            &LINK_EXPIRY,
            parse_duration,
        );
        let link_uses = resolve(
            "link_uses",
            params.link_uses.as_deref(),
            &LINK_USES,
            |raw| raw.trim().parse::<i64>().ok(),
        );
        let session_duration = resolve(
            "ses_duration",
            params.ses_duration.as_deref(),
            &SESSION_DURATION,
            parse_duration,
        );

        Self {
            link_expiry,
            // In 1..=5 after clamping.
            link_uses: link_uses as u32,
            session_duration,
        }
    }

    /// Re-applies the clamp rule to options built in code.
    pub fn clamped(self) -> Self {
        let uses = clamp_logged("link_uses", i64::from(self.link_uses), &LINK_USES);
        Self {
            link_expiry: clamp_logged("expires_in", self.link_expiry, &LINK_EXPIRY),
            link_uses: uses as u32,
            session_duration: clamp_logged(
                "ses_duration",
                self.session_duration,
                &SESSION_DURATION,
            ),
        }
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    humantime::parse_duration(raw.trim()).ok()
}

fn resolve<T, F>(name: &'static str, raw: Option<&str>, bounds: &Bounds<T>, parse: F) -> T
where
    T: Ord + Copy + fmt::Debug,
    F: FnOnce(&str) -> Option<T>,
{
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return bounds.default;
    };
    match parse(raw) {
        Some(value) => clamp_logged(name, value, bounds),
        None => {
            warn!(option = name, raw, default = ?bounds.default, "unparseable option, using default");
            bounds.default
        }
    }
}

fn clamp_logged<T>(name: &'static str, value: T, bounds: &Bounds<T>) -> T
where
    T: Ord + Copy + fmt::Debug,
{
    let clamped = bounds.clamp(value);
    if clamped != value {
        warn!(
            option = name,
            requested = ?value,
            clamped = ?clamped,
            "option out of range, clamping"
        );
    }
    clamped
}
