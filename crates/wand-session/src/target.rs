//! The origin a link (and every session it creates) is bound to.

use std::fmt;

use url::Url;

use crate::TargetError;

/// A validated proxy destination: scheme, host and optional port.
///
/// The canonical form is the ASCII origin serialization, e.g.
/// `http://example.com` or `https://10.0.0.5:8443`. Hosts are
/// lower-cased and default ports dropped, so two spellings of the same
/// origin compare equal. That canonical string is what denylists match
/// against and what sessions report as their target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    origin: String,
    authority: String,
}

impl Target {
    /// Builds a target from user input that names a host (optionally
    /// with a port) but no scheme. The scheme comes from `tls`.
    ///
    /// ```rust
    /// use wand_session::Target;
    ///
    /// let target = Target::parse("Example.COM", false).unwrap();
    /// assert_eq!(target.to_string(), "http://example.com");
    /// ```
    pub fn parse(host: &str, tls: bool) -> Result<Self, TargetError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(TargetError::Missing);
        }
        let scheme = if tls { "https" } else { "http" };
        Self::parse_url(&format!("{scheme}://{host}"))
    }

    /// Builds a target from a full URL that already carries its scheme.
    pub fn parse_url(input: &str) -> Result<Self, TargetError> {
        let url = Url::parse(input.trim())
            .map_err(|e| TargetError::Malformed(e.to_string()))?;
        Self::from_url(&url)
    }

    fn from_url(url: &Url) -> Result<Self, TargetError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TargetError::UnsupportedScheme(url.scheme().to_string()));
        }
        let Some(host) = url.host_str() else {
            return Err(TargetError::Malformed("missing host".into()));
        };
        let has_extras = !url.username().is_empty()
            || url.password().is_some()
            || url.path() != "/"
            || url.query().is_some()
            || url.fragment().is_some();
        if has_extras {
            return Err(TargetError::NotAnOrigin(url.to_string()));
        }

        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self {
            origin: url.origin().ascii_serialization(),
            authority,
        })
    }

    /// The canonical origin string (`scheme://host[:port]`).
    pub fn as_str(&self) -> &str {
        &self.origin
    }

    /// `host[:port]`, suitable for a `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Returns `true` for `https` targets.
    pub fn is_tls(&self) -> bool {
        self.origin.starts_with("https://")
    }

    /// The absolute upstream URL for a request path (and query).
    ///
    /// `path_and_query` should start with `/`; one is inserted if not.
    pub fn join(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{path_and_query}", self.origin)
        } else {
            format!("{}/{path_and_query}", self.origin)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin)
    }
}
