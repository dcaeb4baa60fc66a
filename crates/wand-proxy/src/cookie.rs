//! The session credential cookie.

use hyper::HeaderMap;
use hyper::header::{COOKIE, HeaderValue, InvalidHeaderValue};
use wand_session::Grant;

/// RFC 7231 IMF-fixdate, the format `Expires` wants.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Reads and issues the cookie that carries a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCookie {
    name: String,
    secure: bool,
}

impl CredentialCookie {
    /// A `Secure` cookie called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secure: true,
        }
    }

    /// Sets whether the `Secure` attribute is emitted. Only turn it off
    /// when the proxy is reached over plain HTTP (local testing).
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finds this cookie's value in the request headers.
    ///
    /// Every `Cookie` header and every pair within it is scanned; the first
    /// pair with a matching name wins.
    pub fn read<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value.trim_matches('"'))
            .filter(|value| !value.is_empty())
    }

    /// Builds the `Set-Cookie` value for a fresh grant. The cookie expires
    /// exactly when the session does.
    pub fn issue(&self, grant: &Grant) -> Result<HeaderValue, InvalidHeaderValue> {
        let expires = grant.valid_until.format(HTTP_DATE);
        let secure = if self.secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!(
            "{}={}; Expires={expires}; Path=/; HttpOnly; SameSite=Lax{secure}",
            self.name,
            grant.session_id.as_str(),
        ))
    }
}

impl Default for CredentialCookie {
    fn default() -> Self {
        Self::new("session")
    }
}
