//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback, and `main` loads a `.env` file
//! first, so a deployment can be configured entirely from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use wand_proxy::CredentialCookie;
use wand_reaper::ReaperConfig;

use crate::WandError;

/// wand - hand out magic links that unlock a private origin
#[derive(Parser, Debug, Clone)]
#[command(name = "wand")]
#[command(about = "Magic-link gated reverse proxy")]
pub struct Args {
    /// Address the public proxy listens on
    #[arg(long, env = "WAND_LISTEN", default_value = "0.0.0.0:443")]
    pub listen: SocketAddr,

    /// Public domain of the proxy, used to build link URLs
    #[arg(short, long, env = "WAND_DOMAIN")]
    pub domain: String,

    /// Serve the issuance endpoint
    #[arg(long, env = "WAND_API", default_value = "false")]
    pub api: bool,

    /// Address the issuance endpoint listens on
    #[arg(long, env = "WAND_API_LISTEN", default_value = "127.0.0.1:6060")]
    pub api_listen: SocketAddr,

    /// Targets links may never point at (repeatable, or comma separated)
    #[arg(short = 'x', long = "invalid", env = "WAND_INVALID", value_delimiter = ',')]
    pub invalid: Vec<String>,

    /// Name of the session cookie
    #[arg(long, env = "WAND_COOKIE_NAME", default_value = "session")]
    pub cookie_name: String,

    /// Omit the Secure cookie attribute (plain-HTTP deployments only)
    #[arg(long, env = "WAND_INSECURE_COOKIE", default_value = "false")]
    pub insecure_cookie: bool,

    /// Seconds between expiry sweeps
    #[arg(long, env = "WAND_REAP_INTERVAL_SECS", default_value = "60")]
    pub reap_interval_secs: u64,

    /// Also evict expired links during sweeps
    #[arg(long, env = "WAND_EVICT_EXPIRED_LINKS", default_value = "false")]
    pub evict_expired_links: bool,

    /// Connect timeout for upstream requests, in milliseconds
    #[arg(long, env = "WAND_UPSTREAM_CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub upstream_connect_timeout_ms: u64,

    /// Time a client gets to send its request headers, in seconds
    #[arg(long, env = "WAND_HEADER_READ_TIMEOUT_SECS", default_value = "120")]
    pub header_read_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WAND_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "WAND_LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Rejects configurations that can't work before anything binds.
    pub fn validate(&self) -> Result<(), WandError> {
        if self.domain.trim().is_empty() {
            return Err(WandError::Config("domain must not be empty".into()));
        }
        if self.api && self.api_listen == self.listen {
            return Err(WandError::Config(format!(
                "issuance endpoint and proxy can't share {}",
                self.listen
            )));
        }
        if !is_cookie_name(&self.cookie_name) {
            return Err(WandError::Config(format!(
                "invalid cookie name {:?}",
                self.cookie_name
            )));
        }
        Ok(())
    }

    /// The issuance listener, if the endpoint is enabled.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api.then_some(self.api_listen)
    }

    pub fn cookie(&self) -> CredentialCookie {
        CredentialCookie::new(self.cookie_name.clone()).secure(!self.insecure_cookie)
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.reap_interval_secs),
            evict_expired_links: self.evict_expired_links,
        }
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_connect_timeout_ms)
    }

    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_secs(self.header_read_timeout_secs)
    }
}

/// RFC 6265 cookie-name: a non-empty token with no separators.
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}
