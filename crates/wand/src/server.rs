//! Server builder and lifecycle.
//!
//! [`WandServer`] wires every layer together and runs the proxy listener,
//! the optional issuance listener and the expiry reaper until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use wand_issue::{Denylist, IssuanceService};
use wand_proxy::{CredentialCookie, Forwarder, HttpListener, ProxyDispatcher};
use wand_reaper::{ExpiryReaper, ReaperConfig, Sweep};
use wand_session::{
    AuthCoordinator, Clock, LinkRegistry, OsRandom, RandomSource, SessionStore, SystemClock,
};

use crate::config::Args;
use crate::handler::IssuanceEndpoint;
use crate::WandError;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and creating a [`WandServer`].
///
/// ```rust,no_run
/// # async fn example() -> Result<(), wand::WandError> {
/// use wand::WandServer;
///
/// let server = WandServer::builder()
///     .domain("wand.example")
///     .bind("0.0.0.0:443")
///     .api("127.0.0.1:6060")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct WandServerBuilder {
    domain: String,
    bind_addr: String,
    api_addr: Option<String>,
    invalid: Vec<String>,
    cookie: CredentialCookie,
    reaper_config: ReaperConfig,
    upstream_connect_timeout: Duration,
    header_read_timeout: Duration,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl WandServerBuilder {
    fn new() -> Self {
        Self {
            domain: String::new(),
            bind_addr: "0.0.0.0:443".to_string(),
            api_addr: None,
            invalid: Vec::new(),
            cookie: CredentialCookie::default(),
            reaper_config: ReaperConfig::default(),
            upstream_connect_timeout: Duration::from_secs(10),
            header_read_timeout: HttpListener::DEFAULT_HEADER_READ_TIMEOUT,
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
        }
    }

    /// Applies every setting from parsed command-line arguments.
    pub fn args(self, args: &Args) -> Self {
        let mut builder = self
            .domain(&args.domain)
            .bind(args.listen.to_string())
            .invalid(args.invalid.iter().cloned())
            .cookie(args.cookie())
            .reaper_config(args.reaper_config())
            .upstream_connect_timeout(args.upstream_connect_timeout())
            .header_read_timeout(args.header_read_timeout());
        if let Some(api) = args.api_addr() {
            builder = builder.api(api.to_string());
        }
        builder
    }

    /// Public domain of the proxy, used to build link URLs.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the proxy bind address (e.g., `"0.0.0.0:443"`).
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Serve the issuance endpoint on `addr`. Off unless called.
    pub fn api(mut self, addr: impl Into<String>) -> Self {
        self.api_addr = Some(addr.into());
        self
    }

    /// Add targets links may never point at.
    pub fn invalid<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalid.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn cookie(mut self, cookie: CredentialCookie) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn reaper_config(mut self, config: ReaperConfig) -> Self {
        self.reaper_config = config;
        self
    }

    pub fn upstream_connect_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_connect_timeout = timeout;
        self
    }

    pub fn header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Replace the wall clock (tests drive time by hand).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the randomness source used for tokens and session ids.
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Binds the listeners and wires every layer.
    ///
    /// The issuance endpoint's address, its `localhost` alias and the
    /// public domain are always added to the denylist.
    ///
    /// # Errors
    /// - [`WandError::Config`] if no domain was given
    /// - [`WandError::Proxy`] if a listener can't bind or the upstream
    ///   client can't be built
    pub async fn build(self) -> Result<WandServer, WandError> {
        let domain = self.domain.trim();
        if domain.is_empty() {
            return Err(WandError::Config("domain must not be empty".into()));
        }

        let proxy = HttpListener::bind(self.bind_addr.as_str())
            .await?
            .with_header_read_timeout(self.header_read_timeout);
        let api = match &self.api_addr {
            Some(addr) => Some(
                HttpListener::bind(addr.as_str())
                    .await?
                    .with_header_read_timeout(self.header_read_timeout),
            ),
            None => None,
        };

        let mut denylist: Denylist = self.invalid.iter().collect();
        if let Some(api) = &api {
            let addr = api.local_addr()?;
            denylist.extend(self_addresses(addr));
        }
        denylist.insert(domain);

        let links = Arc::new(LinkRegistry::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.random),
        ));
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.random),
        ));
        let auth = Arc::new(AuthCoordinator::new(
            Arc::clone(&links),
            Arc::clone(&sessions),
        ));
        let issuance = Arc::new(IssuanceService::new(
            Arc::clone(&links),
            Arc::clone(&self.clock),
            denylist,
            domain,
        ));
        let dispatcher = Arc::new(ProxyDispatcher::new(
            auth,
            Arc::clone(&sessions),
            self.cookie,
            Forwarder::new(self.upstream_connect_timeout)?,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            proxy = %proxy.local_addr()?,
            api = ?api.as_ref().and_then(|l| l.local_addr().ok()),
            link_base = issuance.link_base(),
            denylisted = issuance.denylist().len(),
            "server built"
        );

        Ok(WandServer {
            proxy,
            api,
            links,
            sessions,
            issuance,
            dispatcher,
            reaper_config: self.reaper_config,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }
}

impl Default for WandServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Every spelling of the issuance endpoint's own address a link could use.
fn self_addresses(addr: SocketAddr) -> Vec<String> {
    let port = addr.port();
    let mut entries = vec![addr.to_string(), format!("localhost:{port}")];
    if addr.ip().is_unspecified() {
        entries.push(format!("127.0.0.1:{port}"));
        entries.push(format!("[::1]:{port}"));
    }
    entries
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A configured wand server, ready to run.
pub struct WandServer {
    proxy: HttpListener,
    api: Option<HttpListener>,
    links: Arc<LinkRegistry>,
    sessions: Arc<SessionStore>,
    issuance: Arc<IssuanceService>,
    dispatcher: Arc<ProxyDispatcher>,
    reaper_config: ReaperConfig,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WandServer {
    pub fn builder() -> WandServerBuilder {
        WandServerBuilder::new()
    }

    /// The address the proxy is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, WandError> {
        Ok(self.proxy.local_addr()?)
    }

    /// The address the issuance endpoint is bound to, if enabled.
    pub fn api_addr(&self) -> Result<Option<SocketAddr>, WandError> {
        Ok(self.api.as_ref().map(HttpListener::local_addr).transpose()?)
    }

    /// Programmatic issuance, for embedding applications.
    pub fn issuance(&self) -> &Arc<IssuanceService> {
        &self.issuance
    }

    /// A handle that stops [`run`](Self::run) from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Serves until Ctrl-C or [`ShutdownHandle::shutdown`], then stops the
    /// listeners and the reaper.
    pub async fn run(self) -> Result<(), WandError> {
        let mut reaper = ExpiryReaper::new(
            self.reaper_config.clone(),
            Arc::clone(&self.sessions) as Arc<dyn Sweep>,
        );
        if self.reaper_config.evict_expired_links {
            reaper = reaper.with_links(Arc::clone(&self.links) as Arc<dyn Sweep>);
        }
        let reaper = reaper.spawn();

        let proxy = tokio::spawn(
            self.proxy
                .serve(Arc::clone(&self.dispatcher), self.shutdown_rx.clone()),
        );
        let api = self.api.map(|api| {
            let endpoint = Arc::new(IssuanceEndpoint::new(Arc::clone(&self.issuance)));
            tokio::spawn(api.serve(endpoint, self.shutdown_rx.clone()))
        });

        let mut stop = self.shutdown_rx;
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("received ctrl-c, shutting down"),
                Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
            },
            _ = stop_requested(&mut stop) => info!("shutdown requested"),
        }
        self.shutdown_tx.send_replace(true);

        if let Err(e) = proxy.await {
            warn!(error = %e, "proxy listener task failed");
        }
        if let Some(api) = api {
            if let Err(e) = api.await {
                warn!(error = %e, "issuance listener task failed");
            }
        }

        let metrics = reaper.shutdown().await;
        info!(
            ticks = metrics.ticks,
            sessions_evicted = metrics.sessions_evicted,
            links_evicted = metrics.links_evicted,
            failures = metrics.failures,
            "server stopped"
        );
        Ok(())
    }
}

/// Resolves once the shutdown flag is set. A dropped sender counts too.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// Stops a running [`WandServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}
