//! HTTP/1 accept loop shared by the proxy and the management endpoint.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::{Handler, ProxyError};

/// Pause after a failed accept. Errors like EMFILE repeat until a
/// descriptor frees up.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for an accepted connection, attached to its logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A bound TCP listener speaking HTTP/1.1.
pub struct HttpListener {
    listener: TcpListener,
    header_read_timeout: Duration,
}

impl HttpListener {
    /// Default time a client gets to send its request headers.
    pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(120);

    /// Binds to `addr`. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            header_read_timeout: Self::DEFAULT_HEADER_READ_TIMEOUT,
        })
    }

    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` flips to `true` (or its sender
    /// is dropped).
    ///
    /// On shutdown the listener stops accepting and every open connection
    /// is asked to finish its in-flight request and close.
    pub async fn serve<H: Handler>(self, handler: Arc<H>, mut shutdown: watch::Receiver<bool>) {
        let addr = self.listener.local_addr().ok();
        info!(addr = ?addr, "listening");

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, backoff = ?ACCEPT_BACKOFF, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let conn = ConnectionId::next();
            debug!(%conn, %peer, "accepted connection");

            let handler = Arc::clone(&handler);
            let mut shutdown = shutdown.clone();
            let timeout = self.header_read_timeout;
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, Infallible>(handler.handle(req, conn).await) }
                });
                let mut builder = http1::Builder::new();
                builder.timer(TokioTimer::new()).header_read_timeout(timeout);
                let mut connection = pin!(builder.serve_connection(TokioIo::new(stream), service));

                let finished = tokio::select! {
                    result = connection.as_mut() => Some(result),
                    _ = shutdown.changed() => None,
                };
                let result = match finished {
                    Some(result) => result,
                    None => {
                        connection.as_mut().graceful_shutdown();
                        connection.await
                    }
                };
                match result {
                    Ok(()) => debug!(%conn, "connection closed"),
                    Err(e) => debug!(%conn, error = %e, "connection ended with error"),
                }
            });
        }

        info!(addr = ?addr, "listener stopped");
    }
}
