//! Streaming request forwarding to a session's target.
//!
//! The inbound method, headers and body go upstream unchanged, with two
//! exceptions: hop-by-hop headers are dropped, and `Host` is set to the
//! target's authority. The upstream response comes back the same way.
//! Bodies stream in both directions; nothing is buffered.
//!
//! Cancellation is cooperative. When the client goes away, hyper drops
//! the response future and body, which drops the in-flight `reqwest`
//! request and its byte stream, closing the upstream connection.

use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{BodyDataStream, BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response};
use reqwest::redirect::Policy;
use tracing::debug;
use wand_session::Target;

use crate::{BoxError, ProxyBody, ProxyError};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Sends requests to targets with a shared connection pool.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Builds a forwarder. Upstream redirects are handed back to the
    /// client rather than followed.
    pub fn new(connect_timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .map_err(ProxyError::Client)?;
        Ok(Self { client })
    }

    /// Forwards `req` to `target`.
    ///
    /// `path_override` replaces the inbound path and query (used to send
    /// a redemption request to the target root).
    ///
    /// # Errors
    /// [`ProxyError::Upstream`] if the target can't be reached or the
    /// exchange fails before response headers arrive.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        target: &Target,
        path_override: Option<&str>,
    ) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let path = path_override
            .or_else(|| parts.uri.path_and_query().map(|pq| pq.as_str()))
            .unwrap_or("/");
        let url = target.join(path);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.insert(header::HOST, HeaderValue::from_str(target.authority())?);

        debug!(method = %parts.method, %url, "forwarding upstream");
        let mut upstream = self.client.request(parts.method, &url).headers(headers);
        if !body.is_end_stream() {
            upstream = upstream.body(reqwest::Body::wrap_stream(BodyDataStream::new(body)));
        }
        let upstream = upstream.send().await.map_err(ProxyError::Upstream)?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let stream = upstream
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(BoxError::from);
        let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Removes the fixed hop-by-hop set plus anything named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in &named {
        headers.remove(name);
    }
}
