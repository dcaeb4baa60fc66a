//! Integration tests for the assembled server: issuance endpoint, proxy
//! and shutdown, all on real sockets.

use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::header::{COOKIE, HOST, SET_COOKIE};
use hyper::{Request, Response, StatusCode};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use wand::prelude::*;
use wand_proxy::{ConnectionId, Handler, HttpListener, ProxyBody, full};

// =========================================================================
// Helpers
// =========================================================================

/// Upstream that replies with `path host=HOST`.
struct Echo;

impl Handler for Echo {
    async fn handle(&self, req: Request<Incoming>, _conn: ConnectionId) -> Response<ProxyBody> {
        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let path = req.uri().path_and_query().map(|pq| pq.to_string());
        Response::new(full(format!("{} host={host}", path.unwrap_or_default())))
    }
}

struct Running {
    proxy: String,
    api: String,
    upstream: String,
    client: reqwest::Client,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), WandError>>,
    _upstream_shutdown: watch::Sender<bool>,
}

async fn start(invalid: &[&str]) -> Running {
    let (upstream_shutdown, rx) = watch::channel(false);
    let upstream = HttpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    tokio::spawn(upstream.serve(Arc::new(Echo), rx));

    let server = WandServer::builder()
        .domain("wand.example")
        .bind("127.0.0.1:0")
        .api("127.0.0.1:0")
        .invalid(invalid.iter().copied())
        .cookie(CredentialCookie::default().secure(false))
        .build()
        .await
        .unwrap();
    let proxy = server.local_addr().unwrap();
    let api = server.api_addr().unwrap().unwrap();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    Running {
        proxy: format!("http://{proxy}"),
        api: format!("http://{api}"),
        upstream: upstream_addr.to_string(),
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap(),
        shutdown,
        task,
        _upstream_shutdown: upstream_shutdown,
    }
}

impl Running {
    async fn issue(&self, query: &str) -> (StatusCode, serde_json::Value) {
        let response = self
            .client
            .get(format!("{}/?{query}", self.api))
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.bytes().await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Rewrites an issued link onto the proxy's real address.
    fn via_proxy(&self, link: &str) -> String {
        let token = link.rsplit('/').next().unwrap();
        format!("{}/{token}", self.proxy)
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
    }
}

// =========================================================================
// Issue, redeem, reuse
// =========================================================================

#[tokio::test]
async fn test_issue_redeem_then_reuse_is_refused() {
    let wand = start(&[]).await;

    let (status, reply) = wand
        .issue(&format!("target={}&link_uses=1", wand.upstream))
        .await;
    assert_eq!(status, StatusCode::OK);
    let link = reply["link"].as_str().unwrap().to_string();
    assert!(link.starts_with("https://wand.example/"), "{link}");

    let first = wand.client.get(wand.via_proxy(&link)).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let cookie = first.headers()[SET_COOKIE].to_str().unwrap().to_string();
    let cookie = cookie.split(';').next().unwrap().to_string();
    assert_eq!(
        first.text().await.unwrap(),
        format!("/ host={}", wand.upstream)
    );

    let second = wand.client.get(wand.via_proxy(&link)).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);

    let browsing = wand
        .client
        .get(format!("{}/docs?page=2", wand.proxy))
        .header(COOKIE, cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(browsing.status(), StatusCode::OK);
    assert!(browsing.text().await.unwrap().starts_with("/docs?page=2 "));

    wand.stop().await;
}

#[tokio::test]
async fn test_issue_with_tls_hint_succeeds() {
    let wand = start(&[]).await;

    let (status, reply) = wand.issue("target=example.com&TLS").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status_code"], 200);
    assert!(reply["error"].is_null());
    wand.stop().await;
}

// =========================================================================
// Denylist
// =========================================================================

#[tokio::test]
async fn test_issue_denylisted_target_is_400() {
    let wand = start(&["secret.internal"]).await;

    let (status, reply) = wand.issue("target=secret.internal").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["error"], "invalid target");
    assert!(reply["link"].is_null());
    wand.stop().await;
}

#[tokio::test]
async fn test_issue_link_to_issuance_endpoint_is_refused() {
    let wand = start(&[]).await;
    let api_host = wand.api.trim_start_matches("http://").to_string();
    let port = api_host.rsplit(':').next().unwrap().to_string();

    for target in [api_host, format!("localhost:{port}"), "wand.example".into()] {
        let (status, reply) = wand.issue(&format!("target={target}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{target}");
        assert_eq!(reply["error"], "invalid target", "{target}");
    }
    wand.stop().await;
}

#[tokio::test]
async fn test_issue_without_target_is_400() {
    let wand = start(&[]).await;

    let (status, reply) = wand.issue("link_uses=2").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["status_code"], 400);
    wand.stop().await;
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let wand = start(&[]).await;
    let proxy = wand.proxy.clone();
    let client = wand.client.clone();

    wand.stop().await;

    let result = client.get(format!("{proxy}/")).send().await;
    assert!(result.is_err(), "proxy should be closed after shutdown");
}
