//! The issuance endpoint.
//!
//! Any request to the management listener is an issuance request: its
//! query string carries [`IssueParams`], and the outcome goes to an
//! [`IssuanceRenderer`] to become a response.

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, error};
use wand_issue::{IssuanceService, IssueError, IssueParams, IssuedLink};
use wand_proxy::{ConnectionId, Handler, ProxyBody, full};

/// Turns an issuance outcome into an HTTP response.
pub trait IssuanceRenderer: Send + Sync + 'static {
    fn render(&self, outcome: &Result<IssuedLink, IssueError>) -> Response<ProxyBody>;
}

/// Status code for an issuance outcome: 200, 400 for caller mistakes,
/// 500 otherwise.
pub fn outcome_status(outcome: &Result<IssuedLink, IssueError>) -> StatusCode {
    match outcome {
        Ok(_) => StatusCode::OK,
        Err(e) if e.is_validation() => StatusCode::BAD_REQUEST,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct IssuanceReply<'a> {
    link: Option<&'a str>,
    error: Option<String>,
    status_code: u16,
}

/// Renders `{ "link", "error", "status_code" }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl IssuanceRenderer for JsonRenderer {
    fn render(&self, outcome: &Result<IssuedLink, IssueError>) -> Response<ProxyBody> {
        let status = outcome_status(outcome);
        let reply = match outcome {
            Ok(issued) => IssuanceReply {
                link: Some(&issued.url),
                error: None,
                status_code: status.as_u16(),
            },
            Err(e) => IssuanceReply {
                link: None,
                // Internal failures stay in the log.
                error: Some(if e.is_validation() {
                    e.to_string()
                } else {
                    "internal error".to_string()
                }),
                status_code: status.as_u16(),
            },
        };

        let mut response = match serde_json::to_vec(&reply) {
            Ok(body) => Response::new(full(body)),
            Err(e) => {
                error!(error = %e, "failed to encode issuance reply");
                let mut response = Response::new(full(""));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return response;
            }
        };
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Serves issuance requests on the management listener.
pub struct IssuanceEndpoint<R = JsonRenderer> {
    service: Arc<IssuanceService>,
    renderer: R,
}

impl IssuanceEndpoint {
    pub fn new(service: Arc<IssuanceService>) -> Self {
        Self::with_renderer(service, JsonRenderer)
    }
}

impl<R: IssuanceRenderer> IssuanceEndpoint<R> {
    pub fn with_renderer(service: Arc<IssuanceService>, renderer: R) -> Self {
        Self { service, renderer }
    }

    /// Issues a link from a raw query string and renders the outcome.
    pub fn respond(&self, query: Option<&str>) -> Response<ProxyBody> {
        let outcome = IssueParams::from_query(query.unwrap_or(""))
            .and_then(|params| self.service.issue_params(&params));
        match &outcome {
            Err(e) if !e.is_validation() => error!(error = %e, "issuance failed"),
            _ => {}
        }
        self.renderer.render(&outcome)
    }
}

impl<R: IssuanceRenderer> Handler for IssuanceEndpoint<R> {
    async fn handle(&self, req: Request<Incoming>, conn: ConnectionId) -> Response<ProxyBody> {
        debug!(%conn, method = %req.method(), path = req.uri().path(), "issuance request");
        self.respond(req.uri().query())
    }
}
