//! Per-request context threaded through every pipeline stage.

use crate::models::route::Route;
use actix_web::http::header::HeaderMap;
use actix_web::http::{Method, StatusCode};
use actix_web::web::Bytes;
use ahash::HashMap as AHashMap;
use futures_util::stream::BoxStream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Response body produced by the pipeline.
///
/// The proxy streams upstream bodies through without a full-buffer copy;
/// everything the gateway generates itself (aborts, CORS pre-flights) is a
/// small owned buffer.
pub enum ResponseBody {
    Empty,
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, crate::models::error::GatewayError>>),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Empty => write!(f, "ResponseBody::Empty"),
            ResponseBody::Full(b) => write!(f, "ResponseBody::Full({} bytes)", b.len()),
            ResponseBody::Stream(_) => write!(f, "ResponseBody::Stream"),
        }
    }
}

/// One upstream forwarding attempt, recorded for the access log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendAttempt {
    /// `host:port` of the chosen node, or `no-node` when selection failed.
    pub node: String,
    pub url: String,
    pub method: String,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Error recorded on the context while processing a request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContextError {
    pub code: String,
    pub message: String,
}

/// Pipeline timing stamps, monotonic, relative to request receipt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub route_matched: Option<Instant>,
    pub upstream_sent: Option<Instant>,
    pub upstream_received: Option<Instant>,
    pub finished: Option<Instant>,
}

/// Per-request state object passed through every handler.
///
/// The context owns an immutable view of the inbound request (method, path,
/// query, headers, buffered body, peer address), mutable routing state
/// filled in as the chain advances, the response under construction, and a
/// small string property map handlers use to talk to each other.
///
/// # Property namespaces
///
/// Each handler owns a key prefix; one writer per key:
///
/// | Prefix | Writer |
/// |---|---|
/// | `user_*` | auth handler (`user_id`, `user_claims`) |
/// | `cors_*` | CORS handler (`cors_origin`) |
/// | `rate_limit_*` | rate limiter (`rate_limit`, `rate_limit_key`, `rate_limit_algorithm`) |
/// | `route_param_*` | router (named path captures) |
///
/// # Abort semantics
///
/// [`Context::abort`] writes the final status and a JSON error body exactly
/// once; later calls are no-ops. The engine stops invoking handlers as soon
/// as the abort flag is up, so the first aborter owns the status code.
pub struct Context {
    // Request
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: Option<SocketAddr>,

    // Identity
    pub request_id: String,
    pub tenant: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub started: Instant,
    /// Deadline derived from server read/write timeouts. Deliberately not
    /// tied to the client connection: the access-log write gets its own
    /// fresh budget after the response goes out.
    pub deadline: Option<Instant>,

    // Routing state
    pub matched_route: Option<Arc<Route>>,
    pub service_id: Option<String>,
    pub node_address: Option<String>,

    // Response under construction
    status: Option<StatusCode>,
    pub response_headers: Vec<(String, String)>,
    pub response_body: ResponseBody,
    pub response_size: u64,

    aborted: bool,
    properties: AHashMap<String, String>,
    errors: Vec<ContextError>,
    pub backend_attempts: Vec<BackendAttempt>,
    pub retry_count: u32,
    pub timings: Timings,
}

impl Context {
    pub fn new(
        method: Method,
        path: String,
        query: String,
        headers: HeaderMap,
        body: Bytes,
        client_addr: Option<SocketAddr>,
    ) -> Self {
        let tenant = headers
            .get("X-Tenant-Id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("default")
            .to_string();

        Self {
            method,
            path,
            query,
            headers,
            body,
            client_addr,
            request_id: Uuid::new_v4().to_string(),
            tenant,
            received_at: chrono::Utc::now(),
            started: Instant::now(),
            deadline: None,
            matched_route: None,
            service_id: None,
            node_address: None,
            status: None,
            response_headers: Vec::new(),
            response_body: ResponseBody::Empty,
            response_size: 0,
            aborted: false,
            properties: AHashMap::default(),
            errors: Vec::new(),
            backend_attempts: Vec::new(),
            retry_count: 0,
            timings: Timings::default(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stores a property. Handlers stay inside their documented namespace.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Returns the property value, `None` when absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }

    pub fn add_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ContextError {
            code: code.into(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> &[ContextError] {
        &self.errors
    }

    /// Aborts the chain: writes `status` with a JSON `{"error": message}`
    /// body. Exactly once — repeated calls leave the first response intact.
    pub fn abort(&mut self, status: StatusCode, message: &str) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        self.status = Some(status);
        let body = serde_json::json!({ "error": message }).to_string();
        self.response_size = body.len() as u64;
        self.response_body = ResponseBody::Full(Bytes::from(body));
        self.response_headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
    }

    /// Abort variant driven by a [`GatewayError`]: records the error, then
    /// aborts with its status code and display message.
    ///
    /// [`GatewayError`]: crate::models::error::GatewayError
    pub fn abort_with(&mut self, err: &crate::models::error::GatewayError) {
        self.add_error(err.code(), err.to_string());
        self.abort(err.status_code(), &err.to_string());
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Sets the success-path response. No-op after an abort.
    pub fn respond(&mut self, status: StatusCode, body: ResponseBody) {
        if self.aborted {
            return;
        }
        self.status = Some(status);
        if let ResponseBody::Full(b) = &body {
            self.response_size = b.len() as u64;
        }
        self.response_body = body;
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Adds a header to the client response.
    pub fn insert_response_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.response_headers.push((name.into(), value.into()));
    }

    /// Client IP string, used by limiter keys and the ip-hash balancer.
    pub fn client_ip(&self) -> Option<String> {
        self.client_addr.map(|a| a.ip().to_string())
    }

    pub fn route_id(&self) -> Option<&str> {
        self.matched_route.as_ref().map(|r| r.id.as_str())
    }

    /// Terminal stage bookkeeping: records the end stamp.
    pub fn finish(&mut self) {
        self.timings.finished = Some(Instant::now());
    }

    /// Total elapsed time; falls back to "now" while still in flight.
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.timings.finished.unwrap_or_else(Instant::now);
        end.duration_since(self.started).as_millis() as u64
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("tenant", &self.tenant)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("status", &self.status)
            .field("aborted", &self.aborted)
            .finish()
    }
}
