//! Access-log records and their asynchronous writer.
//!
//! One record per request, emitted as a JSON line through the `log` facade
//! under the `access` target; the sink behind it (stdout, file shipper,
//! message queue) is external to the core. The write happens on its own
//! spawned task with a fresh 30-second budget, deliberately decoupled from
//! the request's cancellation so a client disconnect never loses the log
//! line for the response that already went out.

use crate::pipeline::context::{BackendAttempt, Context};
use log::{debug, info};
use serde::Serialize;
use std::time::Duration;

/// Deadline for one access-log write, independent of the request deadline.
const WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Timing breakdown in milliseconds since the request was received.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimingBreakdown {
    /// Receive → route matched.
    pub route_matched_ms: Option<u64>,
    /// Receive → outbound request sent.
    pub upstream_sent_ms: Option<u64>,
    /// Receive → upstream response headers received.
    pub upstream_received_ms: Option<u64>,
    /// Receive → response handed to the client.
    pub total_ms: u64,
}

/// One request's access-log record.
#[derive(Debug, Serialize)]
pub struct AccessRecord {
    pub request_id: String,
    pub tenant: String,
    pub instance_id: String,
    pub received_at: String,
    pub client_ip: Option<String>,
    pub client_port: Option<u16>,
    pub method: String,
    pub path: String,
    pub query: String,
    pub route_id: Option<String>,
    pub service_id: Option<String>,
    pub node: Option<String>,
    pub status: u16,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub timings: TimingBreakdown,
    pub attempts: Vec<BackendAttempt>,
}

impl AccessRecord {
    /// Snapshots a finished context into a record.
    pub fn from_context(ctx: &Context, instance_id: &str) -> Self {
        let offset = |instant: Option<std::time::Instant>| {
            instant.map(|at| at.duration_since(ctx.started).as_millis() as u64)
        };

        let first_error = ctx.errors().first();

        Self {
            request_id: ctx.request_id.clone(),
            tenant: ctx.tenant.clone(),
            instance_id: instance_id.to_string(),
            received_at: ctx.received_at.to_rfc3339(),
            client_ip: ctx.client_ip(),
            client_port: ctx.client_addr.map(|a| a.port()),
            method: ctx.method.to_string(),
            path: ctx.path.clone(),
            query: ctx.query.clone(),
            route_id: ctx.route_id().map(|s| s.to_string()),
            service_id: ctx.service_id.clone(),
            node: ctx.node_address.clone(),
            status: ctx.status().map(|s| s.as_u16()).unwrap_or(0),
            request_bytes: ctx.body.len() as u64,
            response_bytes: ctx.response_size,
            error_code: first_error.map(|e| e.code.clone()),
            error_message: first_error.map(|e| e.message.clone()),
            retry_count: ctx.retry_count,
            timings: TimingBreakdown {
                route_matched_ms: offset(ctx.timings.route_matched),
                upstream_sent_ms: offset(ctx.timings.upstream_sent),
                upstream_received_ms: offset(ctx.timings.upstream_received),
                total_ms: ctx.elapsed_ms(),
            },
            attempts: ctx.backend_attempts.clone(),
        }
    }
}

/// Writes the record on a detached task with a fresh deadline.
///
/// Best-effort by design: the response is already on the wire, so a slow or
/// failing sink must never affect it.
pub fn spawn_access_log(record: AccessRecord) {
    tokio::spawn(async move {
        if tokio::time::timeout(WRITE_DEADLINE, write_record(&record))
            .await
            .is_err()
        {
            debug!("access log write for {} timed out", record.request_id);
        }
    });
}

async fn write_record(record: &AccessRecord) {
    match serde_json::to_string(record) {
        Ok(line) => info!(target: "access", "{}", line),
        Err(e) => debug!("failed to serialize access record: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderMap;
    use actix_web::http::{Method, StatusCode};
    use actix_web::web::Bytes;
    use crate::pipeline::context::ResponseBody;

    fn finished_ctx() -> Context {
        let mut ctx = Context::new(
            Method::GET,
            "/api/users".to_string(),
            "page=2".to_string(),
            HeaderMap::new(),
            Bytes::from_static(b"body"),
            Some("10.0.0.9:40123".parse().unwrap()),
        );
        ctx.respond(StatusCode::OK, ResponseBody::Empty);
        ctx.finish();
        ctx
    }

    #[test]
    fn record_captures_request_identity() {
        let ctx = finished_ctx();
        let record = AccessRecord::from_context(&ctx, "gw-test");
        assert_eq!(record.instance_id, "gw-test");
        assert_eq!(record.method, "GET");
        assert_eq!(record.path, "/api/users");
        assert_eq!(record.query, "page=2");
        assert_eq!(record.status, 200);
        assert_eq!(record.request_bytes, 4);
        assert_eq!(record.client_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(record.client_port, Some(40123));
    }

    #[test]
    fn record_serializes_to_one_json_line() {
        let ctx = finished_ctx();
        let record = AccessRecord::from_context(&ctx, "gw-test");
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["status"], 200);
        assert_eq!(parsed["tenant"], "default");
    }

    #[test]
    fn errors_surface_in_record() {
        let mut ctx = finished_ctx();
        ctx.add_error("upstream_error", "connection refused");
        let record = AccessRecord::from_context(&ctx, "gw-test");
        assert_eq!(record.error_code.as_deref(), Some("upstream_error"));
        assert_eq!(record.error_message.as_deref(), Some("connection refused"));
    }
}
