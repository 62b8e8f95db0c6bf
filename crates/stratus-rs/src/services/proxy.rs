//! Upstream forwarding: node selection, request rewrite, streaming relay.
//!
//! The proxy is the last pipeline stage. It resolves the matched route's
//! service, asks the load balancer for a node, rewrites the outbound
//! request, forwards with timeouts and bounded retries (fresh node pick per
//! attempt), and streams the upstream body back without buffering it. Every
//! attempt leaves a backend-trace record on the context for the access log.

use crate::models::error::GatewayError;
use crate::models::route::{Route, RetryPolicy};
use crate::models::settings::ProxySettings;
use crate::pipeline::context::{BackendAttempt, ResponseBody};
use crate::pipeline::{Closable, Context, Handler};
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::health::HealthChecker;
use crate::services::load_balancer::{BalancerInput, LoadBalancer, LoadBalancerFactory};
use crate::services::registry::{NodeState, ServiceRegistry};
use crate::utils::path::{build_upstream_url, rewrite_path};
use actix_web::http::StatusCode;
use ahash::HashMap as AHashMap;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{HeaderMap as UpstreamHeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request headers never forwarded upstream.
const SKIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "te",
    "trailer",
];

/// Upstream response headers never relayed to the client.
const SKIP_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

/// Forwarding stage and owner of the generation's background machinery.
pub struct ProxyHandler {
    client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    balancers: AHashMap<String, Arc<dyn LoadBalancer>>,
    breakers: AHashMap<String, Arc<CircuitBreaker>>,
    health_checker: HealthChecker,
    read_timeout: Duration,
}

impl ProxyHandler {
    /// Builds the proxy for one generation: pooled upstream client, one
    /// balancer per service, breakers where configured, and the health
    /// checker tasks.
    pub fn new(settings: &ProxySettings, registry: Arc<ServiceRegistry>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| format!("failed to build upstream client: {}", e))?;

        let mut balancers: AHashMap<String, Arc<dyn LoadBalancer>> = AHashMap::default();
        let mut breakers = AHashMap::default();
        for entry in registry.entries() {
            balancers.insert(
                entry.def.id.clone(),
                LoadBalancerFactory::create(entry.def.strategy),
            );
            if let Some(cb) = &entry.def.circuit_breaker {
                breakers.insert(
                    entry.def.id.clone(),
                    CircuitBreaker::new(entry.def.id.clone(), cb),
                );
            }
        }

        let health_checker = HealthChecker::start(&registry);

        Ok(Self {
            client,
            registry,
            balancers,
            breakers,
            health_checker,
            read_timeout: Duration::from_secs(settings.read_timeout_secs),
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    fn upstream_method(&self, ctx: &Context) -> reqwest::Method {
        reqwest::Method::from_bytes(ctx.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET)
    }

    /// Converts and filters inbound headers for the outbound request.
    fn build_upstream_headers(&self, ctx: &Context, route: &Route) -> UpstreamHeaderMap {
        let mut headers = UpstreamHeaderMap::with_capacity(ctx.headers.len() + 2);

        let removed: Vec<String> = route
            .headers
            .as_ref()
            .map(|f| {
                f.remove_request_headers
                    .iter()
                    .map(|h| h.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        for (name, value) in ctx.headers.iter() {
            let lower = name.as_str().to_ascii_lowercase();
            if SKIP_REQUEST_HEADERS.contains(&lower.as_str()) || removed.contains(&lower) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_ref()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.insert(name, value);
            }
        }

        if let Some(filter) = &route.headers {
            for (name, value) in &filter.add_request_headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
        }

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            headers.insert(HeaderName::from_static("x-request-id"), value);
        }
        if let Some(ip) = ctx.client_ip() {
            if let Ok(value) = HeaderValue::from_str(&ip) {
                headers.insert(HeaderName::from_static("x-forwarded-for"), value);
            }
        }

        headers
    }

    /// Relays upstream response headers onto the context.
    fn relay_response_headers(&self, ctx: &mut Context, route: &Route, response: &reqwest::Response) {
        let removed: Vec<String> = route
            .headers
            .as_ref()
            .map(|f| {
                f.remove_response_headers
                    .iter()
                    .map(|h| h.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        for (name, value) in response.headers() {
            let lower = name.as_str().to_ascii_lowercase();
            if SKIP_RESPONSE_HEADERS.contains(&lower.as_str()) || removed.contains(&lower) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                ctx.insert_response_header(name.as_str().to_string(), value.to_string());
            }
        }

        if let Some(filter) = &route.headers {
            for (name, value) in &filter.add_response_headers {
                ctx.insert_response_header(name.clone(), value.clone());
            }
        }
    }

    /// Per-attempt timeout: the configured read timeout, clipped to
    /// whatever remains of the request deadline.
    fn attempt_timeout(&self, ctx: &Context) -> Option<Duration> {
        match ctx.deadline {
            Some(deadline) => {
                let remaining = deadline.checked_duration_since(Instant::now())?;
                Some(self.read_timeout.min(remaining))
            }
            None => Some(self.read_timeout),
        }
    }

    fn retry_plan(&self, ctx: &Context, route: &Route) -> (Option<RetryPolicy>, u32) {
        let idempotent = matches!(
            ctx.method.as_str(),
            "GET" | "HEAD" | "OPTIONS"
        );
        match &route.retry {
            Some(policy) if idempotent || policy.retry_all_methods => {
                (Some(policy.clone()), policy.max_retries + 1)
            }
            _ => (None, 1),
        }
    }

    fn record_attempt(
        ctx: &mut Context,
        node: &NodeState,
        url: &str,
        started: Instant,
        status: Option<u16>,
        response_bytes: u64,
        error: Option<String>,
    ) {
        let attempt = BackendAttempt {
            node: node.config.address(),
            url: url.to_string(),
            method: ctx.method.to_string(),
            request_bytes: ctx.body.len() as u64,
            response_bytes,
            status,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        ctx.backend_attempts.push(attempt);
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn handle(&self, ctx: &mut Context) -> bool {
        let route = match ctx.matched_route.clone() {
            Some(route) => route,
            None => {
                ctx.abort_with(&GatewayError::Config {
                    message: "proxy reached without a matched route".to_string(),
                });
                return false;
            }
        };

        let entry = match self.registry.get(&route.service_id) {
            Some(entry) => entry,
            None => {
                ctx.abort_with(&GatewayError::UnknownService {
                    service_id: route.service_id.clone(),
                });
                return false;
            }
        };

        if let Some(breaker) = self.breakers.get(&entry.def.id) {
            if !breaker.try_acquire() {
                ctx.abort_with(&GatewayError::CircuitOpen {
                    service_id: entry.def.id.clone(),
                });
                return false;
            }
        }

        let balancer = match self.balancers.get(&entry.def.id) {
            Some(balancer) => balancer.clone(),
            None => {
                ctx.abort_with(&GatewayError::Config {
                    message: format!("no balancer for service {}", entry.def.id),
                });
                return false;
            }
        };

        let (retry, max_attempts) = self.retry_plan(ctx, &route);
        let method = self.upstream_method(ctx);
        let forward_path = rewrite_path(&route, &ctx.path);
        let headers = self.build_upstream_headers(ctx, &route);
        let body = ctx.body.clone();
        let breaker = self.breakers.get(&entry.def.id).cloned();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                ctx.retry_count += 1;
                let backoff = retry
                    .as_ref()
                    .map(|r| r.calculate_backoff(attempt - 1))
                    .unwrap_or(0);
                if backoff > 0 {
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }

            let eligible = entry.eligible_nodes();
            if eligible.is_empty() {
                ctx.abort_with(&GatewayError::NoHealthyUpstream {
                    service_id: entry.def.id.clone(),
                });
                return false;
            }

            let client_ip = ctx.client_ip();
            let input = BalancerInput {
                client_ip: client_ip.as_deref(),
                hash_key: ctx
                    .get("user_id")
                    .or_else(|| ctx.get("rate_limit_key"))
                    .or(Some(ctx.path.as_str())),
            };
            let node = match balancer.select(&eligible, input) {
                Some(node) => node,
                None => {
                    ctx.abort_with(&GatewayError::NoHealthyUpstream {
                        service_id: entry.def.id.clone(),
                    });
                    return false;
                }
            };

            let url = build_upstream_url(&node.config.base_url(), &forward_path, &ctx.query);
            let timeout = match self.attempt_timeout(ctx) {
                Some(timeout) => timeout,
                None => {
                    ctx.abort_with(&GatewayError::Timeout {
                        timeout_secs: self.read_timeout.as_secs(),
                    });
                    return false;
                }
            };

            if attempt > 0 {
                warn!("retry attempt {} for {} via {}", attempt, ctx.path, url);
            } else {
                debug!("forwarding {} {} to {}", ctx.method, ctx.path, url);
            }

            node.begin_request();
            ctx.timings.upstream_sent = Some(Instant::now());
            let started = Instant::now();
            let result = self
                .client
                .request(method.clone(), &url)
                .headers(headers.clone())
                .body(body.clone())
                .timeout(timeout)
                .send()
                .await;
            node.end_request();

            match result {
                Err(e) => {
                    Self::record_attempt(ctx, &node, &url, started, None, 0, Some(e.to_string()));
                    if let Some(breaker) = &breaker {
                        breaker.record_failure();
                    }

                    let connection_retry = retry
                        .as_ref()
                        .map(|r| r.retry_on_connection_error)
                        .unwrap_or(false);
                    if connection_retry && attempt + 1 < max_attempts {
                        warn!("upstream error from {}, will retry: {}", url, e);
                        continue;
                    }

                    let error = if e.is_timeout() {
                        GatewayError::Timeout {
                            timeout_secs: timeout.as_secs(),
                        }
                    } else {
                        GatewayError::Upstream {
                            message: e.to_string(),
                            url: url.clone(),
                            status: None,
                        }
                    };
                    ctx.abort_with(&error);
                    return false;
                }
                Ok(response) => {
                    let status = response.status().as_u16();

                    let status_retry = retry
                        .as_ref()
                        .map(|r| r.retry_on_status_codes.contains(&status))
                        .unwrap_or(false);
                    if status_retry && attempt + 1 < max_attempts {
                        Self::record_attempt(ctx, &node, &url, started, Some(status), 0, None);
                        if let Some(breaker) = &breaker {
                            breaker.record_failure();
                        }
                        warn!("retryable status {} from {}", status, url);
                        continue;
                    }

                    if let Some(breaker) = &breaker {
                        if status >= 500 {
                            breaker.record_failure();
                        } else {
                            breaker.record_success();
                        }
                    }

                    ctx.timings.upstream_received = Some(Instant::now());
                    let content_length = response.content_length().unwrap_or(0);
                    Self::record_attempt(
                        ctx,
                        &node,
                        &url,
                        started,
                        Some(status),
                        content_length,
                        None,
                    );
                    ctx.node_address = Some(node.config.address());
                    self.relay_response_headers(ctx, &route, &response);
                    ctx.response_size = content_length;

                    let status_code = StatusCode::from_u16(status)
                        .unwrap_or(StatusCode::BAD_GATEWAY);
                    let stream_url = url.clone();
                    // Stream the body through; a mid-stream upstream error
                    // surfaces as a terminated transfer, never a second
                    // status code.
                    let stream = response
                        .bytes_stream()
                        .map(move |chunk| {
                            chunk.map_err(|e| GatewayError::Upstream {
                                message: e.to_string(),
                                url: stream_url.clone(),
                                status: None,
                            })
                        })
                        .boxed();
                    ctx.respond(status_code, ResponseBody::Stream(stream));
                    return true;
                }
            }
        }

        // All attempts consumed without a terminal verdict.
        ctx.abort_with(&GatewayError::Upstream {
            message: format!("all {} attempts exhausted", max_attempts),
            url: ctx.path.clone(),
            status: None,
        });
        false
    }
}

#[async_trait]
impl Closable for ProxyHandler {
    async fn close(&self) -> Result<(), String> {
        // The health checker owns this generation's background tasks.
        self.health_checker.close().await
    }
}
