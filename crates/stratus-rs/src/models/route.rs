use crate::models::settings::{AuthSettings, CorsSettings, RateLimitSettings, SecuritySettings};
use serde::{Deserialize, Serialize};

/// How a route's `path` pattern is matched against request paths.
///
/// Specificity ordering during matching is `Exact` > `Prefix` > `Regex`;
/// among routes of equal specificity a higher `priority` wins, ties broken
/// by configuration order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// The request path must equal `path` byte-for-byte
    /// (after optional trailing-slash normalization).
    Exact,

    /// The request path must start with `path` at a segment boundary.
    Prefix,

    /// `path` is a regular expression, anchored on both ends. Named capture
    /// groups are exposed to the pipeline as `route_param_<name>` context
    /// properties.
    Regex,
}

impl Default for MatchType {
    fn default() -> Self {
        Self::Exact
    }
}

/// Header rewrite rules applied by the proxy for one route.
///
/// # Examples
///
/// ```json
/// {
///   "add_request_headers": [["X-Forwarded-Tenant", "acme"]],
///   "remove_request_headers": ["Cookie"],
///   "add_response_headers": [["Cache-Control", "no-store"]],
///   "remove_response_headers": ["Server"]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HeaderFilter {
    /// Headers inserted on the outbound upstream request.
    #[serde(default)]
    pub add_request_headers: Vec<(String, String)>,

    /// Header names stripped from the outbound upstream request.
    #[serde(default)]
    pub remove_request_headers: Vec<String>,

    /// Headers inserted on the response returned to the client.
    #[serde(default)]
    pub add_response_headers: Vec<(String, String)>,

    /// Header names stripped from the response returned to the client.
    #[serde(default)]
    pub remove_response_headers: Vec<String>,
}

impl HeaderFilter {
    pub fn is_empty(&self) -> bool {
        self.add_request_headers.is_empty()
            && self.remove_request_headers.is_empty()
            && self.add_response_headers.is_empty()
            && self.remove_response_headers.is_empty()
    }
}

/// Retry behavior for transient upstream failures on one route.
///
/// Retries are attempted only for idempotent methods (`GET`, `HEAD`,
/// `OPTIONS`) unless `retry_all_methods` opts the route in explicitly.
/// Every attempt after the first asks the load balancer for a fresh node.
///
/// # Examples
///
/// ```json
/// {
///   "max_retries": 3,
///   "initial_backoff_ms": 100,
///   "max_backoff_ms": 5000,
///   "backoff_multiplier": 2.0,
///   "retry_on_status_codes": [502, 503, 504]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds (default: 100ms).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 5000ms).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// HTTP status codes that should trigger a retry.
    /// Common retryable codes: 502, 503, 504
    #[serde(default = "default_retry_status_codes")]
    pub retry_on_status_codes: Vec<u16>,

    /// Whether to retry on network/connection errors (default: true).
    #[serde(default = "default_retry_on_connection_error")]
    pub retry_on_connection_error: bool,

    /// Retry non-idempotent methods too. Off by default; replays of POST
    /// bodies must be an explicit choice.
    #[serde(default)]
    pub retry_all_methods: bool,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retry_status_codes() -> Vec<u16> {
    vec![502, 503, 504]
}

fn default_retry_on_connection_error() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            retry_on_status_codes: default_retry_status_codes(),
            retry_on_connection_error: default_retry_on_connection_error(),
            retry_all_methods: false,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 10 {
            return Err("max_retries should not exceed 10 to prevent excessive delays".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms cannot be greater than max_backoff_ms".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }

    /// Calculates the backoff delay for a given retry attempt.
    pub fn calculate_backoff(&self, attempt: u32) -> u64 {
        let backoff =
            (self.initial_backoff_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        backoff.min(self.max_backoff_ms as f64) as u64
    }
}

/// Route-scoped handler overrides executed as the route's sub-chain.
///
/// Each populated section replaces the corresponding global handler for
/// requests matched to this route; absent sections inherit nothing — the
/// global handler has already run by the time the router executes.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RouteOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
}

impl RouteOverrides {
    pub fn is_empty(&self) -> bool {
        self.security.is_none()
            && self.cors.is_none()
            && self.auth.is_none()
            && self.rate_limit.is_none()
    }
}

/// Configuration for one route in the gateway's routing table.
///
/// A `Route` maps external requests onto a target service, optionally
/// rewriting the path prefix and headers, and may carry route-scoped
/// security/CORS/auth/rate-limit overrides executed as a sub-chain after
/// the match.
///
/// # Examples
///
/// Basic exact route:
/// ```json
/// {
///   "id": "users-list",
///   "path": "/api/v1/users",
///   "match_type": "exact",
///   "methods": ["GET"],
///   "service_id": "user-service"
/// }
/// ```
///
/// Prefix route with rewrite and a per-route limiter:
/// ```json
/// {
///   "id": "billing",
///   "tenant": "acme",
///   "path": "/billing/",
///   "match_type": "prefix",
///   "methods": ["GET", "POST"],
///   "service_id": "billing-service",
///   "strip_prefix": true,
///   "rewrite_prefix": "/internal/billing/",
///   "priority": 10,
///   "overrides": {
///     "rate_limit": {
///       "enabled": true,
///       "algorithm": "token_bucket",
///       "rate": 5.0,
///       "burst": 10.0,
///       "key_strategy": "user"
///     }
///   }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Route {
    /// Unique route identifier, referenced by access-log records.
    pub id: String,

    /// Owning tenant. Routes without a tenant belong to the default tenant.
    /// `(tenant, path, method)` must be unique across the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Path pattern, interpreted according to `match_type`.
    /// Must start with a forward slash (`/`) for exact and prefix routes.
    pub path: String,

    /// How `path` is matched (default: exact).
    #[serde(default)]
    pub match_type: MatchType,

    /// Allowed HTTP methods. A matching path with a method outside this
    /// set yields `405`.
    pub methods: Vec<String>,

    /// Target service id resolved through the service registry.
    pub service_id: String,

    /// For prefix routes: drop the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Replacement prefix prepended to the forwarded path (applied after
    /// `strip_prefix`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_prefix: Option<String>,

    /// Header add/remove rules applied by the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderFilter>,

    /// Route-scoped handler overrides (sub-chain).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<RouteOverrides>,

    /// Tie-breaker among routes of equal match specificity; higher wins.
    #[serde(default)]
    pub priority: i32,

    /// Inactive routes stay in configuration but never match.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Retry policy for transient upstream failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

fn default_active() -> bool {
    true
}

const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
];

impl Route {
    /// Validates the route configuration.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message when:
    /// - `id` or `service_id` is empty
    /// - the path is empty, or does not start with `/` (exact/prefix)
    /// - a regex pattern fails to compile
    /// - the method list is empty or contains an unknown method
    /// - the retry policy is invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Route id cannot be empty".to_string());
        }
        if self.service_id.is_empty() {
            return Err(format!("Route {}: service_id cannot be empty", self.id));
        }
        if self.path.is_empty() {
            return Err(format!("Route {}: path cannot be empty", self.id));
        }

        match self.match_type {
            MatchType::Exact | MatchType::Prefix => {
                if !self.path.starts_with('/') {
                    return Err(format!("Route {}: path must start with '/'", self.id));
                }
            }
            MatchType::Regex => {
                regex::Regex::new(&self.path)
                    .map_err(|e| format!("Route {}: invalid regex pattern: {}", self.id, e))?;
            }
        }

        if self.methods.is_empty() {
            return Err(format!(
                "Route {}: at least one HTTP method must be specified",
                self.id
            ));
        }
        for method in &self.methods {
            if !VALID_METHODS.contains(&method.as_str()) {
                return Err(format!("Route {}: invalid HTTP method: {}", self.id, method));
            }
        }

        if let Some(retry) = &self.retry {
            retry
                .validate()
                .map_err(|e| format!("Route {}: {}", self.id, e))?;
        }

        Ok(())
    }

    /// Tenant key used for uniqueness checks and access-log records.
    pub fn tenant_key(&self) -> &str {
        self.tenant.as_deref().unwrap_or("default")
    }

    pub fn method_allowed(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}
