use actix_web::http::StatusCode;

/// Errors produced while a request travels through the gateway pipeline.
///
/// Every variant maps to exactly one client-visible status code via
/// [`GatewayError::status_code`]; the pipeline writes that status through a
/// single `Context::abort` call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request rejected by the security handler (IP/domain lists).
    #[error("Access denied")]
    AccessDenied,

    /// Origin not present in the CORS allow-list.
    #[error("Origin not allowed: {origin}")]
    OriginNotAllowed { origin: String },

    /// Missing or invalid credentials.
    #[error("Authentication failed: {reason}")]
    Unauthorized { reason: String },

    /// Credentials were valid but the request is not acceptable
    /// (e.g. stale request signature).
    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    /// Rate limiter rejected the request.
    #[error("{message}")]
    RateLimited { key: String, message: String },

    /// No configured route matches the request path.
    #[error("No matching route found for path: {path}")]
    RouteNotFound { path: String },

    /// A route matches the path but not the HTTP method.
    #[error("Method {method} not allowed for path: {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Route references a service id the registry does not know.
    #[error("Unknown service: {service_id}")]
    UnknownService { service_id: String },

    /// Load balancer found no healthy enabled node.
    #[error("No healthy upstream for service: {service_id}")]
    NoHealthyUpstream { service_id: String },

    /// Connect or read failure talking to the upstream node.
    #[error("Upstream error for {url}: {message}")]
    Upstream {
        message: String,
        url: String,
        status: Option<u16>,
    },

    /// Upstream did not answer within the configured timeout.
    #[error("Upstream timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Circuit breaker is open for the target service.
    #[error("Circuit open for service: {service_id}")]
    CircuitOpen { service_id: String },

    /// Broken configuration discovered at request time.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl GatewayError {
    /// Client-visible status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AccessDenied => StatusCode::FORBIDDEN,
            GatewayError::OriginNotAllowed { .. } => StatusCode::FORBIDDEN,
            GatewayError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::UnknownService { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::NoHealthyUpstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Config { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable short code recorded in access-log records.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AccessDenied => "access_denied",
            GatewayError::OriginNotAllowed { .. } => "origin_not_allowed",
            GatewayError::Unauthorized { .. } => "unauthorized",
            GatewayError::Forbidden { .. } => "forbidden",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::RouteNotFound { .. } => "route_not_found",
            GatewayError::MethodNotAllowed { .. } => "method_not_allowed",
            GatewayError::UnknownService { .. } => "unknown_service",
            GatewayError::NoHealthyUpstream { .. } => "no_healthy_upstream",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::Timeout { .. } => "upstream_timeout",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Config { .. } => "config_error",
        }
    }
}
