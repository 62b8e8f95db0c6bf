use crate::models::route::Route;
use crate::models::service::ServiceDef;
use serde::{Deserialize, Serialize};

/// Listener and instance-level configuration.
///
/// The listen address is fixed for the lifetime of the process; a reload
/// that changes it is rejected (changing the listener requires a restart).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BaseSettings {
    /// Bind address, e.g. `0.0.0.0:8080`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Serve TLS on the listener.
    #[serde(default)]
    pub tls_enabled: bool,

    /// PEM certificate path (required when `tls_enabled`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert_path: Option<String>,

    /// PEM private-key path (required when `tls_enabled`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key_path: Option<String>,

    /// Client read timeout in seconds (default: 30).
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Client write timeout in seconds (default: 30).
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Keep-alive idle timeout in seconds (default: 60).
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Instance identifier stamped on access-log records.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_read_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_instance_id() -> String {
    "stratus-1".to_string()
}

impl Default for BaseSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            instance_id: default_instance_id(),
        }
    }
}

/// Default admission verdict when no list matches.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    Allow,
    Deny,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::Allow
    }
}

/// IP/domain admission lists. Deny lists always dominate allow lists.
///
/// IP entries may be plain addresses or CIDR blocks (`10.0.0.0/8`); domain
/// entries may carry a leading wildcard (`*.example.com`); path entries on
/// the deny side may carry a trailing wildcard (`/internal/*`).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SecuritySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub default_policy: DefaultPolicy,

    #[serde(default)]
    pub ip_whitelist: Vec<String>,

    #[serde(default)]
    pub ip_blacklist: Vec<String>,

    #[serde(default)]
    pub domain_whitelist: Vec<String>,

    #[serde(default)]
    pub domain_blacklist: Vec<String>,

    /// Path deny patterns, exact or trailing-`*` wildcard.
    #[serde(default)]
    pub path_blacklist: Vec<String>,

    /// Treat `a.b.example.com` as matching a `example.com` list entry.
    #[serde(default)]
    pub allow_subdomains: bool,
}

/// Cross-origin resource sharing configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CorsSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Exact origins, or the single entry `*`.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,

    /// `Access-Control-Max-Age` in seconds (default: 3600).
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,

    #[serde(default)]
    pub allow_credentials: bool,
}

fn default_cors_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
}

fn default_cors_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Authorization".to_string()]
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: vec![],
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
            max_age_secs: default_cors_max_age(),
            allow_credentials: false,
        }
    }
}

/// Authentication mode and its parameters.
///
/// # Examples
///
/// ```json
/// {"enabled": true, "mode": "bearer", "secret": "0123456789abcdef0123456789abcdef"}
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthMode {
    /// Static API keys carried in a configurable header.
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        keys: Vec<String>,
    },

    /// JWT bearer token in the `Authorization` header.
    Bearer {
        secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issuer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audience: Option<String>,
        #[serde(default)]
        required_claims: Vec<String>,
    },

    /// HMAC-SHA256 request signature over `method\npath\ntimestamp`.
    Hmac {
        #[serde(default = "default_hmac_header")]
        header: String,
        #[serde(default = "default_hmac_timestamp_header")]
        timestamp_header: String,
        secret: String,
        /// Maximum accepted clock skew in seconds (default: 300).
        #[serde(default = "default_hmac_skew")]
        max_skew_secs: i64,
    },
}

fn default_api_key_header() -> String {
    "X-Api-Key".to_string()
}

fn default_hmac_header() -> String {
    "X-Signature".to_string()
}

fn default_hmac_timestamp_header() -> String {
    "X-Signature-Timestamp".to_string()
}

fn default_hmac_skew() -> i64 {
    300
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(flatten)]
    pub mode: AuthMode,
}

impl AuthSettings {
    pub fn validate(&self) -> Result<(), String> {
        match &self.mode {
            AuthMode::ApiKey { header, keys } => {
                if header.is_empty() {
                    return Err("Auth: api_key header cannot be empty".to_string());
                }
                if self.enabled && keys.is_empty() {
                    return Err("Auth: api_key mode requires at least one key".to_string());
                }
            }
            AuthMode::Bearer { secret, .. } => {
                if self.enabled && secret.len() < 32 {
                    return Err(
                        "Auth: bearer secret should be at least 32 characters".to_string()
                    );
                }
            }
            AuthMode::Hmac {
                secret,
                max_skew_secs,
                ..
            } => {
                if self.enabled && secret.is_empty() {
                    return Err("Auth: hmac mode requires a secret".to_string());
                }
                if *max_skew_secs <= 0 {
                    return Err("Auth: hmac max_skew_secs must be positive".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Rate-limiting algorithm selector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindow,
    None,
}

impl RateLimitAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAlgorithm::TokenBucket => "token_bucket",
            RateLimitAlgorithm::LeakyBucket => "leaky_bucket",
            RateLimitAlgorithm::FixedWindow => "fixed_window",
            RateLimitAlgorithm::SlidingWindow => "sliding_window",
            RateLimitAlgorithm::None => "none",
        }
    }
}

/// Which request attribute derives the limiter key.
///
/// Extractors fall back deterministically when the preferred attribute is
/// absent: `User` → client IP; `Service` → route id → path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    Ip,
    User,
    Path,
    Service,
    Route,
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self::Ip
    }
}

/// Rate limiter configuration (global or route-scoped).
///
/// # Examples
///
/// ```json
/// {
///   "enabled": true,
///   "algorithm": "token_bucket",
///   "rate": 10.0,
///   "burst": 5.0,
///   "key_strategy": "ip"
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub enabled: bool,

    pub algorithm: RateLimitAlgorithm,

    /// Steady-state rate in requests per second (windowed algorithms:
    /// requests per window).
    #[serde(default)]
    pub rate: f64,

    /// Burst capacity for token/leaky bucket. Values `<= 0` default to
    /// `max(rate / 2, 1)`.
    #[serde(default)]
    pub burst: f64,

    /// Window length in seconds for fixed/sliding window (default: 60).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default)]
    pub key_strategy: KeyStrategy,

    /// Status code returned on deny (default: 429).
    #[serde(default = "default_error_status")]
    pub error_status: u16,

    /// Body message returned on deny.
    #[serde(default = "default_error_message")]
    pub error_message: String,
}

fn default_window_secs() -> u64 {
    60
}

fn default_error_status() -> u16 {
    429
}

fn default_error_message() -> String {
    "Rate limit exceeded".to_string()
}

/// Routing table configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RouterSettings {
    /// Ordered route list; order is the final matching tie-breaker.
    #[serde(default)]
    pub routes: Vec<Route>,

    /// Status code for unmatched paths (default: 404).
    #[serde(default = "default_not_found_status")]
    pub not_found_status: u16,

    /// Body message for unmatched paths.
    #[serde(default = "default_not_found_message")]
    pub not_found_message: String,

    /// Compare paths case-sensitively (default: true).
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,

    /// Strip one trailing slash before matching (default: false).
    #[serde(default)]
    pub normalize_trailing_slash: bool,
}

fn default_not_found_status() -> u16 {
    404
}

fn default_not_found_message() -> String {
    "No matching route".to_string()
}

fn default_case_sensitive() -> bool {
    true
}

/// Upstream forwarding configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProxySettings {
    #[serde(default = "default_proxy_enabled")]
    pub enabled: bool,

    /// Upstream connect timeout in seconds (default: 5).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upstream response timeout in seconds (default: 30).
    #[serde(default = "default_proxy_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default)]
    pub services: Vec<ServiceDef>,
}

fn default_proxy_enabled() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_proxy_read_timeout() -> u64 {
    30
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: default_proxy_enabled(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_proxy_read_timeout(),
            services: vec![],
        }
    }
}

/// Access-log sink selection. The core emits records through the `log`
/// facade; everything here is opaque pass-through for the external sink.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_sink")]
    pub sink: String,

    #[serde(default)]
    pub parameters: serde_json::Value,
}

fn default_log_sink() -> String {
    "stdout".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            sink: default_log_sink(),
            parameters: serde_json::Value::Null,
        }
    }
}

/// Complete gateway configuration snapshot.
///
/// Loaded from a JSON document, validated before use, and treated as
/// immutable once a pipeline generation has been built from it.
///
/// # Configuration File Format
///
/// ```json
/// {
///   "version": 1,
///   "base": {"listen_addr": "0.0.0.0:8080", "instance_id": "gw-1"},
///   "rate_limit": {
///     "enabled": true,
///     "algorithm": "token_bucket",
///     "rate": 100.0,
///     "burst": 50.0,
///     "key_strategy": "ip"
///   },
///   "router": {
///     "routes": [
///       {
///         "id": "users",
///         "path": "/api/v1/users",
///         "methods": ["GET"],
///         "service_id": "user-service"
///       }
///     ]
///   },
///   "proxy": {
///     "services": [
///       {
///         "id": "user-service",
///         "nodes": [{"host": "127.0.0.1", "port": 9001}]
///       }
///     ]
///   }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GatewaySettings {
    /// Configuration schema version for compatibility checking.
    #[serde(default = "default_version")]
    pub version: u8,

    #[serde(default)]
    pub base: BaseSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub log: LogSettings,
}

fn default_version() -> u8 {
    1
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            version: 1,
            base: BaseSettings::default(),
            security: None,
            cors: None,
            auth: None,
            rate_limit: None,
            router: RouterSettings::default(),
            proxy: ProxySettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl GatewaySettings {
    /// First-pass structural validation.
    ///
    /// Validates every route, service and the auth section, and enforces
    /// the `(tenant, path, method)` uniqueness invariant. The deeper
    /// cross-reference checks (routes pointing at unknown services, limiter
    /// parameter ranges) live in
    /// [`crate::config::validation::ConfigValidator`].
    pub fn validate(&self) -> Result<(), String> {
        if let Some(auth) = &self.auth {
            auth.validate()?;
        }

        if self.base.tls_enabled
            && (self.base.tls_cert_path.is_none() || self.base.tls_key_path.is_none())
        {
            return Err("TLS enabled but cert/key paths are missing".to_string());
        }

        for route in &self.router.routes {
            route.validate()?;
        }

        // (tenant, path, method) must be unique across the instance.
        let mut seen = ahash::HashSet::default();
        for route in &self.router.routes {
            for method in &route.methods {
                let key = (route.tenant_key().to_string(), route.path.clone(), method.clone());
                if !seen.insert(key) {
                    return Err(format!(
                        "Duplicate route: tenant={} path={} method={}",
                        route.tenant_key(),
                        route.path,
                        method
                    ));
                }
            }
        }

        for service in &self.proxy.services {
            service.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::{MatchType, Route};

    fn route(id: &str, tenant: Option<&str>, path: &str, method: &str) -> Route {
        Route {
            id: id.to_string(),
            tenant: tenant.map(|t| t.to_string()),
            path: path.to_string(),
            match_type: MatchType::Exact,
            methods: vec![method.to_string()],
            service_id: "svc".to_string(),
            strip_prefix: false,
            rewrite_prefix: None,
            headers: None,
            overrides: None,
            priority: 0,
            active: true,
            retry: None,
        }
    }

    #[test]
    fn duplicate_tenant_path_method_rejected() {
        let mut settings = GatewaySettings::default();
        settings.router.routes = vec![
            route("a", None, "/api/x", "GET"),
            route("b", None, "/api/x", "GET"),
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn same_path_different_tenants_allowed() {
        let mut settings = GatewaySettings::default();
        settings.router.routes = vec![
            route("a", Some("acme"), "/api/x", "GET"),
            route("b", Some("globex"), "/api/x", "GET"),
        ];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn same_path_different_methods_allowed() {
        let mut settings = GatewaySettings::default();
        settings.router.routes = vec![
            route("a", None, "/api/x", "GET"),
            route("b", None, "/api/x", "POST"),
        ];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn settings_round_trip() {
        let json = r#"{
            "version": 1,
            "rate_limit": {
                "enabled": true,
                "algorithm": "sliding_window",
                "rate": 100.0,
                "window_secs": 60,
                "key_strategy": "route"
            },
            "router": {"routes": []},
            "proxy": {"services": []}
        }"#;
        let settings: GatewaySettings = serde_json::from_str(json).unwrap();
        let rl = settings.rate_limit.as_ref().unwrap();
        assert_eq!(rl.algorithm, RateLimitAlgorithm::SlidingWindow);
        assert_eq!(rl.key_strategy, KeyStrategy::Route);
        assert_eq!(rl.error_status, 429);

        let serialized = serde_json::to_string(&settings).unwrap();
        let back: GatewaySettings = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back.rate_limit.unwrap().window_secs, 60);
    }

    #[test]
    fn auth_mode_tagging() {
        let json = r#"{
            "enabled": true,
            "mode": "api_key",
            "keys": ["k-123"]
        }"#;
        let auth: AuthSettings = serde_json::from_str(json).unwrap();
        assert!(auth.validate().is_ok());
        match auth.mode {
            AuthMode::ApiKey { header, keys } => {
                assert_eq!(header, "X-Api-Key");
                assert_eq!(keys, vec!["k-123".to_string()]);
            }
            _ => panic!("expected api_key mode"),
        }
    }

    #[test]
    fn tls_requires_paths() {
        let mut settings = GatewaySettings::default();
        settings.base.tls_enabled = true;
        assert!(settings.validate().is_err());
    }
}
