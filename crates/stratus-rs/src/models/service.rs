use serde::{Deserialize, Serialize};

/// Load balancing strategy for distributing requests across service nodes.
///
/// # Strategies
///
/// - **RoundRobin**: Distributes requests evenly in circular order
/// - **WeightedRoundRobin**: Distributes proportionally to node weights
/// - **Random**: Randomly selects a node
/// - **LeastConnections**: Routes to the node with fewest in-flight requests
/// - **IpHash**: Routes based on client IP hash (sticky sessions)
/// - **ConsistentHash**: Hash-ring placement; node changes move only the
///   keys that land on the affected ring segments
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Round-robin load balancing (default).
    /// Best for: nodes with similar capacity
    RoundRobin,

    /// Weighted distribution based on node weights.
    /// Best for: nodes with different capacities
    WeightedRoundRobin,

    /// Randomly selects a node.
    /// Best for: simple distribution without state tracking
    Random,

    /// Routes to the node with the fewest active connections.
    /// Best for: nodes with varying capacity or long-running requests
    LeastConnections,

    /// Hash-based routing using client IP for session persistence.
    IpHash,

    /// Consistent-hash ring over the rate-limit/client key.
    /// Best for: cache-affine upstreams
    ConsistentHash,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// How a service's node list is populated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Nodes come from configuration and change only on reload.
    Static,
    /// Nodes may be replaced at runtime through the registry
    /// (the discovery source itself is external to the core).
    Dynamic,
}

impl Default for DiscoveryMode {
    fn default() -> Self {
        Self::Static
    }
}

/// Health state of a single upstream node.
///
/// New nodes start `Unknown` and are treated as eligible until the first
/// probe verdict; the health checker is the only writer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Active health-check parameters for a service.
///
/// # Examples
///
/// ```json
/// {
///   "path": "/health",
///   "method": "GET",
///   "interval_secs": 10,
///   "timeout_secs": 2,
///   "healthy_threshold": 3,
///   "unhealthy_threshold": 2,
///   "expected_codes": [200, 204]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthCheckSpec {
    /// Probe path on every node (default: `/health`).
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Probe HTTP method (default: `GET`).
    #[serde(default = "default_health_method")]
    pub method: String,

    /// Seconds between probe rounds (default: 10).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Per-probe timeout in seconds (default: 2).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Consecutive successes needed to flip an unhealthy node healthy
    /// (default: 3).
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    /// Consecutive failures needed to flip a healthy node unhealthy
    /// (default: 2).
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Status codes counted as probe success (default: `[200]`).
    #[serde(default = "default_expected_codes")]
    pub expected_codes: Vec<u16>,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_method() -> String {
    "GET".to_string()
}

fn default_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    2
}

fn default_healthy_threshold() -> u32 {
    3
}

fn default_unhealthy_threshold() -> u32 {
    2
}

fn default_expected_codes() -> Vec<u16> {
    vec![200]
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            method: default_health_method(),
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            expected_codes: default_expected_codes(),
        }
    }
}

impl HealthCheckSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("health check interval must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("health check timeout must be greater than 0".to_string());
        }
        if self.healthy_threshold == 0 || self.unhealthy_threshold == 0 {
            return Err("health check thresholds must be greater than 0".to_string());
        }
        if self.expected_codes.is_empty() {
            return Err("health check expected_codes cannot be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err("health check path must start with '/'".to_string());
        }
        Ok(())
    }
}

/// Circuit breaker parameters for a service (optional).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit (default: 5).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// Consecutive half-open successes that close it again (default: 3).
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u64,

    /// Seconds an open circuit waits before admitting probe requests
    /// (default: 30).
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

fn default_failure_threshold() -> u64 {
    5
}

fn default_success_threshold() -> u64 {
    3
}

fn default_reset_timeout() -> u64 {
    30
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

/// One upstream endpoint of a service.
///
/// # Examples
///
/// ```json
/// {"host": "10.0.3.17", "port": 9001, "weight": 2}
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeConfig {
    /// Host name or IP address, without protocol.
    pub host: String,

    /// Port number for the upstream endpoint.
    pub port: u16,

    /// Protocol used to reach the node (default: `http`).
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Weight for weighted strategies (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Disabled nodes stay configured but receive no traffic.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Node host cannot be empty".to_string());
        }
        if self.host.contains("://") {
            return Err(format!(
                "Node host must not include a protocol: {}",
                self.host
            ));
        }
        if self.port == 0 {
            return Err("Node port must be between 1 and 65535".to_string());
        }
        if self.weight == 0 {
            return Err("Node weight must be greater than 0".to_string());
        }
        if self.protocol != "http" && self.protocol != "https" {
            return Err(format!("Unsupported node protocol: {}", self.protocol));
        }
        Ok(())
    }

    /// Base URL for forwarding, e.g. `http://10.0.3.17:9001`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Stable `host:port` key used by balancers and trace records.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A logical upstream service: metadata, balancing strategy, health-check
/// parameters and the node list.
///
/// # Examples
///
/// ```json
/// {
///   "id": "user-service",
///   "name": "User Service",
///   "discovery": "static",
///   "strategy": "weighted_round_robin",
///   "health": {"path": "/health", "interval_secs": 10},
///   "nodes": [
///     {"host": "10.0.3.17", "port": 9001, "weight": 2},
///     {"host": "10.0.3.18", "port": 9001, "weight": 1}
///   ]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServiceDef {
    /// Unique service identifier referenced by routes.
    pub id: String,

    /// Human-readable name for logs.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub discovery: DiscoveryMode,

    #[serde(default)]
    pub strategy: LoadBalancingStrategy,

    /// Health checking; absent means nodes are trusted as configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthCheckSpec>,

    /// Circuit breaker; absent disables breaking for this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerSettings>,

    pub nodes: Vec<NodeConfig>,
}

impl ServiceDef {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Service id cannot be empty".to_string());
        }
        if self.nodes.is_empty() && self.discovery == DiscoveryMode::Static {
            return Err(format!(
                "Service {}: static discovery requires at least one node",
                self.id
            ));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            node.validate()
                .map_err(|e| format!("Service {}: node {} invalid: {}", self.id, i, e))?;
        }
        if let Some(health) = &self.health {
            health
                .validate()
                .map_err(|e| format!("Service {}: {}", self.id, e))?;
        }
        Ok(())
    }
}
