//! Comprehensive configuration validation.
//!
//! Goes beyond the structural checks in `GatewaySettings::validate`:
//! cross-references between sections, handler-constructor dry runs, and a
//! set of non-fatal warnings for configurations that are legal but
//! probably not what the operator meant.

use crate::middleware::auth::AuthHandler;
use crate::middleware::rate_limit::RateLimitHandler;
use crate::middleware::security::SecurityHandler;
use crate::models::settings::{GatewaySettings, RateLimitAlgorithm, RateLimitSettings};
use ahash::HashSet as AHashSet;

/// Outcome of a comprehensive validation pass.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a snapshot the way the reload controller will consume it.
    ///
    /// Every error here would otherwise surface as a failed generation
    /// build; catching them up front keeps reload failures actionable.
    pub fn validate_comprehensive(settings: &GatewaySettings) -> ValidationResult {
        let mut result = ValidationResult {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        if let Err(e) = settings.validate() {
            result.errors.push(e);
        }

        Self::check_service_references(settings, &mut result);
        Self::check_handler_construction(settings, &mut result);
        Self::check_operational_warnings(settings, &mut result);

        result.is_valid = result.errors.is_empty();
        result
    }

    fn check_service_references(settings: &GatewaySettings, result: &mut ValidationResult) {
        let mut service_ids: AHashSet<&str> = AHashSet::default();
        for service in &settings.proxy.services {
            if !service_ids.insert(service.id.as_str()) {
                result
                    .errors
                    .push(format!("Duplicate service id: {}", service.id));
            }
        }

        for route in &settings.router.routes {
            if !service_ids.contains(route.service_id.as_str()) {
                result.errors.push(format!(
                    "Route {} references unknown service: {}",
                    route.id, route.service_id
                ));
            }
        }
    }

    /// Dry-runs the handler constructors that validate their own
    /// parameters. None of these spawn tasks or open sockets.
    fn check_handler_construction(settings: &GatewaySettings, result: &mut ValidationResult) {
        if let Some(security) = settings.security.as_ref().filter(|s| s.enabled) {
            if let Err(e) = SecurityHandler::new(security) {
                result.errors.push(format!("Security: {}", e));
            }
        }
        if let Some(auth) = settings.auth.as_ref().filter(|a| a.enabled) {
            if let Err(e) = AuthHandler::new(auth) {
                result.errors.push(format!("Auth: {}", e));
            }
        }
        if let Some(rate_limit) = settings.rate_limit.as_ref() {
            Self::check_rate_limit("RateLimit", rate_limit, result);
        }

        for route in &settings.router.routes {
            let Some(overrides) = &route.overrides else {
                continue;
            };
            if let Some(security) = overrides.security.as_ref().filter(|s| s.enabled) {
                if let Err(e) = SecurityHandler::new(security) {
                    result
                        .errors
                        .push(format!("Route {} security override: {}", route.id, e));
                }
            }
            if let Some(auth) = overrides.auth.as_ref().filter(|a| a.enabled) {
                if let Err(e) = AuthHandler::new(auth) {
                    result
                        .errors
                        .push(format!("Route {} auth override: {}", route.id, e));
                }
            }
            if let Some(rate_limit) = overrides.rate_limit.as_ref() {
                Self::check_rate_limit(
                    &format!("Route {} rate_limit override", route.id),
                    rate_limit,
                    result,
                );
            }
        }
    }

    fn check_rate_limit(
        prefix: &str,
        rate_limit: &RateLimitSettings,
        result: &mut ValidationResult,
    ) {
        if !rate_limit.enabled || rate_limit.algorithm == RateLimitAlgorithm::None {
            return;
        }
        if let Err(e) = RateLimitHandler::new(rate_limit) {
            result.errors.push(format!("{}: {}", prefix, e));
        }
    }

    fn check_operational_warnings(settings: &GatewaySettings, result: &mut ValidationResult) {
        if !settings.proxy.enabled && !settings.router.routes.is_empty() {
            result.warnings.push(
                "Routes are configured but the proxy is disabled; every match will fail"
                    .to_string(),
            );
        }

        if let Some(cors) = settings.cors.as_ref().filter(|c| c.enabled) {
            if cors.allowed_origins.is_empty() {
                result.warnings.push(
                    "CORS is enabled with an empty origin list; all cross-origin requests will be rejected".to_string(),
                );
            }
        }

        for service in &settings.proxy.services {
            if !service.nodes.is_empty() && service.nodes.iter().all(|n| !n.enabled) {
                result.warnings.push(format!(
                    "Service {} has no enabled nodes",
                    service.id
                ));
            }
            if service.health.is_none() && service.nodes.len() > 1 {
                result.warnings.push(format!(
                    "Service {} balances over {} nodes without health checking",
                    service.id,
                    service.nodes.len()
                ));
            }
        }

        for route in &settings.router.routes {
            if let Some(retry) = &route.retry {
                if retry.retry_all_methods {
                    result.warnings.push(format!(
                        "Route {} retries non-idempotent methods; upstream must tolerate replays",
                        route.id
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::{MatchType, Route};
    use crate::models::service::{
        DiscoveryMode, LoadBalancingStrategy, NodeConfig, ServiceDef,
    };
    use crate::models::settings::KeyStrategy;

    fn route_to(service_id: &str) -> Route {
        Route {
            id: "r1".to_string(),
            tenant: None,
            path: "/api".to_string(),
            match_type: MatchType::Exact,
            methods: vec!["GET".to_string()],
            service_id: service_id.to_string(),
            strip_prefix: false,
            rewrite_prefix: None,
            headers: None,
            overrides: None,
            priority: 0,
            active: true,
            retry: None,
        }
    }

    fn service(id: &str) -> ServiceDef {
        ServiceDef {
            id: id.to_string(),
            name: id.to_string(),
            discovery: DiscoveryMode::Static,
            strategy: LoadBalancingStrategy::RoundRobin,
            health: None,
            circuit_breaker: None,
            nodes: vec![NodeConfig {
                host: "127.0.0.1".to_string(),
                port: 9001,
                protocol: "http".to_string(),
                weight: 1,
                enabled: true,
            }],
        }
    }

    #[test]
    fn valid_config_passes() {
        let mut settings = GatewaySettings::default();
        settings.router.routes = vec![route_to("svc")];
        settings.proxy.services = vec![service("svc")];
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn unknown_service_reference_is_an_error() {
        let mut settings = GatewaySettings::default();
        settings.router.routes = vec![route_to("ghost")];
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("ghost")));
    }

    #[test]
    fn invalid_limiter_is_an_error() {
        let mut settings = GatewaySettings::default();
        settings.rate_limit = Some(RateLimitSettings {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            rate: 0.0,
            burst: 0.0,
            window_secs: 60,
            key_strategy: KeyStrategy::Ip,
            error_status: 429,
            error_message: "Rate limit exceeded".to_string(),
        });
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn disabled_limiter_is_ignored() {
        let mut settings = GatewaySettings::default();
        settings.rate_limit = Some(RateLimitSettings {
            enabled: false,
            algorithm: RateLimitAlgorithm::TokenBucket,
            rate: 0.0,
            burst: 0.0,
            window_secs: 60,
            key_strategy: KeyStrategy::Ip,
            error_status: 429,
            error_message: "Rate limit exceeded".to_string(),
        });
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.is_valid);
    }

    #[test]
    fn multi_node_service_without_health_warns() {
        let mut settings = GatewaySettings::default();
        let mut svc = service("svc");
        svc.nodes.push(NodeConfig {
            host: "127.0.0.2".to_string(),
            port: 9001,
            protocol: "http".to_string(),
            weight: 1,
            enabled: true,
        });
        settings.proxy.services = vec![svc];
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.is_valid);
        assert!(!result.warnings.is_empty());
    }
}
