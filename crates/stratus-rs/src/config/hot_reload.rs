//! Zero-downtime configuration reload.
//!
//! The handle owns the published pipeline generation behind an `ArcSwap`.
//! Requests load the current generation once at entry and keep that `Arc`
//! until they complete, so a swap never interrupts an in-flight request and
//! no request ever observes a half-built pipeline: the replacement is
//! constructed completely before the single atomic store publishes it.

use crate::config::validation::ConfigValidator;
use crate::models::settings::GatewaySettings;
use crate::pipeline::generation::PipelineGeneration;
use arc_swap::ArcSwap;
use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Reload failures. Every variant leaves the running pipeline untouched.
#[derive(Error, Debug)]
pub enum ReloadError {
    /// The listener address differs; that requires a full restart.
    #[error("listener address cannot change across reload (running: {current}, new: {requested})")]
    ListenerChanged { current: String, requested: String },

    /// Comprehensive validation rejected the snapshot.
    #[error("configuration validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A handler constructor rejected its parameters mid-build.
    #[error("failed to build new pipeline: {0}")]
    Build(String),
}

/// Owner of the active pipeline generation.
pub struct PipelineHandle {
    current: ArcSwap<PipelineGeneration>,
    version: AtomicU64,
    /// Serializes whole reloads; the publish itself is one atomic store.
    reload_lock: tokio::sync::Mutex<()>,
}

impl PipelineHandle {
    /// Validates and builds the first generation.
    pub fn bootstrap(settings: GatewaySettings) -> Result<Self, ReloadError> {
        let result = ConfigValidator::validate_comprehensive(&settings);
        for warning in &result.warnings {
            warn!("config warning: {}", warning);
        }
        if !result.is_valid {
            return Err(ReloadError::Validation(result.errors));
        }

        let generation = PipelineGeneration::build(settings, 1).map_err(ReloadError::Build)?;
        Ok(Self {
            current: ArcSwap::from_pointee(generation),
            version: AtomicU64::new(1),
            reload_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The generation new requests will use. Callers hold the returned
    /// `Arc` for the whole request so reloads cannot pull state out from
    /// under them.
    pub fn current(&self) -> Arc<PipelineGeneration> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Atomically replaces the pipeline with one built from `new_settings`.
    ///
    /// Protocol: validate (listener unchanged, comprehensive checks), build
    /// the complete replacement off to the side, publish it with one atomic
    /// swap, then retire the displaced generation — proxy first, since it
    /// owns the health-check tasks. Close failures are logged, never fatal,
    /// and any failure before the swap leaves the running pipeline as it
    /// was.
    pub async fn reload(&self, new_settings: GatewaySettings) -> Result<u64, ReloadError> {
        let _guard = self.reload_lock.lock().await;

        let active = self.current();
        if active.settings.base.listen_addr != new_settings.base.listen_addr {
            return Err(ReloadError::ListenerChanged {
                current: active.settings.base.listen_addr.clone(),
                requested: new_settings.base.listen_addr.clone(),
            });
        }

        let result = ConfigValidator::validate_comprehensive(&new_settings);
        for warning in &result.warnings {
            warn!("config warning: {}", warning);
        }
        if !result.is_valid {
            return Err(ReloadError::Validation(result.errors));
        }

        let version = self.version.load(Ordering::SeqCst) + 1;
        let next =
            PipelineGeneration::build(new_settings, version).map_err(ReloadError::Build)?;

        let displaced = self.current.swap(Arc::new(next));
        self.version.store(version, Ordering::SeqCst);
        info!(
            "pipeline generation {} published, retiring generation {}",
            version, displaced.version
        );

        displaced.retire().await;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::route::{MatchType, Route};
    use crate::models::service::{
        DiscoveryMode, LoadBalancingStrategy, NodeConfig, ServiceDef,
    };

    fn route(id: &str, path: &str, service_id: &str) -> Route {
        Route {
            id: id.to_string(),
            tenant: None,
            path: path.to_string(),
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

    fn settings_with(routes: Vec<Route>, services: Vec<ServiceDef>) -> GatewaySettings {
        let mut settings = GatewaySettings::default();
        settings.router.routes = routes;
        settings.proxy.services = services;
        settings
    }

    #[tokio::test]
    async fn bootstrap_builds_generation_one() {
        let handle = PipelineHandle::bootstrap(settings_with(
            vec![route("r1", "/a", "s1")],
            vec![service("s1")],
        ))
        .unwrap();
        assert_eq!(handle.version(), 1);
        assert_eq!(handle.current().version, 1);
        handle.current().retire().await;
    }

    #[tokio::test]
    async fn reload_swaps_and_retires() {
        let handle = PipelineHandle::bootstrap(settings_with(
            vec![route("r1", "/a", "s1")],
            vec![service("s1")],
        ))
        .unwrap();
        let old = handle.current();

        let version = handle
            .reload(settings_with(
                vec![route("r2", "/b", "s2")],
                vec![service("s2")],
            ))
            .await
            .unwrap();

        assert_eq!(version, 2);
        assert_eq!(handle.current().version, 2);
        assert!(old.is_retired(), "displaced generation was not retired");
        handle.current().retire().await;
    }

    #[tokio::test]
    async fn invalid_reload_rolls_back() {
        let handle = PipelineHandle::bootstrap(settings_with(
            vec![route("r1", "/a", "s1")],
            vec![service("s1")],
        ))
        .unwrap();

        // rate = 0 with token bucket: rejected by validation.
        let mut bad = settings_with(vec![route("r1", "/a", "s1")], vec![service("s1")]);
        bad.rate_limit = Some(crate::models::settings::RateLimitSettings {
            enabled: true,
            algorithm: crate::models::settings::RateLimitAlgorithm::TokenBucket,
            rate: 0.0,
            burst: 0.0,
            window_secs: 60,
            key_strategy: crate::models::settings::KeyStrategy::Ip,
            error_status: 429,
            error_message: "Rate limit exceeded".to_string(),
        });

        let err = handle.reload(bad).await;
        assert!(err.is_err());
        assert_eq!(handle.version(), 1, "version advanced on failed reload");
        assert_eq!(handle.current().version, 1);
        assert!(!handle.current().is_retired());
        handle.current().retire().await;
    }

    #[tokio::test]
    async fn listener_change_is_rejected() {
        let handle =
            PipelineHandle::bootstrap(settings_with(vec![], vec![])).unwrap();
        let mut changed = settings_with(vec![], vec![]);
        changed.base.listen_addr = "0.0.0.0:9999".to_string();
        match handle.reload(changed).await {
            Err(ReloadError::ListenerChanged { .. }) => {}
            other => panic!("expected ListenerChanged, got {:?}", other),
        }
        handle.current().retire().await;
    }
}
