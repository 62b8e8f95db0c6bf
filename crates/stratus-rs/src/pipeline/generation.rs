//! Versioned, immutable pipeline bundles.
//!
//! A generation is everything one configuration snapshot produced: the
//! sealed engine, the route table inside the router stage, the service
//! registry, and the list of closable handlers in retirement order. Reload
//! builds a complete new generation off to the side and swaps it in; the
//! displaced generation is retired exactly once.

use crate::middleware::auth::AuthHandler;
use crate::middleware::cors::CorsHandler;
use crate::middleware::rate_limit::RateLimitHandler;
use crate::middleware::router::RouterHandler;
use crate::middleware::security::SecurityHandler;
use crate::models::route::Route;
use crate::models::settings::{GatewaySettings, RateLimitAlgorithm};
use crate::pipeline::{Closable, Context, Engine, Handler};
use crate::services::proxy::ProxyHandler;
use crate::services::registry::ServiceRegistry;
use ahash::HashMap as AHashMap;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One complete pipeline built from one configuration snapshot.
pub struct PipelineGeneration {
    pub version: u64,
    pub settings: Arc<GatewaySettings>,
    engine: Engine,
    registry: Arc<ServiceRegistry>,
    /// Closable handlers in retirement order (proxy first — it owns the
    /// health-check tasks).
    closables: Vec<(&'static str, Arc<dyn Closable>)>,
    retired: AtomicBool,
}

impl PipelineGeneration {
    /// Builds a generation without touching any live pipeline.
    ///
    /// Construction is the validation of last resort: every handler
    /// constructor re-checks the parameters it depends on, so an invalid
    /// limiter or security list fails the build here and the caller keeps
    /// the previous generation.
    pub fn build(settings: GatewaySettings, version: u64) -> Result<Self, String> {
        settings.validate()?;

        let registry = Arc::new(ServiceRegistry::new(&settings.proxy.services));
        let mut engine = Engine::builder();
        let mut closables: Vec<(&'static str, Arc<dyn Closable>)> = Vec::new();

        if let Some(security) = settings.security.as_ref().filter(|s| s.enabled) {
            engine = engine.use_handler(Arc::new(SecurityHandler::new(security)?));
        }
        if let Some(cors) = settings.cors.as_ref().filter(|c| c.enabled) {
            engine = engine.use_handler(Arc::new(CorsHandler::new(cors)));
        }
        if let Some(auth) = settings.auth.as_ref().filter(|a| a.enabled) {
            engine = engine.use_handler(Arc::new(AuthHandler::new(auth)?));
        }
        if let Some(rate_limit) = settings
            .rate_limit
            .as_ref()
            .filter(|r| r.enabled && r.algorithm != RateLimitAlgorithm::None)
        {
            engine = engine.use_handler(Arc::new(RateLimitHandler::new(rate_limit)?));
        }

        let mut sub_chains: AHashMap<String, Vec<Arc<dyn Handler>>> = AHashMap::default();
        for route in &settings.router.routes {
            let chain = build_route_sub_chain(route)?;
            if !chain.is_empty() {
                sub_chains.insert(route.id.clone(), chain);
            }
        }

        let table = crate::utils::route_matcher::RouteTable::new(
            &settings.router.routes,
            &settings.router,
        )
        .map_err(|e| e.to_string())?;
        engine = engine.use_handler(Arc::new(RouterHandler::new(
            table,
            sub_chains,
            settings.router.not_found_status,
            settings.router.not_found_message.clone(),
        )?));

        if settings.proxy.enabled {
            let proxy = Arc::new(ProxyHandler::new(&settings.proxy, registry.clone())?);
            closables.push(("proxy", proxy.clone()));
            engine = engine.use_handler(proxy);
        }

        info!(
            "built pipeline generation {} ({} routes, {} services)",
            version,
            settings.router.routes.len(),
            registry.len()
        );

        Ok(Self {
            version,
            settings: Arc::new(settings),
            engine: engine.build(),
            registry,
            closables,
            retired: AtomicBool::new(false),
        })
    }

    /// Runs the generation's chain over one request.
    pub async fn handle(&self, ctx: &mut Context) {
        self.engine.handle(ctx).await;
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn stage_count(&self) -> usize {
        self.engine.len()
    }

    /// Releases the generation's background resources, once.
    ///
    /// Close failures are logged and never propagate: retirement is
    /// best-effort cleanup of a pipeline no new request can reach.
    pub async fn retire(&self) {
        if self.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        for (name, closable) in &self.closables {
            if let Err(e) = closable.close().await {
                error!(
                    "generation {}: close of {} failed: {}",
                    self.version, name, e
                );
            }
        }
        info!("retired pipeline generation {}", self.version);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

/// Builds the override sub-chain for one route, mirroring the global stage
/// order.
fn build_route_sub_chain(route: &Route) -> Result<Vec<Arc<dyn Handler>>, String> {
    let mut chain: Vec<Arc<dyn Handler>> = Vec::new();
    let Some(overrides) = &route.overrides else {
        return Ok(chain);
    };

    if let Some(security) = overrides.security.as_ref().filter(|s| s.enabled) {
        chain.push(Arc::new(SecurityHandler::new(security).map_err(|e| {
            format!("route {}: {}", route.id, e)
        })?));
    }
    if let Some(cors) = overrides.cors.as_ref().filter(|c| c.enabled) {
        chain.push(Arc::new(CorsHandler::new(cors)));
    }
    if let Some(auth) = overrides.auth.as_ref().filter(|a| a.enabled) {
        chain.push(Arc::new(AuthHandler::new(auth).map_err(|e| {
            format!("route {}: {}", route.id, e)
        })?));
    }
    if let Some(rate_limit) = overrides
        .rate_limit
        .as_ref()
        .filter(|r| r.enabled && r.algorithm != RateLimitAlgorithm::None)
    {
        chain.push(Arc::new(RateLimitHandler::new(rate_limit).map_err(
            |e| format!("route {}: {}", route.id, e),
        )?));
    }

    Ok(chain)
}
