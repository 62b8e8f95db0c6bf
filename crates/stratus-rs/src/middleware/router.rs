//! Routing stage: table lookup plus route-scoped sub-chains.

use crate::models::error::GatewayError;
use crate::pipeline::{Context, Handler};
use crate::utils::route_matcher::{RouteMatchError, RouteTable};
use actix_web::http::StatusCode;
use ahash::HashMap as AHashMap;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use std::time::Instant;

/// Resolves `(method, path, tenant)` to a route and runs that route's
/// override sub-chain.
///
/// The sub-chains are built once per generation from the route overrides
/// (security → CORS → auth → rate limit, the same ordering as the global
/// chain) and share the engine's early-abort semantics: the first refusing
/// override stops the request before the proxy sees it.
pub struct RouterHandler {
    table: RouteTable,
    sub_chains: AHashMap<String, Vec<Arc<dyn Handler>>>,
    not_found_status: StatusCode,
    not_found_message: String,
}

impl RouterHandler {
    pub fn new(
        table: RouteTable,
        sub_chains: AHashMap<String, Vec<Arc<dyn Handler>>>,
        not_found_status: u16,
        not_found_message: String,
    ) -> Result<Self, String> {
        let not_found_status = StatusCode::from_u16(not_found_status)
            .map_err(|_| format!("router: invalid not_found_status {}", not_found_status))?;
        Ok(Self {
            table,
            sub_chains,
            not_found_status,
            not_found_message,
        })
    }

    pub fn route_count(&self) -> usize {
        self.table.len()
    }
}

#[async_trait]
impl Handler for RouterHandler {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn handle(&self, ctx: &mut Context) -> bool {
        let matched = match self
            .table
            .find_match(ctx.method.as_str(), &ctx.path, &ctx.tenant)
        {
            Ok(matched) => matched,
            Err(RouteMatchError::MethodNotAllowed { method, path }) => {
                ctx.abort_with(&GatewayError::MethodNotAllowed { method, path });
                return false;
            }
            Err(_) => {
                ctx.add_error("route_not_found", self.not_found_message.clone());
                ctx.abort(self.not_found_status, &self.not_found_message.clone());
                return false;
            }
        };

        ctx.timings.route_matched = Some(Instant::now());
        debug!(
            "request {} matched route {} (service {})",
            ctx.request_id, matched.route.id, matched.route.service_id
        );

        for (name, value) in &matched.params {
            ctx.set(format!("route_param_{}", name), value.clone());
        }
        ctx.service_id = Some(matched.route.service_id.clone());
        ctx.matched_route = Some(matched.route.clone());

        // Route-scoped overrides run as a sub-chain with the same
        // early-abort rules as the outer engine.
        if let Some(chain) = self.sub_chains.get(&matched.route.id) {
            for handler in chain {
                if ctx.is_aborted() {
                    return false;
                }
                if !handler.handle(ctx).await {
                    debug!(
                        "request {} stopped by route override {}",
                        ctx.request_id,
                        handler.name()
                    );
                    return false;
                }
            }
        }

        true
    }
}
