//! Handler-chain engine with early-abort semantics.
//!
//! A pipeline is an ordered list of [`Handler`] stages sharing one mutable
//! [`Context`]. Stages run strictly in order; the first stage that returns
//! `false` (always after aborting the context) stops the chain, and a
//! built-in terminal stage stamps the end time and backstops the
//! one-status-per-request invariant.
//!
//! Stage ordering is data, not inheritance: the generation builder decides
//! which handlers exist and in what order (security → CORS → auth → global
//! limiter → router → proxy). Authentication precedes rate limiting so
//! anonymous bad traffic is rejected before limiter state is touched; CORS
//! precedes auth so pre-flights short-circuit without credentials.

pub mod context;
pub mod generation;

pub use context::Context;

use actix_web::http::StatusCode;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// One stage of the request pipeline.
///
/// Returning `false` stops the chain; a refusing handler aborts the context
/// first so the response carries its status. Recoverable conditions return
/// `true` with context mutations instead — handlers never panic across the
/// chain boundary.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable stage name for logs and traces.
    fn name(&self) -> &'static str;

    /// Processes the request. `true` continues the chain.
    async fn handle(&self, ctx: &mut Context) -> bool;
}

/// Auxiliary capability for handlers owning background resources.
///
/// Kept out of [`Handler`] on purpose: most stages own nothing, and the
/// retirement path queries this capability explicitly on the handlers the
/// generation builder registered as closable.
#[async_trait]
pub trait Closable: Send + Sync {
    /// Releases background resources. Called once, after the generation
    /// holding this handler has been displaced.
    async fn close(&self) -> Result<(), String>;
}

/// Ordered handler chain. Immutable once built.
pub struct Engine {
    handlers: Vec<Arc<dyn Handler>>,
}

/// Builder for [`Engine`]; the only phase in which stages can be appended.
#[derive(Default)]
pub struct EngineBuilder {
    handlers: Vec<Arc<dyn Handler>>,
}

impl EngineBuilder {
    /// Appends a handler to the chain.
    pub fn use_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Seals the chain. After this point the stage list never changes.
    pub fn build(self) -> Engine {
        Engine {
            handlers: self.handlers,
        }
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Number of stages in the chain.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the chain over `ctx`.
    ///
    /// Iterates stages in order; stops immediately when a stage returns
    /// `false` or the context is aborted. The terminal stage then records
    /// the end stamp, injects `X-Request-Id`, and — if no stage produced a
    /// status — aborts with `502` so every request leaves with exactly one
    /// status code.
    pub async fn handle(&self, ctx: &mut Context) {
        for handler in &self.handlers {
            if ctx.is_aborted() {
                break;
            }
            let proceed = handler.handle(ctx).await;
            if !proceed {
                debug!(
                    "request {} stopped at stage {}",
                    ctx.request_id,
                    handler.name()
                );
                break;
            }
        }

        // Terminal stage.
        if ctx.status().is_none() && !ctx.is_aborted() {
            ctx.add_error("no_response", "pipeline produced no response");
            ctx.abort(StatusCode::BAD_GATEWAY, "No response produced");
        }
        ctx.insert_response_header("X-Request-Id", ctx.request_id.clone());
        ctx.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderMap;
    use actix_web::http::Method;
    use actix_web::web::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Context {
        Context::new(
            Method::GET,
            "/t".to_string(),
            String::new(),
            HeaderMap::new(),
            Bytes::new(),
            None,
        )
    }

    struct Recorder {
        calls: Arc<AtomicUsize>,
        abort: bool,
    }

    #[async_trait]
    impl Handler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&self, ctx: &mut Context) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.abort {
                ctx.abort(StatusCode::FORBIDDEN, "stop");
                return false;
            }
            true
        }
    }

    #[tokio::test]
    async fn stages_run_in_order_until_abort() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));

        let engine = Engine::builder()
            .use_handler(Arc::new(Recorder {
                calls: first.clone(),
                abort: false,
            }))
            .use_handler(Arc::new(Recorder {
                calls: second.clone(),
                abort: true,
            }))
            .use_handler(Arc::new(Recorder {
                calls: third.clone(),
                abort: false,
            }))
            .build();

        let mut c = ctx();
        engine.handle(&mut c).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0, "stage after abort ran");
        assert_eq!(c.status(), Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn empty_chain_still_produces_one_status() {
        let engine = Engine::builder().build();
        let mut c = ctx();
        engine.handle(&mut c).await;
        assert_eq!(c.status(), Some(StatusCode::BAD_GATEWAY));
        assert!(c.timings.finished.is_some());
    }

    #[tokio::test]
    async fn request_id_header_is_injected() {
        let engine = Engine::builder().build();
        let mut c = ctx();
        let id = c.request_id.clone();
        engine.handle(&mut c).await;
        assert!(c
            .response_headers
            .iter()
            .any(|(k, v)| k == "X-Request-Id" && *v == id));
    }
}
