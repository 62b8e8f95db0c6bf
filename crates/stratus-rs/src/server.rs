//! HTTP server surface: `start`, `stop`, `reload`.
//!
//! The actix server owns the listener; every request is funneled through a
//! single catch-all entry that loads the current pipeline generation,
//! builds a [`Context`], runs the chain, converts the context into the
//! client response and spawns the access-log write. The server itself never
//! restarts on reload — only the generation behind the `ArcSwap` changes.

use crate::config::hot_reload::{PipelineHandle, ReloadError};
use crate::logs::access::{spawn_access_log, AccessRecord};
use crate::models::settings::GatewaySettings;
use crate::pipeline::context::ResponseBody;
use crate::pipeline::Context;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use log::{info, warn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Drain deadline for graceful shutdown.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// The gateway process: pipeline handle plus listener lifecycle.
pub struct Gateway {
    pipeline: Arc<PipelineHandle>,
    server_handle: Mutex<Option<actix_web::dev::ServerHandle>>,
}

impl Gateway {
    /// Validates the snapshot and builds generation 1. No sockets yet.
    pub fn new(settings: GatewaySettings) -> Result<Self, ReloadError> {
        Ok(Self {
            pipeline: Arc::new(PipelineHandle::bootstrap(settings)?),
            server_handle: Mutex::new(None),
        })
    }

    pub fn pipeline(&self) -> &Arc<PipelineHandle> {
        &self.pipeline
    }

    /// Atomically swaps in a pipeline built from `new_settings`.
    pub async fn reload(&self, new_settings: GatewaySettings) -> Result<u64, ReloadError> {
        self.pipeline.reload(new_settings).await
    }

    /// Binds the listener and serves until stopped.
    ///
    /// # Errors
    ///
    /// Returns the bind error when the address is taken or invalid; this is
    /// the one fatal startup failure the core reports instead of logging.
    pub async fn start(&self) -> std::io::Result<()> {
        let base = self.pipeline.current().settings.base.clone();
        if base.tls_enabled {
            // Certificate loading belongs to the deployment layer; the
            // core serves plaintext behind it.
            warn!("tls_enabled is set; expecting TLS termination in front of the listener");
        }

        let pipeline = self.pipeline.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(pipeline.clone()))
                .default_service(web::route().to(gateway_entry))
        })
        .client_request_timeout(Duration::from_secs(base.read_timeout_secs))
        .keep_alive(Duration::from_secs(base.idle_timeout_secs))
        .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
        .bind(base.listen_addr.as_str())?
        .run();

        {
            let mut guard = match self.server_handle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(server.handle());
        }

        info!("gateway listening on {}", base.listen_addr);
        server.await
    }

    /// Graceful shutdown: stop accepting, drain with a bounded deadline,
    /// retire the active generation (stops health checkers), flush logs.
    pub async fn stop(&self) {
        let handle = {
            let mut guard = match self.server_handle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(handle) = handle {
            handle.stop(true).await;
        }
        self.pipeline.current().retire().await;
        log::logger().flush();
        info!("gateway stopped");
    }

    /// Runs one request through the current generation and emits its
    /// access record. The generation `Arc` is held for the whole request,
    /// so a concurrent reload never swaps state out from under it.
    pub async fn process(pipeline: &PipelineHandle, ctx: &mut Context) {
        let generation = pipeline.current();
        generation.handle(ctx).await;
        spawn_access_log(AccessRecord::from_context(
            ctx,
            &generation.settings.base.instance_id,
        ));
    }
}

/// Catch-all actix entry point.
async fn gateway_entry(
    req: HttpRequest,
    body: web::Bytes,
    pipeline: web::Data<Arc<PipelineHandle>>,
) -> HttpResponse {
    let base = pipeline.current().settings.base.clone();
    let deadline = Instant::now()
        + Duration::from_secs(base.read_timeout_secs + base.write_timeout_secs);

    let mut ctx = Context::new(
        req.method().clone(),
        req.path().to_string(),
        req.query_string().to_string(),
        req.headers().clone(),
        body,
        req.peer_addr(),
    )
    .with_deadline(deadline);

    Gateway::process(&pipeline, &mut ctx).await;
    into_http_response(ctx)
}

/// Converts a finished context into the actix response, streaming bodies
/// straight through.
fn into_http_response(ctx: Context) -> HttpResponse {
    let status = ctx.status().unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    for (name, value) in &ctx.response_headers {
        builder.append_header((name.as_str(), value.as_str()));
    }
    match ctx.response_body {
        ResponseBody::Empty => builder.finish(),
        ResponseBody::Full(bytes) => builder.body(bytes),
        ResponseBody::Stream(stream) => builder.streaming(stream),
    }
}
