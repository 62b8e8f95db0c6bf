//! Cross-origin request validation and pre-flight handling.

use crate::models::error::GatewayError;
use crate::models::settings::CorsSettings;
use crate::pipeline::context::ResponseBody;
use crate::pipeline::{Context, Handler};
use actix_web::http::{Method, StatusCode};
use async_trait::async_trait;
use log::debug;

/// CORS admission stage.
///
/// Requests without an `Origin` header pass through untouched. Requests
/// with a disallowed origin abort with `403`. Allowed origins get the
/// `Access-Control-Allow-*` response headers; `OPTIONS` pre-flights
/// short-circuit the chain with `204` — deliberately before authentication,
/// since browsers send pre-flights without credentials.
pub struct CorsHandler {
    allow_any: bool,
    allowed_origins: Vec<String>,
    allowed_methods: String,
    allowed_headers: String,
    max_age: String,
    allow_credentials: bool,
}

impl CorsHandler {
    pub fn new(settings: &CorsSettings) -> Self {
        Self {
            allow_any: settings.allowed_origins.iter().any(|o| o == "*"),
            allowed_origins: settings.allowed_origins.clone(),
            allowed_methods: settings.allowed_methods.join(","),
            allowed_headers: settings.allowed_headers.join(","),
            max_age: settings.max_age_secs.to_string(),
            allow_credentials: settings.allow_credentials,
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.allow_any || self.allowed_origins.iter().any(|o| o == origin)
    }

    fn write_common_headers(&self, ctx: &mut Context, origin: &str) {
        // With credentials the wildcard is not a legal header value; echo
        // the validated origin instead.
        let allow_origin = if self.allow_any && !self.allow_credentials {
            "*"
        } else {
            origin
        };
        ctx.insert_response_header("Access-Control-Allow-Origin", allow_origin.to_string());
        ctx.insert_response_header("Vary", "Origin");
        if self.allow_credentials {
            ctx.insert_response_header("Access-Control-Allow-Credentials", "true");
        }
    }
}

#[async_trait]
impl Handler for CorsHandler {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn handle(&self, ctx: &mut Context) -> bool {
        let origin = match ctx
            .headers
            .get(actix_web::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
        {
            Some(origin) => origin.to_string(),
            None => return true, // same-origin or non-browser traffic
        };

        if !self.origin_allowed(&origin) {
            ctx.abort_with(&GatewayError::OriginNotAllowed { origin });
            return false;
        }

        self.write_common_headers(ctx, &origin);
        ctx.set("cors_origin", origin.clone());

        if ctx.method == Method::OPTIONS {
            debug!("CORS pre-flight for {} from {}", ctx.path, origin);
            ctx.insert_response_header(
                "Access-Control-Allow-Methods",
                self.allowed_methods.clone(),
            );
            ctx.insert_response_header(
                "Access-Control-Allow-Headers",
                self.allowed_headers.clone(),
            );
            ctx.insert_response_header("Access-Control-Max-Age", self.max_age.clone());
            ctx.respond(StatusCode::NO_CONTENT, ResponseBody::Empty);
            return false; // pre-flight never reaches the upstream
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
    use actix_web::web::Bytes;

    fn settings() -> CorsSettings {
        CorsSettings {
            enabled: true,
            allowed_origins: vec!["https://a.test".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: vec!["Content-Type".to_string()],
            max_age_secs: 3600,
            allow_credentials: false,
        }
    }

    fn ctx_with_origin(method: Method, origin: Option<&str>) -> Context {
        let mut headers = HeaderMap::new();
        if let Some(origin) = origin {
            headers.insert(
                HeaderName::from_static("origin"),
                HeaderValue::from_str(origin).unwrap(),
            );
        }
        Context::new(
            method,
            "/x".to_string(),
            String::new(),
            headers,
            Bytes::new(),
            None,
        )
    }

    #[tokio::test]
    async fn non_cors_request_passes() {
        let handler = CorsHandler::new(&settings());
        let mut ctx = ctx_with_origin(Method::GET, None);
        assert!(handler.handle(&mut ctx).await);
        assert!(ctx.response_headers.is_empty());
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_204() {
        let handler = CorsHandler::new(&settings());
        let mut ctx = ctx_with_origin(Method::OPTIONS, Some("https://a.test"));
        assert!(!handler.handle(&mut ctx).await);
        assert_eq!(ctx.status(), Some(StatusCode::NO_CONTENT));
        assert!(ctx
            .response_headers
            .iter()
            .any(|(k, v)| k == "Access-Control-Allow-Origin" && v == "https://a.test"));
        assert!(ctx
            .response_headers
            .iter()
            .any(|(k, v)| k == "Access-Control-Allow-Methods" && v == "GET,POST"));
    }

    #[tokio::test]
    async fn disallowed_origin_aborts() {
        let handler = CorsHandler::new(&settings());
        let mut ctx = ctx_with_origin(Method::GET, Some("https://b.test"));
        assert!(!handler.handle(&mut ctx).await);
        assert_eq!(ctx.status(), Some(StatusCode::FORBIDDEN));
        assert!(ctx.is_aborted());
    }

    #[tokio::test]
    async fn allowed_get_continues_with_headers() {
        let handler = CorsHandler::new(&settings());
        let mut ctx = ctx_with_origin(Method::GET, Some("https://a.test"));
        assert!(handler.handle(&mut ctx).await);
        assert_eq!(ctx.get("cors_origin"), Some("https://a.test"));
        assert!(ctx
            .response_headers
            .iter()
            .any(|(k, _)| k == "Access-Control-Allow-Origin"));
    }

    #[tokio::test]
    async fn wildcard_with_credentials_echoes_origin() {
        let mut s = settings();
        s.allowed_origins = vec!["*".to_string()];
        s.allow_credentials = true;
        let handler = CorsHandler::new(&s);
        let mut ctx = ctx_with_origin(Method::GET, Some("https://b.test"));
        assert!(handler.handle(&mut ctx).await);
        assert!(ctx
            .response_headers
            .iter()
            .any(|(k, v)| k == "Access-Control-Allow-Origin" && v == "https://b.test"));
    }
}
