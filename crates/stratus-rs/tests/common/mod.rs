//! Shared helpers for the integration tests.

#![allow(dead_code)]

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::Method;
use actix_web::web::Bytes;
use std::net::SocketAddr;
use stratus_rs::models::route::{MatchType, Route};
use stratus_rs::models::service::{
    DiscoveryMode, HealthCheckSpec, LoadBalancingStrategy, NodeConfig, ServiceDef,
};
use stratus_rs::models::settings::GatewaySettings;
use stratus_rs::pipeline::context::{Context, ResponseBody};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn route(id: &str, path: &str, service_id: &str, methods: &[&str]) -> Route {
    Route {
        id: id.to_string(),
        tenant: None,
        path: path.to_string(),
        match_type: MatchType::Exact,
        methods: methods.iter().map(|m| m.to_string()).collect(),
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

pub fn node(host: &str, port: u16) -> NodeConfig {
    NodeConfig {
        host: host.to_string(),
        port,
        protocol: "http".to_string(),
        weight: 1,
        enabled: true,
    }
}

pub fn service(id: &str, nodes: Vec<NodeConfig>) -> ServiceDef {
    ServiceDef {
        id: id.to_string(),
        name: id.to_string(),
        discovery: DiscoveryMode::Static,
        strategy: LoadBalancingStrategy::RoundRobin,
        health: None,
        circuit_breaker: None,
        nodes,
    }
}

pub fn service_with_health(id: &str, nodes: Vec<NodeConfig>, spec: HealthCheckSpec) -> ServiceDef {
    ServiceDef {
        health: Some(spec),
        ..service(id, nodes)
    }
}

pub fn settings_with(routes: Vec<Route>, services: Vec<ServiceDef>) -> GatewaySettings {
    let mut settings = GatewaySettings::default();
    settings.router.routes = routes;
    settings.proxy.services = services;
    settings
}

pub fn request(method: Method, path: &str) -> Context {
    request_with_headers(method, path, &[])
}

pub fn request_with_headers(method: Method, path: &str, headers: &[(&str, &str)]) -> Context {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        header_map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    Context::new(
        method,
        path.to_string(),
        String::new(),
        header_map,
        Bytes::new(),
        Some("203.0.113.7:52100".parse().unwrap()),
    )
}

/// Drains the response body, streamed or buffered.
pub async fn read_body(ctx: Context) -> Vec<u8> {
    use futures_util::StreamExt;
    match ctx.response_body {
        ResponseBody::Empty => Vec::new(),
        ResponseBody::Full(bytes) => bytes.to_vec(),
        ResponseBody::Stream(mut stream) => {
            let mut out = Vec::new();
            while let Some(chunk) = stream.next().await {
                out.extend_from_slice(&chunk.expect("stream chunk"));
            }
            out
        }
    }
}

/// Minimal HTTP/1.1 upstream answering every request with a fixed status
/// and body. Returns the bound address; the accept loop lives until the
/// test process exits.
pub async fn spawn_upstream(status: u16, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let mut read = 0;
                loop {
                    match stream.read(&mut buf[read..]).await {
                        Ok(0) => break,
                        Ok(n) => {
                            read += n;
                            if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                            if read == buf.len() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                let reason = match status {
                    200 => "OK",
                    204 => "No Content",
                    500 => "Internal Server Error",
                    502 => "Bad Gateway",
                    503 => "Service Unavailable",
                    _ => "Response",
                };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

/// A port nothing listens on: bind, read the port, drop the listener.
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
