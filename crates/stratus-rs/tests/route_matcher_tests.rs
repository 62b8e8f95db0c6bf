//! Routing integration tests: specificity, overrides, parameters.

mod common;

use actix_web::http::{Method, StatusCode};
use stratus_rs::models::route::MatchType;
use stratus_rs::pipeline::generation::PipelineGeneration;

#[tokio::test]
async fn specificity_orders_exact_prefix_regex() {
    let mut prefix = common::route("catchall", "/api", "svc", &["GET"]);
    prefix.match_type = MatchType::Prefix;
    prefix.priority = 100;

    let mut rx = common::route("versioned", r"/api/v(?P<version>[0-9]+)/.*", "svc", &["GET"]);
    rx.match_type = MatchType::Regex;
    rx.priority = 200;

    let exact = common::route("users", "/api/v1/users", "svc", &["GET"]);

    let mut settings = common::settings_with(
        vec![prefix, rx, exact],
        vec![common::service("svc", vec![common::node("127.0.0.1", 9)])],
    );
    settings.proxy.enabled = false;

    let generation = PipelineGeneration::build(settings, 1).unwrap();

    // Exact wins regardless of the others' priorities.
    let mut ctx = common::request(Method::GET, "/api/v1/users");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.route_id(), Some("users"));

    // Prefix beats regex despite lower priority: specificity first.
    let mut ctx = common::request(Method::GET, "/api/v2/posts");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.route_id(), Some("catchall"));

    generation.retire().await;
}

#[tokio::test]
async fn regex_captures_reach_the_context_map() {
    let mut rx = common::route(
        "post",
        r"/users/(?P<user_id>[0-9]+)/posts/(?P<post_id>[a-z0-9-]+)",
        "svc",
        &["GET"],
    );
    rx.match_type = MatchType::Regex;

    let mut settings = common::settings_with(
        vec![rx],
        vec![common::service("svc", vec![common::node("127.0.0.1", 9)])],
    );
    settings.proxy.enabled = false;

    let generation = PipelineGeneration::build(settings, 1).unwrap();
    let mut ctx = common::request(Method::GET, "/users/42/posts/first-post");
    generation.handle(&mut ctx).await;

    assert_eq!(ctx.route_id(), Some("post"));
    assert_eq!(ctx.get("route_param_user_id"), Some("42"));
    assert_eq!(ctx.get("route_param_post_id"), Some("first-post"));
    generation.retire().await;
}

#[tokio::test]
async fn equal_specificity_resolves_by_priority_then_order() {
    // Distinct patterns (the uniqueness invariant forbids exact
    // duplicates) that all prefix-match the same request path.
    let mut low = common::route("low", "/api", "svc", &["GET"]);
    low.match_type = MatchType::Prefix;
    low.priority = 1;
    let mut high = common::route("high", "/api/", "svc", &["GET"]);
    high.match_type = MatchType::Prefix;
    high.priority = 9;

    let mut first = common::route("first", "/api", "svc", &["POST"]);
    first.match_type = MatchType::Prefix;
    first.priority = 5;
    let mut second = common::route("second", "/api/", "svc", &["POST"]);
    second.match_type = MatchType::Prefix;
    second.priority = 5;

    let mut settings = common::settings_with(
        vec![low, high, first, second],
        vec![common::service("svc", vec![common::node("127.0.0.1", 9)])],
    );
    settings.proxy.enabled = false;

    let generation = PipelineGeneration::build(settings, 1).unwrap();

    // Priority decides within the prefix class.
    let mut ctx = common::request(Method::GET, "/api/x");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.route_id(), Some("high"));

    // Equal priority falls back to configuration order.
    let mut ctx = common::request(Method::POST, "/api/x");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.route_id(), Some("first"));

    generation.retire().await;
}

#[tokio::test]
async fn method_mismatch_is_405_not_404() {
    let mut settings = common::settings_with(
        vec![common::route("users", "/api/users", "svc", &["GET", "PUT"])],
        vec![common::service("svc", vec![common::node("127.0.0.1", 9)])],
    );
    settings.proxy.enabled = false;

    let generation = PipelineGeneration::build(settings, 1).unwrap();

    let mut ctx = common::request(Method::DELETE, "/api/users");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.status(), Some(StatusCode::METHOD_NOT_ALLOWED));

    let mut ctx = common::request(Method::GET, "/api/ghosts");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.status(), Some(StatusCode::NOT_FOUND));

    generation.retire().await;
}

#[tokio::test]
async fn tenant_scoped_routes_are_isolated() {
    let mut acme = common::route("acme-users", "/api/users", "svc", &["GET"]);
    acme.tenant = Some("acme".to_string());
    let shared = common::route("shared-users", "/api/users", "svc", &["GET"]);

    let mut settings = common::settings_with(
        vec![acme, shared],
        vec![common::service("svc", vec![common::node("127.0.0.1", 9)])],
    );
    settings.proxy.enabled = false;

    let generation = PipelineGeneration::build(settings, 1).unwrap();

    let mut ctx =
        common::request_with_headers(Method::GET, "/api/users", &[("x-tenant-id", "acme")]);
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.route_id(), Some("acme-users"));

    let mut ctx = common::request(Method::GET, "/api/users");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.route_id(), Some("shared-users"));

    generation.retire().await;
}

#[tokio::test]
async fn inactive_routes_do_not_match() {
    let mut off = common::route("off", "/api/users", "svc", &["GET"]);
    off.active = false;

    let mut settings = common::settings_with(
        vec![off],
        vec![common::service("svc", vec![common::node("127.0.0.1", 9)])],
    );
    settings.proxy.enabled = false;

    let generation = PipelineGeneration::build(settings, 1).unwrap();
    let mut ctx = common::request(Method::GET, "/api/users");
    generation.handle(&mut ctx).await;
    assert_eq!(ctx.status(), Some(StatusCode::NOT_FOUND));
    generation.retire().await;
}
