//! Outbound path rewriting and URL assembly.

use crate::models::route::{MatchType, Route};

/// Computes the upstream path for a matched request.
///
/// Prefix routes may strip the matched prefix; any route may prepend a
/// rewrite prefix. The result always starts with `/`.
pub fn rewrite_path(route: &Route, request_path: &str) -> String {
    let mut path = request_path.to_string();

    if route.strip_prefix && route.match_type == MatchType::Prefix {
        let pattern = route.path.trim_end_matches('/');
        if let Some(rest) = path.strip_prefix(pattern) {
            path = rest.to_string();
        }
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
    }

    if let Some(prefix) = &route.rewrite_prefix {
        let prefix = prefix.trim_end_matches('/');
        path = format!("{}{}", prefix, path);
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
    }

    path
}

/// Joins a node base URL, path and raw query into the forward URL.
pub fn build_upstream_url(base_url: &str, path: &str, query: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if query.is_empty() {
        format!("{}{}", base, path)
    } else {
        format!("{}{}?{}", base, path, query)
    }
}
