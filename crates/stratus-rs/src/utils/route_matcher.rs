//! Route table with specificity-ordered matching.
//!
//! Lookup strategy, most to least specific: exact paths (hash map), then
//! prefix routes, then regex routes. Within one specificity class a higher
//! explicit priority wins and ties fall back to configuration order, which
//! makes matching fully deterministic. Tenant-scoped routes are preferred
//! over shared (tenant-less) routes of the same specificity.

use crate::models::route::{MatchType, Route};
use crate::models::settings::RouterSettings;
use ahash::HashMap as AHashMap;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

/// Errors from route-table construction and matching.
#[derive(Error, Debug)]
pub enum RouteMatchError {
    /// The route pattern contains invalid syntax.
    #[error("Invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    /// Failed to compile a regex route.
    #[error("Regex compilation failed for route {route_id}: {message}")]
    RegexError { route_id: String, message: String },

    /// No configured route matches the requested path.
    #[error("No matching route found for path: {path}")]
    NoMatch { path: String },

    /// A route matches the path but not the method.
    #[error("Method {method} not allowed for path: {path}")]
    MethodNotAllowed { method: String, path: String },
}

/// Successful lookup: the route plus any named regex captures.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Named captures from regex routes, in declaration order.
    pub params: Vec<(String, String)>,
}

#[derive(Debug)]
struct CompiledRegexRoute {
    route: Arc<Route>,
    regex: Arc<Regex>,
    param_names: Vec<String>,
    insertion: usize,
}

#[derive(Debug)]
struct OrderedRoute {
    route: Arc<Route>,
    insertion: usize,
}

/// Immutable routing table, rebuilt per pipeline generation.
#[derive(Debug)]
pub struct RouteTable {
    exact: AHashMap<String, Vec<OrderedRoute>>,
    prefix: Vec<OrderedRoute>,
    regex: Vec<CompiledRegexRoute>,
    case_sensitive: bool,
    normalize_trailing_slash: bool,
}

impl RouteTable {
    /// Compiles the route list into the lookup structures.
    ///
    /// Inactive routes are kept out of the table entirely: they can never
    /// match, so they cost nothing at request time.
    pub fn new(routes: &[Route], settings: &RouterSettings) -> Result<Self, RouteMatchError> {
        let mut exact: AHashMap<String, Vec<OrderedRoute>> = AHashMap::default();
        let mut prefix = Vec::new();
        let mut regex_routes = Vec::new();

        for (insertion, route) in routes.iter().enumerate() {
            if !route.active {
                continue;
            }
            let route = Arc::new(route.clone());
            match route.match_type {
                MatchType::Exact => {
                    let key = normalize_key(&route.path, settings.case_sensitive);
                    exact
                        .entry(key)
                        .or_default()
                        .push(OrderedRoute { route, insertion });
                }
                MatchType::Prefix => {
                    prefix.push(OrderedRoute { route, insertion });
                }
                MatchType::Regex => {
                    let pattern = if settings.case_sensitive {
                        route.path.clone()
                    } else {
                        format!("(?i){}", route.path)
                    };
                    let compiled = Regex::new(&anchor(&pattern)).map_err(|e| {
                        RouteMatchError::RegexError {
                            route_id: route.id.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    let param_names = compiled
                        .capture_names()
                        .flatten()
                        .map(|s| s.to_string())
                        .collect();
                    regex_routes.push(CompiledRegexRoute {
                        route,
                        regex: Arc::new(compiled),
                        param_names,
                        insertion,
                    });
                }
            }
        }

        // Priority desc, then configuration order.
        for bucket in exact.values_mut() {
            bucket.sort_by_key(|o| (-o.route.priority, o.insertion));
        }
        prefix.sort_by_key(|o| (-o.route.priority, o.insertion));
        regex_routes.sort_by_key(|o| (-o.route.priority, o.insertion));

        Ok(Self {
            exact,
            prefix,
            regex: regex_routes,
            case_sensitive: settings.case_sensitive,
            normalize_trailing_slash: settings.normalize_trailing_slash,
        })
    }

    /// Resolves `(method, path)` for `tenant` to a route.
    ///
    /// # Errors
    ///
    /// `MethodNotAllowed` when at least one route matched the path but none
    /// accepted the method; `NoMatch` otherwise.
    pub fn find_match(
        &self,
        method: &str,
        path: &str,
        tenant: &str,
    ) -> Result<RouteMatch, RouteMatchError> {
        let lookup_path = self.normalize_path(path);
        let mut path_matched = false;

        // Tenant-specific routes win over shared ones at equal specificity.
        for tenanted_pass in [true, false] {
            if let Some(bucket) = self.exact.get(lookup_path.as_str()) {
                for entry in bucket {
                    if !self.route_visible(&entry.route, tenant, tenanted_pass) {
                        continue;
                    }
                    path_matched = true;
                    if entry.route.method_allowed(method) {
                        return Ok(RouteMatch {
                            route: entry.route.clone(),
                            params: Vec::new(),
                        });
                    }
                }
            }
        }

        for tenanted_pass in [true, false] {
            for entry in &self.prefix {
                if !self.route_visible(&entry.route, tenant, tenanted_pass) {
                    continue;
                }
                if !self.prefix_matches(&entry.route.path, &lookup_path) {
                    continue;
                }
                path_matched = true;
                if entry.route.method_allowed(method) {
                    return Ok(RouteMatch {
                        route: entry.route.clone(),
                        params: Vec::new(),
                    });
                }
            }
        }

        for tenanted_pass in [true, false] {
            for entry in &self.regex {
                if !self.route_visible(&entry.route, tenant, tenanted_pass) {
                    continue;
                }
                if let Some(captures) = entry.regex.captures(&lookup_path) {
                    path_matched = true;
                    if entry.route.method_allowed(method) {
                        let params = entry
                            .param_names
                            .iter()
                            .filter_map(|name| {
                                captures
                                    .name(name)
                                    .map(|m| (name.clone(), m.as_str().to_string()))
                            })
                            .collect();
                        return Ok(RouteMatch {
                            route: entry.route.clone(),
                            params,
                        });
                    }
                }
            }
        }

        if path_matched {
            Err(RouteMatchError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            })
        } else {
            Err(RouteMatchError::NoMatch {
                path: path.to_string(),
            })
        }
    }

    fn route_visible(&self, route: &Route, tenant: &str, tenanted_pass: bool) -> bool {
        match &route.tenant {
            Some(owner) => tenanted_pass && owner == tenant,
            None => !tenanted_pass,
        }
    }

    fn normalize_path(&self, path: &str) -> String {
        let mut p = if self.case_sensitive {
            path.to_string()
        } else {
            path.to_ascii_lowercase()
        };
        if self.normalize_trailing_slash && p.len() > 1 && p.ends_with('/') {
            p.pop();
        }
        p
    }

    /// Prefix match at a path-segment boundary: `/api` matches `/api` and
    /// `/api/x` but not `/apix`.
    fn prefix_matches(&self, pattern: &str, path: &str) -> bool {
        let pattern = normalize_key(pattern, self.case_sensitive);
        if pattern.ends_with('/') {
            return path.starts_with(pattern.as_str()) || *path == pattern[..pattern.len() - 1];
        }
        match path.strip_prefix(pattern.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    /// Routes currently in the table (all specificity classes).
    pub fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.prefix.len() + self.regex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_key(path: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        path.to_string()
    } else {
        path.to_ascii_lowercase()
    }
}

/// Anchors a regex pattern on both ends unless the author already did.
fn anchor(pattern: &str) -> String {
    let (flags, body) = match pattern.strip_prefix("(?i)") {
        Some(rest) => ("(?i)", rest),
        None => ("", pattern),
    };
    let mut anchored = String::with_capacity(pattern.len() + 2);
    anchored.push_str(flags);
    if !body.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(body);
    if !body.ends_with('$') {
        anchored.push('$');
    }
    anchored
}
