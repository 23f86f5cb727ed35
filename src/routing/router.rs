//! Route table: registration and lookup.
//!
//! # Responsibilities
//! - Store routes keyed by (method, pattern)
//! - Replace the body in place when a key is registered again
//! - Look up the first route matching a request
//!
//! # Design Decisions
//! - Copy-on-write: readers take an immutable snapshot via `ArcSwap`,
//!   so a dispatch never holds a lock while its script runs
//! - First match in registration order wins; overlapping patterns are
//!   not ranked by specificity
//! - Explicit no-match (`None`) rather than a silent default

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::error::Result;
use crate::routing::matcher::{Params, PathPattern};

/// A registered route.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: String,
    pub pattern: PathPattern,
    pub params: Vec<String>,
    pub body: String,
}

/// Serializable summary of a route, for listings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: String,
    pub pattern: String,
    pub params: Vec<String>,
}

/// The outcome of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: Params,
}

/// Concurrency-safe, ordered route registry.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<Route>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, or replace the body of an existing (method, pattern).
    ///
    /// Methods are stored upper-cased.
    pub fn register(&self, method: &str, pattern: &str, body: &str) -> Result<()> {
        let compiled = PathPattern::parse(pattern)?;
        let route = Arc::new(Route {
            method: method.to_ascii_uppercase(),
            params: compiled.param_names(),
            pattern: compiled,
            body: body.to_string(),
        });

        self.routes.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter().position(|r| {
                r.method == route.method && r.pattern.as_str() == route.pattern.as_str()
            }) {
                Some(index) => next[index] = Arc::clone(&route),
                None => next.push(Arc::clone(&route)),
            }
            next
        });

        tracing::debug!(method = %route.method, pattern = %route.pattern, "Route registered");
        Ok(())
    }

    /// Immutable view of the routes at this instant.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Route>>> {
        self.routes.load_full()
    }

    /// Find the first route registered for `method` whose pattern matches `path`.
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let routes = self.snapshot();
        routes
            .iter()
            .filter(|route| route.method.eq_ignore_ascii_case(method))
            .find_map(|route| {
                route.pattern.matches(path).map(|params| RouteMatch {
                    route: Arc::clone(route),
                    params,
                })
            })
    }

    /// Summaries of all routes in registration order.
    pub fn list(&self) -> Vec<RouteInfo> {
        self.snapshot()
            .iter()
            .map(|route| RouteInfo {
                method: route.method.clone(),
                pattern: route.pattern.as_str().to_string(),
                params: route.params.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reregister_replaces_in_place() {
        let table = RouteTable::new();
        table.register("GET", "/a", "respond(\"one\")").unwrap();
        table.register("GET", "/b", "respond(\"b\")").unwrap();
        table.register("GET", "/a", "respond(\"two\")").unwrap();

        assert_eq!(table.len(), 2);
        let snapshot = table.snapshot();
        assert_eq!(snapshot[0].pattern.as_str(), "/a");
        assert_eq!(snapshot[0].body, "respond(\"two\")");
    }

    #[test]
    fn test_same_pattern_different_method_is_distinct() {
        let table = RouteTable::new();
        table.register("GET", "/items", "1").unwrap();
        table.register("post", "/items", "2").unwrap();
        assert_eq!(table.len(), 2);

        let found = table.match_route("POST", "/items").unwrap();
        assert_eq!(found.route.body, "2");
        assert!(table.match_route("DELETE", "/items").is_none());
    }

    #[test]
    fn test_first_match_in_registration_order() {
        let table = RouteTable::new();
        table.register("GET", "/a/:x", "param").unwrap();
        table.register("GET", "/a/b", "literal").unwrap();

        let found = table.match_route("GET", "/a/b").unwrap();
        assert_eq!(found.route.body, "param");
        assert_eq!(found.params["x"], "b");
    }

    #[test]
    fn test_snapshot_is_stable_across_registration() {
        let table = RouteTable::new();
        table.register("GET", "/a", "old").unwrap();
        let before = table.snapshot();
        table.register("GET", "/a", "new").unwrap();

        assert_eq!(before[0].body, "old");
        assert_eq!(table.snapshot()[0].body, "new");
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let table = RouteTable::new();
        assert!(table.register("GET", "/x/:", "body").is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_list() {
        let table = RouteTable::new();
        table.register("GET", "/hello/:name", "body").unwrap();
        assert_eq!(
            table.list(),
            vec![RouteInfo {
                method: "GET".into(),
                pattern: "/hello/:name".into(),
                params: vec!["name".into()],
            }]
        );
    }
}
