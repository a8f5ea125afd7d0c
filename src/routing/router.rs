//! Service lookup.
//!
//! # Responsibilities
//! - Store compiled routes, one per service
//! - Look up the service for a request
//! - Return matched service or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction; a reload builds a new router
//! - O(n) scan in priority order (acceptable for typical catalog sizes)
//! - Equal priorities keep catalog order
//! - Explicit no-match rather than silent default

use std::sync::Arc;

use crate::config::Service;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

#[derive(Debug)]
struct Route {
    matcher: AndMatcher,
    service: Arc<Service>,
}

/// Priority-ordered service routes.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn from_services(services: &[Service]) -> Self {
        let mut services: Vec<&Service> = services.iter().collect();
        services.sort_by(|a, b| b.priority.cmp(&a.priority));

        let routes = services
            .into_iter()
            .map(|service| {
                let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
                if let Some(host) = &service.host {
                    matchers.push(Box::new(HostMatcher::new(host.clone())));
                }
                if let Some(prefix) = &service.path_prefix {
                    matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
                }
                Route {
                    matcher: AndMatcher::new(matchers),
                    service: Arc::new(service.clone()),
                }
            })
            .collect();
        Self { routes }
    }

    /// First service, by priority, whose conditions all match.
    pub fn match_request(&self, host: &str, path: &str) -> Option<Arc<Service>> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(host, path))
            .map(|route| route.service.clone())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, host: Option<&str>, prefix: Option<&str>, priority: u32) -> Service {
        Service {
            name: name.into(),
            host: host.map(str::to_string),
            path_prefix: prefix.map(str::to_string),
            priority,
            ..Default::default()
        }
    }

    #[test]
    fn highest_priority_wins() {
        let router = Router::from_services(&[
            service("catch-all", None, Some("/"), 0),
            service("api", None, Some("/api"), 10),
        ]);
        assert_eq!(router.match_request("h", "/api/x").unwrap().name, "api");
        assert_eq!(router.match_request("h", "/web").unwrap().name, "catch-all");
    }

    #[test]
    fn host_and_prefix_must_both_match() {
        let router = Router::from_services(&[service("a", Some("a.example.com"), Some("/v1"), 0)]);
        assert!(router.match_request("a.example.com", "/v1/users").is_some());
        assert!(router.match_request("b.example.com", "/v1/users").is_none());
        assert!(router.match_request("a.example.com", "/v2").is_none());
    }

    #[test]
    fn equal_priority_keeps_catalog_order() {
        let router = Router::from_services(&[
            service("first", None, None, 5),
            service("second", None, None, 5),
        ]);
        assert_eq!(router.match_request("h", "/").unwrap().name, "first");
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn empty_router_matches_nothing() {
        let router = Router::default();
        assert!(router.is_empty());
        assert!(router.match_request("h", "/").is_none());
    }
}
