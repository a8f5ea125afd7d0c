//! Upstream resolver.
//!
//! Round-robin over the endpoints of the matched service. The rotation
//! counter is kept per service name so catalog reloads keep their position.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use url::Url;

use crate::context::{AuthResponse, RequestContext};
use crate::http::request::BoxError;
use crate::upstream::Upstream;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("service '{0}' has no endpoints")]
    NoEndpoints(String),

    #[error("service '{service}' endpoint '{url}' is invalid: {source}")]
    InvalidEndpoint {
        service: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("upstream resolution failed: {0}")]
    Backend(#[source] BoxError),
}

/// Resolves the backend a request is forwarded to.
#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    async fn resolve(&self, ctx: &RequestContext, auth: &AuthResponse) -> Result<Upstream, ResolveError>;
}

/// Round-robin selector over statically configured endpoints.
#[derive(Debug, Default)]
pub struct StaticUpstreamResolver {
    counters: DashMap<String, usize>,
}

impl StaticUpstreamResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, service: &str, len: usize) -> usize {
        let mut counter = self.counters.entry(service.to_string()).or_insert(0);
        let index = *counter % len;
        *counter = counter.wrapping_add(1);
        index
    }
}

#[async_trait]
impl UpstreamResolver for StaticUpstreamResolver {
    async fn resolve(&self, ctx: &RequestContext, auth: &AuthResponse) -> Result<Upstream, ResolveError> {
        let service = &ctx.service;
        if service.endpoints.is_empty() {
            return Err(ResolveError::NoEndpoints(service.name.clone()));
        }

        let endpoint = &service.endpoints[self.next_index(&service.name, service.endpoints.len())];
        let url = Url::parse(&endpoint.url).map_err(|source| ResolveError::InvalidEndpoint {
            service: service.name.clone(),
            url: endpoint.url.clone(),
            source,
        })?;

        tracing::debug!(
            service = %service.name,
            subject = %auth.subject_or_anonymous(),
            upstream = %url,
            "Resolved upstream"
        );

        Ok(match &endpoint.host_port {
            Some(host_port) => Upstream::user(url, host_port.clone()),
            None => Upstream::managed(url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, Service};
    use crate::http::request::InboundRequest;
    use bytes::Bytes;
    use http::Request;
    use std::sync::Arc;

    fn ctx(endpoints: Vec<EndpointConfig>) -> RequestContext {
        let (parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let service = Service {
            name: "api".into(),
            endpoints,
            ..Default::default()
        };
        RequestContext::new(
            "req-1",
            InboundRequest::from_parts(&parts, None),
            Arc::new(service),
            AuthResponse::anonymous(),
            Bytes::new(),
        )
    }

    fn endpoint(url: &str) -> EndpointConfig {
        EndpointConfig {
            url: url.into(),
            host_port: None,
        }
    }

    #[tokio::test]
    async fn rotates_through_endpoints() {
        let resolver = StaticUpstreamResolver::new();
        let ctx = ctx(vec![endpoint("http://a:1"), endpoint("http://b:2")]);
        let auth = AuthResponse::anonymous();

        let mut hosts = Vec::new();
        for _ in 0..4 {
            hosts.push(resolver.resolve(&ctx, &auth).await.unwrap().host());
        }
        assert_eq!(hosts, vec!["a:1", "b:2", "a:1", "b:2"]);
    }

    #[tokio::test]
    async fn host_port_marks_user_upstream() {
        let resolver = StaticUpstreamResolver::new();
        let ctx = ctx(vec![EndpointConfig {
            url: "http://peer".into(),
            host_port: Some("127.0.0.1:9999".into()),
        }]);
        let up = resolver.resolve(&ctx, &AuthResponse::anonymous()).await.unwrap();
        assert!(up.is_user);
        assert_eq!(up.dial_target(), "127.0.0.1:9999");
    }

    #[tokio::test]
    async fn empty_service_fails() {
        let resolver = StaticUpstreamResolver::new();
        let err = resolver
            .resolve(&ctx(vec![]), &AuthResponse::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoEndpoints(name) if name == "api"));
    }

    #[tokio::test]
    async fn invalid_url_fails() {
        let resolver = StaticUpstreamResolver::new();
        let err = resolver
            .resolve(&ctx(vec![endpoint("not a url")]), &AuthResponse::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidEndpoint { .. }));
    }
}
