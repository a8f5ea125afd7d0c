//! Pipeline selection.
//!
//! Picks the handler for one exchange: the configured direct response when the
//! service has one, otherwise a proxy engine bound to a freshly resolved
//! upstream and its transport. Resolution failures end the request.

use axum::body::Body;
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::proxy::direct::DirectResponseHandler;
use crate::proxy::director::Director;
use crate::proxy::engine::{EngineOptions, ProxyEngine};
use crate::upstream::{TransportResolver, UpstreamResolver};

/// Serves exactly one exchange.
pub enum Handler {
    Direct {
        service: String,
        handler: DirectResponseHandler,
    },
    Proxy(ProxyEngine),
}

impl Handler {
    pub fn is_direct(&self) -> bool {
        matches!(self, Handler::Direct { .. })
    }

    pub async fn serve(self, client_upgrade: Option<OnUpgrade>) -> Response<Body> {
        match self {
            Handler::Direct { service, handler } => {
                metrics::record_direct_response(&service);
                handler.respond()
            }
            Handler::Proxy(engine) => engine.serve(client_upgrade).await,
        }
    }
}

/// Builds handlers from request contexts.
#[derive(Clone)]
pub struct PipelineSelector {
    resolver: Arc<dyn UpstreamResolver>,
    transports: Arc<dyn TransportResolver>,
    director: Director,
    options: Arc<EngineOptions>,
}

impl PipelineSelector {
    pub fn new(
        resolver: Arc<dyn UpstreamResolver>,
        transports: Arc<dyn TransportResolver>,
        director: Director,
        options: Arc<EngineOptions>,
    ) -> Self {
        Self {
            resolver,
            transports,
            director,
            options,
        }
    }

    pub async fn select(&self, ctx: RequestContext) -> Result<Handler, ProxyError> {
        if let Some(direct) = ctx.config().and_then(|c| c.direct_response()) {
            tracing::debug!(
                request_id = %ctx.request_id,
                service = %ctx.service.name,
                "Serving direct response"
            );
            return Ok(Handler::Direct {
                service: ctx.service.name.clone(),
                handler: DirectResponseHandler::new(direct, self.options.product.clone()),
            });
        }

        let upstream = self.resolver.resolve(&ctx, &ctx.auth).await?;
        let transport = self.transports.transport_for(&upstream).await?;

        Ok(Handler::Proxy(ProxyEngine::new(
            ctx,
            upstream,
            transport,
            self.director.clone(),
            self.options.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DirectBody, DirectResponse, EndpointConfig, HttpConfig, ResponseConfig, Service, ServiceConfig,
    };
    use crate::context::AuthResponse;
    use crate::http::request::{BoxError, InboundRequest, OutboundRequest};
    use crate::proxy::buffer_pool::BufferPool;
    use crate::signing::{InMemorySecretStore, RequestSigner};
    use crate::upstream::{
        ResolveError, StaticUpstreamResolver, Transport, TransportError, Upstream, UpstreamBody,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderValue, Request, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NeverTransport;

    #[async_trait]
    impl Transport for NeverTransport {
        async fn round_trip(&self, _req: OutboundRequest) -> Result<http::Response<UpstreamBody>, BoxError> {
            Err("not expected".into())
        }
    }

    #[derive(Default)]
    struct CountingTransports {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TransportResolver for CountingTransports {
        async fn transport_for(&self, upstream: &Upstream) -> Result<Arc<dyn Transport>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::UnsupportedScheme(upstream.scheme().to_string()));
            }
            Ok(Arc::new(NeverTransport))
        }
    }

    fn selector(transports: Arc<CountingTransports>) -> PipelineSelector {
        let product = HeaderValue::from_static("octelium");
        let director = Director::new(product.clone(), RequestSigner::new(Arc::new(InMemorySecretStore::new())));
        let options = Arc::new(EngineOptions {
            product,
            flush_interval: Duration::from_millis(100),
            pool: BufferPool::new(1024, 4),
        });
        PipelineSelector::new(Arc::new(StaticUpstreamResolver::new()), transports, director, options)
    }

    fn ctx(service: Service) -> RequestContext {
        let (parts, _) = Request::builder()
            .uri("/x")
            .header("host", "gw")
            .body(())
            .unwrap()
            .into_parts();
        RequestContext::new(
            "req-1",
            InboundRequest::from_parts(&parts, None),
            Arc::new(service),
            AuthResponse::anonymous(),
            Bytes::new(),
        )
    }

    fn proxied_service() -> Service {
        Service {
            name: "api".into(),
            endpoints: vec![EndpointConfig {
                url: "http://backend:8080".into(),
                host_port: None,
            }],
            ..Default::default()
        }
    }

    fn direct_service() -> Service {
        Service {
            name: "static".into(),
            config: Some(ServiceConfig {
                http: Some(HttpConfig {
                    response: Some(ResponseConfig {
                        direct: Some(DirectResponse {
                            body: Some(DirectBody::Inline("hi".into())),
                            content_type: "text/plain".into(),
                            status_code: 203,
                        }),
                    }),
                    auth: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn direct_response_skips_resolution() {
        let transports = Arc::new(CountingTransports::default());
        let handler = selector(transports.clone()).select(ctx(direct_service())).await.unwrap();

        assert!(handler.is_direct());
        assert_eq!(transports.calls.load(Ordering::SeqCst), 0);
        let resp = handler.serve(None).await;
        assert_eq!(resp.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
    }

    #[tokio::test]
    async fn proxy_engine_bound_to_resolved_upstream() {
        let transports = Arc::new(CountingTransports::default());
        let handler = selector(transports.clone()).select(ctx(proxied_service())).await.unwrap();

        match handler {
            Handler::Proxy(engine) => assert_eq!(engine.upstream().host(), "backend:8080"),
            Handler::Direct { .. } => panic!("expected proxy handler"),
        }
        assert_eq!(transports.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolution_failure_propagates() {
        let service = Service {
            name: "empty".into(),
            ..Default::default()
        };
        let transports = Arc::new(CountingTransports::default());
        let err = selector(transports.clone()).select(ctx(service)).await.err().unwrap();

        assert!(matches!(err, ProxyError::Resolve(ResolveError::NoEndpoints(_))));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(transports.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let transports = Arc::new(CountingTransports {
            fail: true,
            ..Default::default()
        });
        let err = selector(transports).select(ctx(proxied_service())).await.err().unwrap();
        assert!(matches!(err, ProxyError::Transport(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
