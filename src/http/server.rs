//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway handler
//! - Configure HTTP/1.1 and HTTP/2 support, optional TLS
//! - Wire up middleware (request ID, tracing, concurrency limit)
//! - Match the service, capture the body, build the request context
//! - Hand the exchange to the proxy pipeline
//! - Swap the service catalog and secrets on config reload

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request},
    response::{IntoResponse, Response},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use http_body_util::LengthLimitError;
use hyper::upgrade::OnUpgrade;
use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::context::{AuthResponse, RequestContext};
use crate::error::ProxyError;
use crate::http::request::InboundRequest;
use crate::observability::metrics;
use crate::proxy::{BufferPool, Director, EngineOptions, PipelineSelector};
use crate::routing::Router as ProxyRouter;
use crate::signing::{InMemorySecretStore, RequestSigner};
use crate::upstream::{HyperTransportResolver, StaticUpstreamResolver, TransportResolver, UpstreamResolver};

pub const X_REQUEST_ID: &str = "x-request-id";

const DEFAULT_PRODUCT: &str = "octelium";
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ArcSwap<ProxyRouter>>,
    pub selector: PipelineSelector,
    pub max_body_size: usize,
}

/// HTTP server for the access gateway.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    catalog: Arc<ArcSwap<ProxyRouter>>,
    secrets: Arc<InMemorySecretStore>,
}

impl HttpServer {
    /// Create a server backed by the bundled resolver and hyper transports.
    pub fn new(config: ProxyConfig) -> Self {
        let transports = Arc::new(HyperTransportResolver::new(&config.timeouts));
        Self::with_collaborators(config, Arc::new(StaticUpstreamResolver::new()), transports)
    }

    /// Create a server with caller-supplied upstream and transport resolution.
    pub fn with_collaborators(
        config: ProxyConfig,
        resolver: Arc<dyn UpstreamResolver>,
        transports: Arc<dyn TransportResolver>,
    ) -> Self {
        let secrets = Arc::new(InMemorySecretStore::from_config(&config.secrets));
        let product = product_header(&config.proxy.product);
        let director = Director::new(product.clone(), RequestSigner::new(secrets.clone()));
        let options = Arc::new(EngineOptions {
            product,
            flush_interval: config.proxy.flush_interval(),
            pool: BufferPool::new(config.proxy.buffer_size, config.proxy.buffer_pool_capacity),
        });

        let catalog = Arc::new(ArcSwap::from_pointee(ProxyRouter::from_services(&config.services)));
        let state = AppState {
            router: catalog.clone(),
            selector: PipelineSelector::new(resolver, transports, director, options),
            max_body_size: config.proxy.max_body_size,
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            catalog,
            secrets,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(ConcurrencyLimitLayer::new(config.listener.max_connections.max(1)))
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.catalog.load().len(),
            "HTTP server starting"
        );

        let reload = spawn_reload(self.catalog.clone(), self.secrets.clone(), config_updates);
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        reload.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server behind rustls on `addr`.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        tracing::info!(
            address = %addr,
            services = self.catalog.load().len(),
            "HTTPS server starting"
        );

        let reload = spawn_reload(self.catalog.clone(), self.secrets.clone(), config_updates);
        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received");
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        reload.abort();
        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

fn product_header(product: &str) -> HeaderValue {
    HeaderValue::from_str(product).unwrap_or_else(|_| {
        tracing::warn!(product = %product, "Invalid product string, using default");
        HeaderValue::from_static(DEFAULT_PRODUCT)
    })
}

fn spawn_reload(
    catalog: Arc<ArcSwap<ProxyRouter>>,
    secrets: Arc<InMemorySecretStore>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            apply_config(&catalog, &secrets, &config);
        }
    })
}

/// Swap in the service catalog and secrets of a reloaded config.
pub fn apply_config(catalog: &ArcSwap<ProxyRouter>, secrets: &InMemorySecretStore, config: &ProxyConfig) {
    catalog.store(Arc::new(ProxyRouter::from_services(&config.services)));
    secrets.replace_all(&config.secrets);
    tracing::info!(
        services = config.services.len(),
        secrets = secrets.len(),
        "Configuration reloaded"
    );
}

/// Read the whole body, bounded by `limit`.
pub async fn capture_body(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let too_large = std::iter::successors(Some(&e as &(dyn StdError + 'static)), |e| (*e).source())
            .any(|e| e.is::<LengthLimitError>());
        if too_large {
            ProxyError::BodyTooLarge { limit }
        } else {
            ProxyError::BodyRead(e.to_string())
        }
    })
}

/// Gateway handler.
/// Matches the service, builds the request context and serves the exchange.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let method_str = request.method().to_string();

    let client_upgrade = request.extensions_mut().remove::<OnUpgrade>();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let auth = request
        .extensions()
        .get::<AuthResponse>()
        .cloned()
        .unwrap_or_else(AuthResponse::anonymous);

    let (parts, body) = request.into_parts();
    let inbound = InboundRequest::from_parts(&parts, remote_addr);

    // 1. Match service
    let Some(service) = state.router.load().match_request(inbound.host(), parts.uri.path()) else {
        let err = ProxyError::NoRoute {
            host: inbound.host().to_string(),
            path: parts.uri.path().to_string(),
        };
        tracing::warn!(request_id = %request_id, error = %err, "No service matched");
        metrics::record_request(&method_str, err.status().as_u16(), "none", start_time);
        return err.into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        service = %service.name,
        method = %parts.method,
        path = %parts.uri.path(),
        "Proxying request"
    );

    // 2. Capture body
    let body = match capture_body(body, state.max_body_size).await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(request_id = %request_id, service = %service.name, error = %err, "Rejected request body");
            metrics::record_request(&method_str, err.status().as_u16(), &service.name, start_time);
            return err.into_response();
        }
    };

    // 3. Select and serve
    let ctx = RequestContext::new(request_id.clone(), inbound, service.clone(), auth, body);
    let response = match state.selector.select(ctx).await {
        Ok(handler) => handler.serve(client_upgrade).await,
        Err(err) => {
            tracing::warn!(request_id = %request_id, service = %service.name, error = %err, "Pipeline selection failed");
            err.into_response()
        }
    };

    metrics::record_request(&method_str, response.status().as_u16(), &service.name, start_time);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, SecretConfig, Service};
    use crate::signing::SecretStore;
    use http::StatusCode;

    fn service(name: &str, prefix: &str) -> Service {
        Service {
            name: name.into(),
            path_prefix: Some(prefix.into()),
            endpoints: vec![EndpointConfig {
                url: "http://127.0.0.1:1".into(),
                host_port: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn captures_body_within_limit() {
        let body = capture_body(Body::from("hello"), 16).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let err = capture_body(Body::from(vec![0u8; 64]), 16).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 16 }));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn reload_swaps_catalog_and_secrets() {
        let catalog = ArcSwap::from_pointee(ProxyRouter::from_services(&[service("old", "/")]));
        let secrets = InMemorySecretStore::new();
        secrets.insert("stale", "x");

        let mut config = ProxyConfig::default();
        config.services.push(service("new", "/v2"));
        config.secrets.push(SecretConfig {
            name: "fresh".into(),
            value: Some("y".into()),
            value_env: None,
        });
        apply_config(&catalog, &secrets, &config);

        assert!(catalog.load().match_request("h", "/v1").is_none());
        assert_eq!(catalog.load().match_request("h", "/v2/x").unwrap().name, "new");
        assert!(secrets.get_by_name("stale").await.is_err());
        assert_eq!(secrets.get_by_name("fresh").await.unwrap().value_str(), "y");
    }

    #[test]
    fn invalid_product_falls_back() {
        assert_eq!(product_header("gw/1.0"), "gw/1.0");
        assert_eq!(product_header("bad\nvalue"), DEFAULT_PRODUCT);
    }
}
