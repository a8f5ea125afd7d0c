//! Outbound transports.
//!
//! # Responsibilities
//! - Perform one request/response round trip for an outbound request
//! - Pick a pooled client suited to the upstream's declared protocol
//! - Dial user upstreams at their `host_port` while addressing the declared host
//! - Enforce connect, response-header and idle timeouts
//!
//! Upstreams labelled `grpc` or `h2c` get an HTTP/2 prior-knowledge client;
//! everything else shares an ALPN client that negotiates h2 or http/1.1 over
//! TLS and speaks http/1.1 in cleartext. An HTTP/2 request handed to the ALPN
//! client (gRPC over TLS) goes out over whichever protocol ALPN settles on, so
//! an upstream without h2 answers over http/1.1 instead of failing locally.
//!
//! The request URI always carries the declared host, so `Host`, `:authority`,
//! TLS SNI and the signed `host` agree. User upstreams get a client of their
//! own whose connector dials `host_port` regardless of the URI.
//!
//! hyper writes http/1.1 header names from a `HeaderMap`, in canonical
//! Title-Case. Upgrade requests skip hyper and are written by
//! [`handshake`](crate::upstream::handshake) with the exact spellings kept in
//! the outbound [`HeaderBag`](crate::http::HeaderBag).

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::{Response, Uri, Version};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tower::Service;

use crate::config::TimeoutConfig;
use crate::http::hop_by_hop::upgrade_type;
use crate::http::request::{BoxError, OutboundRequest};
use crate::upstream::{handshake, Upstream};

/// Response body as read from an upstream.
pub type UpstreamBody = BoxBody<Bytes, BoxError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no transport for upstream scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("failed to build upstream client: {0}")]
    Build(String),
}

/// Performs one round trip against an upstream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, req: OutboundRequest) -> Result<Response<UpstreamBody>, BoxError>;
}

/// Hands out the transport for an upstream.
#[async_trait]
pub trait TransportResolver: Send + Sync {
    async fn transport_for(&self, upstream: &Upstream) -> Result<Arc<dyn Transport>, TransportError>;
}

/// TCP connector that dials either the URI authority or a fixed `host:port`.
#[derive(Clone)]
pub struct DialConnector {
    http: HttpConnector,
    host_port: Option<Arc<str>>,
}

impl DialConnector {
    fn new(timeouts: &TimeoutConfig, host_port: Option<&str>) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        Self {
            http,
            host_port: host_port.map(Arc::from),
        }
    }
}

/// `dst` with its authority replaced by `host_port`; the scheme keeps the default port.
fn dial_uri(dst: &Uri, host_port: &str) -> Result<Uri, http::Error> {
    Uri::builder()
        .scheme(dst.scheme_str().unwrap_or("http"))
        .authority(host_port)
        .path_and_query("/")
        .build()
}

impl Service<Uri> for DialConnector {
    type Response = TokioIo<TcpStream>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let target = match &self.host_port {
            Some(host_port) => dial_uri(&dst, host_port),
            None => Ok(dst),
        };
        let mut http = self.http.clone();
        Box::pin(async move { Ok(http.call(target?).await?) })
    }
}

type UpstreamConnector = HttpsConnector<DialConnector>;
type HyperClient = Client<UpstreamConnector, Full<Bytes>>;

/// A pooled hyper client with a response-header deadline.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    connector: UpstreamConnector,
    request_timeout: Duration,
    http2_only: bool,
}

impl HyperTransport {
    /// ALPN client: h2 or http/1.1 over TLS, http/1.1 in cleartext.
    pub fn negotiated(timeouts: &TimeoutConfig) -> Self {
        Self::build(timeouts, false, None)
    }

    /// HTTP/2 prior-knowledge client.
    pub fn http2_only(timeouts: &TimeoutConfig) -> Self {
        Self::build(timeouts, true, None)
    }

    /// Client whose connections all go to `host_port`.
    pub fn pinned(timeouts: &TimeoutConfig, http2_only: bool, host_port: &str) -> Self {
        Self::build(timeouts, http2_only, Some(host_port))
    }

    fn build(timeouts: &TimeoutConfig, http2_only: bool, host_port: Option<&str>) -> Self {
        let dial = DialConnector::new(timeouts, host_port);
        let builder = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http();
        let connector = if http2_only {
            builder.enable_http2().wrap_connector(dial)
        } else {
            builder.enable_http1().enable_http2().wrap_connector(dial)
        };

        let mut client = Client::builder(TokioExecutor::new());
        client
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .http1_title_case_headers(true);
        if http2_only {
            client.http2_only(true);
        }
        Self {
            client: client.build(connector.clone()),
            connector,
            request_timeout: Duration::from_secs(timeouts.request_secs),
            http2_only,
        }
    }
}

/// Version handed to hyper: the ALPN client lets the negotiated protocol decide.
fn dispatch_version(requested: Version, http2_only: bool) -> Version {
    if requested == Version::HTTP_2 && !http2_only {
        Version::HTTP_11
    } else {
        requested
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn round_trip(&self, req: OutboundRequest) -> Result<Response<UpstreamBody>, BoxError> {
        if req.version != Version::HTTP_2 && upgrade_type(&req.headers).is_some() {
            let exchange = handshake::round_trip(self.connector.clone(), req);
            return tokio::time::timeout(self.request_timeout, exchange).await?;
        }

        let mut request = req.into_http()?;
        *request.version_mut() = dispatch_version(request.version(), self.http2_only);
        let response = tokio::time::timeout(self.request_timeout, self.client.request(request)).await??;
        Ok(response.map(|body| body.map_err(|e| Box::new(e) as BoxError).boxed()))
    }
}

/// Chooses between the bundled hyper clients by upstream scheme and dial target.
#[derive(Clone)]
pub struct HyperTransportResolver {
    timeouts: TimeoutConfig,
    negotiated: Arc<HyperTransport>,
    http2_only: Arc<HyperTransport>,
    pinned: Arc<DashMap<(bool, String), Arc<HyperTransport>>>,
}

impl HyperTransportResolver {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        // Both ring and aws-lc-rs may be linked; pin one before any TLS config is built.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self {
            timeouts: timeouts.clone(),
            negotiated: Arc::new(HyperTransport::negotiated(timeouts)),
            http2_only: Arc::new(HyperTransport::http2_only(timeouts)),
            pinned: Arc::new(DashMap::new()),
        }
    }

    /// Clients built for user upstreams so far.
    pub fn pinned_clients(&self) -> usize {
        self.pinned.len()
    }
}

/// True for upstream labels that are dialed with HTTP/2 prior knowledge.
pub fn is_prior_knowledge_scheme(scheme: &str) -> bool {
    matches!(scheme, "grpc" | "h2c")
}

#[async_trait]
impl TransportResolver for HyperTransportResolver {
    async fn transport_for(&self, upstream: &Upstream) -> Result<Arc<dyn Transport>, TransportError> {
        let scheme = upstream.scheme();
        if upstream.url.host_str().is_none() {
            return Err(TransportError::UnsupportedScheme(scheme.to_string()));
        }
        let http2_only = is_prior_knowledge_scheme(scheme);

        if let (true, Some(host_port)) = (upstream.is_user, &upstream.host_port) {
            let transport = self
                .pinned
                .entry((http2_only, host_port.clone()))
                .or_insert_with(|| {
                    tracing::debug!(host_port = %host_port, http2_only, "Building client for user upstream");
                    Arc::new(HyperTransport::pinned(&self.timeouts, http2_only, host_port))
                })
                .clone();
            return Ok(transport);
        }

        let transport: Arc<dyn Transport> = if http2_only {
            self.http2_only.clone()
        } else {
            self.negotiated.clone()
        };
        Ok(transport)
    }
}
