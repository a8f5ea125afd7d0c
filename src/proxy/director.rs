//! Outbound request director.
//!
//! Rewrites a copy of the inbound request into the request sent upstream.
//! Steps run in a fixed order; signing runs last so it covers the final
//! header set:
//!
//! 1. wire scheme from the upstream's protocol label
//! 2. `Host` from the upstream URL, dial target from `host_port` for user upstreams
//! 3. `;` in the query becomes `&`
//! 4. request-URI cleared
//! 5. `User-Agent` defaulted when absent
//! 6. WebSocket handshake headers respelled
//! 7. HTTP/2 or HTTP/1.1 chosen per upstream
//! 8. forwarding headers stripped for unmanaged services
//! 9. a non-empty `Origin` rewritten to the upstream URL
//! 10. SigV4 signing when configured
//!
//! Hop-by-hop headers are removed between steps 9 and 10 so the signature
//! covers exactly the headers that leave the gateway.
//!
//! Steps 1-9 cannot fail. A missing signing secret is logged and the request
//! goes out unsigned; a signature that cannot be computed aborts dispatch.

use http::{HeaderValue, Version};
use thiserror::Error;

use crate::config::{ServiceConfig, ServiceMode};
use crate::context::RequestContext;
use crate::http::hop_by_hop::{strip_request_headers, upgrade_type};
use crate::http::request::OutboundRequest;
use crate::http::websocket::fix_websocket_headers;
use crate::observability::metrics;
use crate::signing::{RequestSigner, SigV4Error, SigningError};
use crate::upstream::transport::is_prior_knowledge_scheme;
use crate::upstream::Upstream;

/// Headers that reveal gateway topology to the upstream.
pub const TOPOLOGY_HEADERS: [&str; 4] = [
    "Forwarded",
    "X-Forwarded-For",
    "X-Forwarded-Host",
    "X-Forwarded-Proto",
];

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("request signing failed: {0}")]
    Signing(#[source] SigV4Error),
}

/// Wire scheme used to dial an upstream labelled `scheme`.
pub fn resolve_wire_scheme(scheme: &str, requires_client_certificate: bool) -> &'static str {
    match scheme {
        "https" | "wss" => "https",
        "http" | "ws" | "grpc" | "h2c" => "http",
        _ if requires_client_certificate => "https",
        _ => "http",
    }
}

/// Replace every `;` separator with `&`.
pub fn sanitize_query(raw_query: &str) -> String {
    raw_query.replace(';', "&")
}

/// Whether the exchange is forced to HTTP/2.
///
/// True for `grpc`/`h2c` upstreams (HTTP/2 prior knowledge), and for gRPC
/// services reached over TLS, where ALPN negotiates h2.
pub fn is_http2_upstream(upstream: &Upstream, mode: ServiceMode) -> bool {
    let scheme = upstream.scheme();
    if is_prior_knowledge_scheme(scheme) {
        return true;
    }
    mode == ServiceMode::Grpc && matches!(scheme, "https" | "wss")
}

/// Rewrites inbound requests for one upstream hop.
#[derive(Clone)]
pub struct Director {
    product: HeaderValue,
    signer: RequestSigner,
}

impl Director {
    /// `product` must be a valid header value; it is validated at startup.
    pub fn new(product: HeaderValue, signer: RequestSigner) -> Self {
        Self { product, signer }
    }

    /// Steps 1-9 of the rewrite; never fails.
    pub fn rewrite(&self, ctx: &RequestContext, upstream: &Upstream) -> OutboundRequest {
        let mut out = OutboundRequest::from_inbound(&ctx.request, ctx.body.clone());
        let requires_cert = ctx
            .config()
            .map(ServiceConfig::requires_client_certificate)
            .unwrap_or(false);

        out.scheme = resolve_wire_scheme(upstream.scheme(), requires_cert).to_string();

        out.host = upstream.host();
        out.authority = upstream.dial_target();

        out.raw_query = out.raw_query.as_deref().map(sanitize_query);

        out.request_uri = None;

        if !out.headers.contains_key("User-Agent") {
            out.headers.set("User-Agent", self.product.clone());
        }

        out.headers = fix_websocket_headers(out.headers);

        out.version = if is_http2_upstream(upstream, ctx.service.mode) {
            Version::HTTP_2
        } else {
            Version::HTTP_11
        };

        if !ctx.service.is_managed() {
            for name in TOPOLOGY_HEADERS {
                out.headers.remove(name);
            }
        }

        if out.headers.get("Origin").is_some_and(|v| !v.is_empty()) {
            if let Ok(origin) = HeaderValue::from_str(&upstream.url_string()) {
                out.headers.set("Origin", origin);
            }
        }

        out
    }

    /// The full rewrite, hop-by-hop removal, then signing. Errors only when a
    /// signature cannot be computed.
    pub async fn direct(&self, ctx: &RequestContext, upstream: &Upstream) -> Result<OutboundRequest, DirectorError> {
        let mut out = self.rewrite(ctx, upstream);
        let upgrade = upgrade_type(&out.headers);
        strip_request_headers(&mut out.headers, upgrade.as_deref(), out.version == Version::HTTP_2);

        let Some(sigv4) = ctx.config().and_then(ServiceConfig::sigv4) else {
            return Ok(out);
        };
        match self.signer.sign(&mut out, sigv4).await {
            Ok(()) => Ok(out),
            Err(SigningError::Fetch(e)) => {
                metrics::record_signing_failure("fetch");
                tracing::warn!(
                    request_id = %ctx.request_id,
                    service = %ctx.service.name,
                    error = %e,
                    "Signing secret unavailable, forwarding unsigned"
                );
                Ok(out)
            }
            Err(SigningError::Compute(e)) => {
                metrics::record_signing_failure("compute");
                tracing::warn!(
                    request_id = %ctx.request_id,
                    service = %ctx.service.name,
                    error = %e,
                    "Could not sign request, not forwarding"
                );
                Err(DirectorError::Signing(e))
            }
        }
    }
}
