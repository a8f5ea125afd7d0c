//! Request handling and transformation.
//!
//! # Responsibilities
//! - Capture the inbound request head into a case-preserving form
//! - Hold the outbound request the Director rewrites
//! - Convert the finished outbound request into an `http::Request`
//!
//! # Design Decisions
//! - Original request preserved for logging; modified copy forwarded
//! - `Host` lives outside the header bag, like the request target it names
//! - A leftover request-URI is rejected at conversion time

use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{Method, Request, Uri, Version};
use http_body_util::Full;
use std::net::SocketAddr;

use crate::http::headers::HeaderBag;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Inbound request head as received by the gateway.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Request target as received (origin-form or absolute-form).
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderBag,
    pub remote_addr: Option<SocketAddr>,
}

impl InboundRequest {
    pub fn from_parts(parts: &http::request::Parts, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: HeaderBag::from_header_map(&parts.headers),
            remote_addr,
        }
    }

    /// Host the caller addressed: `Host` header, else the URI authority.
    pub fn host(&self) -> &str {
        match self.headers.get("Host").and_then(|v| v.to_str().ok()) {
            Some(host) => host,
            None => self.uri.authority().map(|a| a.as_str()).unwrap_or(""),
        }
    }
}

/// Outbound request under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: Method,
    /// Wire scheme used to dial (`http` or `https`).
    pub scheme: String,
    /// Declared host: the `Host` header, `:authority` and the URI authority.
    pub host: String,
    /// Dial target (`host:port`). Transports connect here; it never appears on the wire.
    pub authority: String,
    pub path: String,
    pub raw_query: Option<String>,
    /// Request target copied from the inbound parse; must be cleared before dispatch.
    pub request_uri: Option<String>,
    pub version: Version,
    pub headers: HeaderBag,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Start from a copy of the inbound request.
    pub fn from_inbound(inbound: &InboundRequest, body: Bytes) -> Self {
        let mut headers = inbound.headers.clone();
        headers.remove("Host");
        let path = match inbound.uri.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        Self {
            method: inbound.method.clone(),
            scheme: inbound.uri.scheme_str().unwrap_or("http").to_string(),
            host: inbound.host().to_string(),
            authority: inbound.host().to_string(),
            path,
            raw_query: inbound.uri.query().map(str::to_string),
            request_uri: Some(inbound.uri.to_string()),
            version: inbound.version,
            headers,
            body,
        }
    }

    pub fn path_and_query(&self) -> String {
        match &self.raw_query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Absolute URI addressed to the declared host, falling back to the dial target.
    pub fn uri(&self) -> Result<Uri, http::Error> {
        let authority = if self.host.is_empty() { &self.authority } else { &self.host };
        Ok(Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(authority.as_str())
            .path_and_query(self.path_and_query())
            .build()?)
    }

    /// Build the `http::Request` handed to a hyper client.
    pub fn into_http(self) -> Result<Request<Full<Bytes>>, BoxError> {
        if self.request_uri.is_some() {
            return Err("request-uri can't be set in outbound requests".into());
        }
        let uri = self.uri()?;
        let mut headers = self.headers.to_header_map()?;
        if self.version != Version::HTTP_2 && !self.host.is_empty() {
            headers.insert(HOST, HeaderValue::from_str(&self.host)?);
        }

        let mut request = Request::builder()
            .method(self.method)
            .uri(uri)
            .version(self.version)
            .body(Full::new(self.body))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}
