//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the access gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Forwarding behaviour shared by every service.
    pub proxy: ForwardingConfig,

    /// Timeout configuration for the bundled transport.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Service catalog.
    pub services: Vec<Service>,

    /// Secrets backing the in-memory secret store.
    pub secrets: Vec<SecretConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Forwarding behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Identification string sent as the default `User-Agent` and as `Server`.
    pub product: String,

    /// Maximum delay before buffered response bytes are pushed to the caller.
    pub flush_interval_ms: u64,

    /// Size in bytes of each pooled copy buffer.
    pub buffer_size: usize,

    /// Maximum number of idle buffers kept by the pool.
    pub buffer_pool_capacity: usize,

    /// Maximum inbound body size captured for forwarding and signing.
    pub max_body_size: usize,
}

impl ForwardingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            product: "octelium".to_string(),
            flush_interval_ms: 100,
            buffer_size: 32 * 1024,
            buffer_pool_capacity: 256,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Timeout configuration for upstream dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed until upstream response headers arrive, in seconds.
    pub request_secs: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 90,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A secret made available to the in-memory secret store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecretConfig {
    /// Name the secret is referenced by.
    pub name: String,

    /// Literal value.
    #[serde(default)]
    pub value: Option<String>,

    /// Environment variable holding the value.
    #[serde(default)]
    pub value_env: Option<String>,
}

/// How a service speaks to its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    #[default]
    Http,
    Grpc,
    Web,
}

/// A routable service and the upstreams behind it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Service {
    /// Service identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match, case-insensitive).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Internally managed service, trusted with forwarding headers.
    #[serde(default)]
    pub managed: bool,

    #[serde(default)]
    pub mode: ServiceMode,

    /// Upstream endpoints.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Optional per-route configuration.
    #[serde(default)]
    pub config: Option<ServiceConfig>,
}

impl Service {
    pub fn is_managed(&self) -> bool {
        self.managed
    }
}

/// A single upstream endpoint of a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Logical upstream URL (scheme is a protocol label, e.g. `grpc://`).
    pub url: String,

    /// Literal dial target for upstreams published by a connected user.
    #[serde(default)]
    pub host_port: Option<String>,
}

/// Optional per-route configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Upstream requires a client certificate.
    pub client_certificate: Option<ClientCertificate>,

    pub tls: Option<ServiceTlsConfig>,

    pub http: Option<HttpConfig>,
}

impl ServiceConfig {
    /// True when the upstream is reached over mutual TLS.
    pub fn requires_client_certificate(&self) -> bool {
        self.client_certificate.is_some()
            || self
                .tls
                .as_ref()
                .is_some_and(|tls| tls.client_certificate.is_some())
    }

    pub fn direct_response(&self) -> Option<&DirectResponse> {
        self.http.as_ref()?.response.as_ref()?.direct.as_ref()
    }

    pub fn sigv4(&self) -> Option<&SigV4Config> {
        self.http.as_ref()?.auth.as_ref()?.sigv4.as_ref()
    }
}

/// Reference to a client certificate held in the secret store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientCertificate {
    pub from_secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceTlsConfig {
    pub client_certificate: Option<ClientCertificate>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HttpConfig {
    pub response: Option<ResponseConfig>,
    pub auth: Option<HttpAuthConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResponseConfig {
    pub direct: Option<DirectResponse>,
}

/// A statically configured response served without contacting any upstream.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(from = "DirectResponseRepr", into = "DirectResponseRepr")]
pub struct DirectResponse {
    /// Body variant. `None` when unset or ambiguous; served as 500.
    pub body: Option<DirectBody>,

    pub content_type: String,

    /// Applied only within 200..=599.
    pub status_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectBody {
    Inline(String),
    InlineBytes(Vec<u8>),
}

/// On-disk shape: `inline` and `inline_bytes` are mutually exclusive keys.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
struct DirectResponseRepr {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_bytes: Option<Vec<u8>>,
    content_type: String,
    status_code: u32,
}

impl From<DirectResponseRepr> for DirectResponse {
    fn from(repr: DirectResponseRepr) -> Self {
        let body = match (repr.inline, repr.inline_bytes) {
            (Some(text), None) => Some(DirectBody::Inline(text)),
            (None, Some(bytes)) => Some(DirectBody::InlineBytes(bytes)),
            _ => None,
        };
        Self {
            body,
            content_type: repr.content_type,
            status_code: repr.status_code,
        }
    }
}

impl From<DirectResponse> for DirectResponseRepr {
    fn from(direct: DirectResponse) -> Self {
        let (inline, inline_bytes) = match direct.body {
            Some(DirectBody::Inline(text)) => (Some(text), None),
            Some(DirectBody::InlineBytes(bytes)) => (None, Some(bytes)),
            None => (None, None),
        };
        Self {
            inline,
            inline_bytes,
            content_type: direct.content_type,
            status_code: direct.status_code,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HttpAuthConfig {
    pub sigv4: Option<SigV4Config>,
}

/// Request-signing parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SigV4Config {
    pub access_key_id: String,

    /// Name of the secret holding the secret access key.
    pub secret_access_key: String,

    /// Target signing-service name (e.g. "s3", "execute-api").
    pub service: String,

    pub region: String,

    /// Sign the path as sent instead of re-escaping it.
    #[serde(default)]
    pub disable_uri_path_escaping: bool,
}
