//! Upstream resolution and transport subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext + AuthResponse
//!     → resolver.rs (pick an endpoint of the service → Upstream)
//!     → transport.rs (pick a pooled client for the Upstream's scheme and dial target)
//!     → handshake.rs (HTTP/1.1 upgrades, written header by header as spelled)
//!     → proxy engine dispatches one round trip
//! ```
//!
//! # Design Decisions
//! - Both collaborators are traits so deployments can plug in their own
//! - Timeouts, TLS and connection pooling belong to the transport, not the core
//! - An endpoint with an explicit `host_port` is a user-supplied peer

pub mod handshake;
pub mod resolver;
pub mod transport;

pub use handshake::{UpgradeIo, UpgradedStream};
pub use resolver::{ResolveError, StaticUpstreamResolver, UpstreamResolver};
pub use transport::{
    HyperTransport, HyperTransportResolver, Transport, TransportError, TransportResolver,
    UpstreamBody,
};

use url::Url;

/// A resolved backend target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub url: Url,
    /// Literal `host:port` to dial; authoritative only when `is_user` is set.
    pub host_port: Option<String>,
    /// Supplied directly by a connecting peer rather than a managed registration.
    pub is_user: bool,
}

impl Upstream {
    pub fn managed(url: Url) -> Self {
        Self {
            url,
            host_port: None,
            is_user: false,
        }
    }

    pub fn user(url: Url, host_port: impl Into<String>) -> Self {
        Self {
            url,
            host_port: Some(host_port.into()),
            is_user: true,
        }
    }

    /// Declared scheme, lowercased by URL parsing.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Declared `host[:port]` of the upstream URL.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or("");
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Address the request is dialed to.
    pub fn dial_target(&self) -> String {
        match (&self.host_port, self.is_user) {
            (Some(host_port), true) => host_port.clone(),
            _ => self.host(),
        }
    }

    /// URL as written, without the root path URL parsing adds.
    pub fn url_string(&self) -> String {
        let s = self.url.as_str();
        if self.url.path() == "/" && self.url.query().is_none() && self.url.fragment().is_none() {
            s.strip_suffix('/').unwrap_or(s).to_string()
        } else {
            s.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn managed_upstream_dials_url_host() {
        let up = Upstream::managed(url("https://api.internal:8443"));
        assert_eq!(up.host(), "api.internal:8443");
        assert_eq!(up.dial_target(), "api.internal:8443");
    }

    #[test]
    fn user_upstream_dials_host_port() {
        let up = Upstream::user(url("http://laptop.local"), "10.0.0.7:3000");
        assert_eq!(up.host(), "laptop.local");
        assert_eq!(up.dial_target(), "10.0.0.7:3000");
    }

    #[test]
    fn host_port_ignored_for_managed_upstreams() {
        let up = Upstream {
            url: url("http://svc:9000"),
            host_port: Some("10.1.1.1:1".into()),
            is_user: false,
        };
        assert_eq!(up.dial_target(), "svc:9000");
    }

    #[test]
    fn url_string_drops_root_slash() {
        assert_eq!(Upstream::managed(url("https://api.example.com")).url_string(), "https://api.example.com");
        assert_eq!(Upstream::managed(url("grpc://svc:50051")).url_string(), "grpc://svc:50051");
        assert_eq!(
            Upstream::managed(url("https://api.example.com/base")).url_string(),
            "https://api.example.com/base"
        );
    }
}
