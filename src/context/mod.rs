//! Per-request context.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → routing (service lookup)
//!     → body capture (bounded)
//!     → RequestContext { request, service, config, auth, body }
//!     → proxy pipeline (read-only)
//! ```
//!
//! # Design Decisions
//! - Immutable for the duration of one exchange
//! - Authorization happens before this layer; its result rides in extensions

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Service, ServiceConfig};
use crate::http::request::InboundRequest;

/// Outcome of the authorization layer for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResponse {
    /// Authenticated subject; `None` for anonymous access.
    pub subject: Option<String>,
    pub session_id: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl AuthResponse {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn subject_or_anonymous(&self) -> &str {
        self.subject.as_deref().unwrap_or("anonymous")
    }
}

/// Everything the pipeline knows about one exchange.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub request: InboundRequest,
    pub service: Arc<Service>,
    pub config: Option<Arc<ServiceConfig>>,
    pub auth: AuthResponse,
    /// Raw captured body; forwarded and digested for signing.
    pub body: Bytes,
}

impl RequestContext {
    /// Build a context whose config is the service's own.
    pub fn new(
        request_id: impl Into<String>,
        request: InboundRequest,
        service: Arc<Service>,
        auth: AuthResponse,
        body: Bytes,
    ) -> Self {
        let config = service.config.clone().map(Arc::new);
        Self {
            request_id: request_id.into(),
            request,
            service,
            config,
            auth,
            body,
        }
    }

    pub fn config(&self) -> Option<&ServiceConfig> {
        self.config.as_deref()
    }
}
