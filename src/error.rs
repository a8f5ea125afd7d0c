//! Request-level errors.
//!
//! Every failure that ends an exchange before an upstream response exists is a
//! [`ProxyError`]. Each maps to one status code; the body is the status text.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

use crate::http::response::error_response;
use crate::proxy::director::DirectorError;
use crate::upstream::{ResolveError, TransportError};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no service matches host '{host}' and path '{path}'")]
    NoRoute { host: String, path: String },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Director(#[from] DirectorError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute { .. } => StatusCode::NOT_FOUND,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::Resolve(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Director(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        error_response(self.status())
    }
}
