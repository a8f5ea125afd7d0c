//! Response handling and transformation.
//!
//! # Responsibilities
//! - Stamp the gateway's `Server` identification on responses
//! - Decide how eagerly a streamed response is flushed
//! - Build plain-text error responses
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Error bodies are the status reason text, nothing else

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, SERVER};
use http::StatusCode;

use crate::proxy::classify::status_text;

/// Overwrite `Server` with the gateway's product string.
pub fn set_server_header(headers: &mut HeaderMap, product: &HeaderValue) {
    headers.insert(SERVER, product.clone());
}

/// Responses whose size is unknown, and event streams, are flushed per frame.
pub fn flushes_immediately(headers: &HeaderMap) -> bool {
    if !headers.contains_key(CONTENT_LENGTH) {
        return true;
    }
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"))
}

/// Plain-text response whose body is the status reason.
pub fn error_response(status: StatusCode) -> Response<Body> {
    (status, status_text(status)).into_response()
}
