//! Hop-by-hop header handling.
//!
//! Connection-scoped headers describe one hop and are never forwarded. An
//! upgrade request keeps its intent: after stripping, `Connection: Upgrade`
//! and the requested `Upgrade` protocol are put back.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::http::headers::{values_contain_token, HeaderBag};

pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "Connection",
    "Proxy-Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Te",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
];

/// Protocol requested through `Connection: Upgrade`, if any.
pub fn upgrade_type(headers: &HeaderBag) -> Option<String> {
    if !values_contain_token(headers.get_all("Connection"), "Upgrade") {
        return None;
    }
    match headers.get_str("Upgrade") {
        "" => None,
        proto => Some(proto.to_string()),
    }
}

/// Same as [`upgrade_type`] for a response header map.
pub fn response_upgrade_type(headers: &HeaderMap) -> Option<String> {
    if !values_contain_token(headers.get_all(http::header::CONNECTION).iter(), "Upgrade") {
        return None;
    }
    headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn connection_tokens<'a>(values: impl Iterator<Item = &'a HeaderValue>) -> Vec<String> {
    values
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Strip hop-by-hop headers from an outbound request.
///
/// `Te: trailers` survives. `upgrade` is re-announced unless the hop is HTTP/2,
/// which has no upgrade mechanism.
pub fn strip_request_headers(headers: &mut HeaderBag, upgrade: Option<&str>, http2: bool) {
    let wants_trailers = values_contain_token(headers.get_all("Te"), "trailers");

    for token in connection_tokens(headers.get_all("Connection")) {
        headers.remove(&token);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }

    if wants_trailers {
        headers.set("Te", HeaderValue::from_static("trailers"));
    }
    if let (Some(proto), false) = (upgrade, http2) {
        if let Ok(proto) = HeaderValue::from_str(proto) {
            headers.set("Connection", HeaderValue::from_static("Upgrade"));
            headers.set("Upgrade", proto);
        }
    }
}

/// Strip hop-by-hop headers from an upstream response. `Trailer` is kept so
/// announced trailers still reach the caller.
pub fn strip_response_headers(headers: &mut HeaderMap) {
    for token in connection_tokens(headers.get_all(http::header::CONNECTION).iter()) {
        if let Ok(name) = HeaderName::from_bytes(token.to_ascii_lowercase().as_bytes()) {
            if name != http::header::TRAILER {
                headers.remove(name);
            }
        }
    }
    for name in HOP_BY_HOP_HEADERS {
        if name == "Trailer" {
            continue;
        }
        headers.remove(name.to_ascii_lowercase().as_str());
    }
}
