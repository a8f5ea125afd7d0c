//! WebSocket handshake header repair.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Restore the mixed-case spelling of the `Sec-WebSocket-*` handshake headers
//!
//! Canonicalization turns `Sec-WebSocket-Key` into `Sec-Websocket-Key`. Plenty of
//! WebSocket servers only accept the mixed-case spelling, so the handshake keys
//! are respelled before the request leaves the gateway.

use crate::http::headers::{values_contain_token, HeaderBag};

/// Canonical spelling → protocol spelling.
const HANDSHAKE_HEADERS: [(&str, &str); 5] = [
    ("Sec-Websocket-Key", "Sec-WebSocket-Key"),
    ("Sec-Websocket-Extensions", "Sec-WebSocket-Extensions"),
    ("Sec-Websocket-Accept", "Sec-WebSocket-Accept"),
    ("Sec-Websocket-Protocol", "Sec-WebSocket-Protocol"),
    ("Sec-Websocket-Version", "Sec-WebSocket-Version"),
];

/// `Connection` lists the `Upgrade` token and `Upgrade` is `websocket`.
pub fn is_websocket_upgrade(headers: &HeaderBag) -> bool {
    if !values_contain_token(headers.get_all("Connection"), "Upgrade") {
        return false;
    }
    headers.get_str("Upgrade").eq_ignore_ascii_case("websocket")
}

/// Respell the handshake headers of a WebSocket upgrade. No-op otherwise.
pub fn fix_websocket_headers(mut headers: HeaderBag) -> HeaderBag {
    if !is_websocket_upgrade(&headers) {
        return headers;
    }
    for (canonical, mixed) in HANDSHAKE_HEADERS {
        headers.rename_exact(canonical, mixed);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn upgrade_headers() -> HeaderBag {
        let mut bag = HeaderBag::new();
        bag.append("connection", HeaderValue::from_static("keep-alive, Upgrade"));
        bag.append("upgrade", HeaderValue::from_static("WebSocket"));
        bag.append("sec-websocket-key", HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="));
        bag.append("sec-websocket-version", HeaderValue::from_static("13"));
        bag.append("sec-websocket-protocol", HeaderValue::from_static("chat"));
        bag.append("sec-websocket-protocol", HeaderValue::from_static("superchat"));
        bag.append("sec-websocket-extensions", HeaderValue::from_static("permessage-deflate"));
        bag
    }

    #[test]
    fn detects_upgrade() {
        assert!(is_websocket_upgrade(&upgrade_headers()));

        let mut bag = upgrade_headers();
        bag.set("Upgrade", HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&bag));

        let mut bag = upgrade_headers();
        bag.set("Connection", HeaderValue::from_static("keep-alive"));
        assert!(!is_websocket_upgrade(&bag));
    }

    #[test]
    fn respells_handshake_headers() {
        let before = upgrade_headers();
        let after = fix_websocket_headers(before.clone());

        for (canonical, mixed) in HANDSHAKE_HEADERS {
            assert!(!after.contains_exact(canonical), "{canonical} still present");
            let old: Vec<_> = before.get_all(canonical).collect();
            let new: Vec<_> = after.get_all(mixed).collect();
            assert_eq!(old, new);
            if !old.is_empty() {
                assert!(after.contains_exact(mixed));
            }
        }
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn non_upgrade_is_untouched() {
        let mut bag = upgrade_headers();
        bag.remove("Upgrade");
        let after = fix_websocket_headers(bag.clone());
        assert_eq!(bag, after);
    }
}
