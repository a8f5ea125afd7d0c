//! Case-preserving header storage.
//!
//! `http::HeaderMap` lowercases every name. The gateway needs to control the
//! exact spelling written to some upstreams (the WebSocket handshake keys), so
//! outbound headers live in a [`HeaderBag`]: an ordered multi-map looked up
//! case-insensitively that remembers how each entry is spelled.
//!
//! Names enter the bag in canonical form (`x-forwarded-for` → `X-Forwarded-For`).
//! Only [`HeaderBag::rename_exact`] writes a non-canonical spelling.

use http::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderName};

/// Canonical spelling of a header name: first letter and every letter after a
/// hyphen upper-cased, the rest lower-cased. Names containing characters that
/// are not valid token characters are returned unchanged.
pub fn canonical_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Ordered, case-insensitive, spelling-preserving header multi-map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBag {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a `HeaderMap`, canonicalizing every name.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let entries = map
            .iter()
            .map(|(name, value)| (canonical_key(name.as_str()), value.clone()))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any entry matches `name`, ignoring case.
    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// True if an entry is spelled exactly `name`.
    pub fn contains_exact(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// First value for `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// First value for `name` as a string; non-visible-ASCII values read as empty.
    pub fn get_str(&self, name: &str) -> &str {
        self.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Replace every value of `name` with `value`, stored under the canonical spelling.
    pub fn set(&mut self, name: &str, value: HeaderValue) {
        self.remove(name);
        self.entries.push((canonical_key(name), value));
    }

    pub fn append(&mut self, name: &str, value: HeaderValue) {
        self.entries.push((canonical_key(name), value));
    }

    /// Remove every entry matching `name`, ignoring case. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Remove entries spelled exactly `name`.
    pub fn remove_exact(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != name);
        before - self.entries.len()
    }

    /// Respell entries named exactly `from` as `to`, keeping values and order.
    /// Entries already spelled exactly `to` are dropped first. Bypasses
    /// canonicalization.
    pub fn rename_exact(&mut self, from: &str, to: &str) -> bool {
        if !self.contains_exact(from) {
            return false;
        }
        self.remove_exact(to);
        for (k, _) in self.entries.iter_mut().filter(|(k, _)| k == from) {
            *k = to.to_string();
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Distinct names in first-seen order, as spelled.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (k, _) in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(k)) {
                names.push(k);
            }
        }
        names
    }

    /// Convert to a `HeaderMap`. Spelling is lost; HTTP/2 requires lowercase anyway.
    pub fn to_header_map(&self) -> Result<HeaderMap, InvalidHeaderName> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (k, v) in &self.entries {
            map.append(HeaderName::from_bytes(k.as_bytes())?, v.clone());
        }
        Ok(map)
    }
}

impl<'a> IntoIterator for &'a HeaderBag {
    type Item = (&'a str, &'a HeaderValue);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a HeaderValue)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// True if any comma-separated element of any value equals `token`, ignoring case.
pub fn values_contain_token<'a>(
    mut values: impl Iterator<Item = &'a HeaderValue>,
    token: &str,
) -> bool {
    values.any(|v| {
        v.to_str()
            .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hv(s: &str) -> HeaderValue {
        HeaderValue::from_str(s).unwrap()
    }

    #[test]
    fn canonicalizes_names() {
        assert_eq!(canonical_key("x-forwarded-for"), "X-Forwarded-For");
        assert_eq!(canonical_key("SEC-WEBSOCKET-KEY"), "Sec-Websocket-Key");
        assert_eq!(canonical_key("user-agent"), "User-Agent");
        assert_eq!(canonical_key("bad header"), "bad header");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut bag = HeaderBag::new();
        bag.append("content-type", hv("text/plain"));
        assert!(bag.contains_key("Content-Type"));
        assert!(bag.contains_exact("Content-Type"));
        assert!(!bag.contains_exact("content-type"));
        assert_eq!(bag.get_str("CONTENT-TYPE"), "text/plain");
    }

    #[test]
    fn set_replaces_all_values() {
        let mut bag = HeaderBag::new();
        bag.append("Accept", hv("a"));
        bag.append("accept", hv("b"));
        bag.set("ACCEPT", hv("c"));
        let values: Vec<_> = bag.get_all("accept").collect();
        assert_eq!(values, vec![&hv("c")]);
        assert_eq!(bag.names(), vec!["Accept"]);
    }

    #[test]
    fn rename_exact_keeps_values_and_order() {
        let mut bag = HeaderBag::new();
        bag.append("a", hv("1"));
        bag.append("sec-websocket-key", hv("k"));
        bag.append("b", hv("2"));
        assert!(bag.rename_exact("Sec-Websocket-Key", "Sec-WebSocket-Key"));
        let names: Vec<_> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["A", "Sec-WebSocket-Key", "B"]);
        assert_eq!(bag.get_str("sec-websocket-key"), "k");
        assert!(!bag.rename_exact("Missing", "Other"));
    }

    #[test]
    fn converts_from_and_to_header_map() {
        let mut map = HeaderMap::new();
        map.append("x-one", hv("1"));
        map.append("x-one", hv("2"));
        let bag = HeaderBag::from_header_map(&map);
        assert_eq!(bag.len(), 2);
        assert!(bag.contains_exact("X-One"));
        let back = bag.to_header_map().unwrap();
        assert_eq!(back.get_all("x-one").iter().count(), 2);
    }

    #[test]
    fn token_matching() {
        let values = [hv("keep-alive, Upgrade")];
        assert!(values_contain_token(values.iter(), "upgrade"));
        assert!(!values_contain_token(values.iter(), "close"));
    }
}
