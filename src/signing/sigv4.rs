//! AWS Signature Version 4 request signing.
//!
//! Signs the final outbound request: method, canonical path and query, every
//! header except the unsigned set, and the SHA-256 digest of the body. Adds
//! `X-Amz-Date` and `Authorization` to the request headers.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::HeaderValue;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::http::request::OutboundRequest;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AMZ_DATE_HEADER: &str = "X-Amz-Date";
const TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const SHORT_TIME_FORMAT: &str = "%Y%m%d";

/// Headers never included in the signature.
const UNSIGNED_HEADERS: [&str; 6] = [
    "authorization",
    "user-agent",
    "x-amzn-trace-id",
    "expect",
    "transfer-encoding",
    "content-length",
];

/// Everything but unreserved characters is escaped.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const PATH_ENCODE: &AsciiSet = &QUERY_ENCODE.remove(b'/');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigV4Error {
    #[error("sigv4 {0} must not be empty")]
    MissingField(&'static str),

    #[error("header '{0}' is not visible ASCII")]
    InvalidHeaderValue(String),

    #[error("invalid signing key")]
    InvalidKey,

    #[error("computed authorization header is not a valid header value")]
    InvalidAuthorization,
}

/// Static signing credentials.
#[derive(Clone, Copy)]
pub struct Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
}

/// Signing scope and options.
#[derive(Debug, Clone, Copy)]
pub struct SigningScope<'a> {
    pub service: &'a str,
    pub region: &'a str,
    pub escape_path: bool,
}

/// Hex SHA-256 digest of a payload.
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Sign `req` in place. Returns the hex signature.
pub fn sign_request(
    req: &mut OutboundRequest,
    creds: Credentials<'_>,
    scope: SigningScope<'_>,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<String, SigV4Error> {
    for (field, value) in [
        ("access key id", creds.access_key_id),
        ("secret access key", creds.secret_access_key),
        ("service", scope.service),
        ("region", scope.region),
    ] {
        if value.is_empty() {
            return Err(SigV4Error::MissingField(field));
        }
    }

    let amz_date = now.format(TIME_FORMAT).to_string();
    let short_date = now.format(SHORT_TIME_FORMAT).to_string();
    let amz_date_value = HeaderValue::from_str(&amz_date)
        .map_err(|_| SigV4Error::InvalidHeaderValue(AMZ_DATE_HEADER.to_string()))?;
    req.headers.set(AMZ_DATE_HEADER, amz_date_value);

    let (canonical_headers, signed_headers) = canonical_headers(req)?;
    let canonical_request = [
        req.method.as_str(),
        &canonical_uri(&req.path, scope.escape_path),
        &canonical_query(req.raw_query.as_deref().unwrap_or("")),
        &canonical_headers,
        &signed_headers,
        payload_hash,
    ]
    .join("\n");

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        short_date, scope.region, scope.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(creds.secret_access_key, &short_date, scope.region, scope.service)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, creds.access_key_id, credential_scope, signed_headers, signature
    );
    let authorization =
        HeaderValue::from_str(&authorization).map_err(|_| SigV4Error::InvalidAuthorization)?;
    req.headers.set("Authorization", authorization);

    Ok(signature)
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigV4Error> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigV4Error::InvalidKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, SigV4Error> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// `Host` without the scheme's default port.
fn sanitized_host(req: &OutboundRequest) -> String {
    let default_port = match req.scheme.as_str() {
        "https" => Some(":443"),
        "http" => Some(":80"),
        _ => None,
    };
    match default_port {
        Some(port) if req.host.ends_with(port) => req.host[..req.host.len() - port.len()].to_string(),
        _ => req.host.clone(),
    }
}

/// Canonical header block and the `;`-joined signed header list.
fn canonical_headers(req: &OutboundRequest) -> Result<(String, String), SigV4Error> {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    headers.insert("host".to_string(), vec![sanitized_host(req)]);
    if !req.body.is_empty() {
        headers.insert("content-length".to_string(), vec![req.body.len().to_string()]);
    }

    for (name, value) in req.headers.iter() {
        let lower = name.to_ascii_lowercase();
        if lower == "host" || UNSIGNED_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        let value = value
            .to_str()
            .map_err(|_| SigV4Error::InvalidHeaderValue(name.to_string()))?;
        headers.entry(lower).or_default().push(strip_excess_spaces(value));
    }

    let mut block = String::new();
    for (name, values) in &headers {
        block.push_str(name);
        block.push(':');
        block.push_str(&values.join(","));
        block.push('\n');
    }
    let signed = headers.keys().cloned().collect::<Vec<_>>().join(";");
    Ok((block, signed))
}

fn strip_excess_spaces(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_uri(path: &str, escape: bool) -> String {
    let path = if path.is_empty() { "/" } else { path };
    if escape {
        utf8_percent_encode(path, PATH_ENCODE).to_string()
    } else {
        path.to_string()
    }
}

/// Keys sorted, values sorted per key, everything re-encoded with `%20` for space.
fn canonical_query(raw_query: &str) -> String {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        params.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    let mut pairs = Vec::new();
    for (key, values) in &mut params {
        values.sort();
        let key = utf8_percent_encode(key, QUERY_ENCODE).to_string();
        for value in values.iter() {
            pairs.push(format!("{}={}", key, utf8_percent_encode(value, QUERY_ENCODE)));
        }
    }
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::HeaderBag;
    use bytes::Bytes;
    use chrono::TimeZone;
    use http::{Method, Version};

    const EXAMPLE_KEY_ID: &str = "AKIDEXAMPLE";
    const EXAMPLE_SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn request(path: &str, query: Option<&str>) -> OutboundRequest {
        OutboundRequest {
            method: Method::GET,
            scheme: "https".into(),
            host: "example.amazonaws.com".into(),
            authority: "example.amazonaws.com".into(),
            path: path.into(),
            raw_query: query.map(str::to_string),
            request_uri: None,
            version: Version::HTTP_11,
            headers: HeaderBag::new(),
            body: Bytes::new(),
        }
    }

    fn creds() -> Credentials<'static> {
        Credentials {
            access_key_id: EXAMPLE_KEY_ID,
            secret_access_key: EXAMPLE_SECRET,
        }
    }

    fn scope() -> SigningScope<'static> {
        SigningScope {
            service: "service",
            region: "us-east-1",
            escape_path: true,
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    #[test]
    fn get_vanilla() {
        let mut req = request("/", None);
        let sig = sign_request(&mut req, creds(), scope(), &payload_hash(b""), test_time()).unwrap();
        assert_eq!(sig, "5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31");
        assert_eq!(req.headers.get_str("x-amz-date"), "20150830T123600Z");
        assert_eq!(
            req.headers.get_str("authorization"),
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    #[test]
    fn get_vanilla_query_order_key_case() {
        let mut req = request("/", Some("Param2=value2&Param1=value1"));
        let sig = sign_request(&mut req, creds(), scope(), &payload_hash(b""), test_time()).unwrap();
        assert_eq!(sig, "b97d918cfa904a5beff61c982a1b6f458b799221646efd99d3219ec94cdf2500");
    }

    #[test]
    fn user_agent_is_not_signed() {
        let mut with_ua = request("/", None);
        with_ua.headers.set("User-Agent", HeaderValue::from_static("octelium"));
        let mut without = request("/", None);
        let a = sign_request(&mut with_ua, creds(), scope(), &payload_hash(b""), test_time()).unwrap();
        let b = sign_request(&mut without, creds(), scope(), &payload_hash(b""), test_time()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn body_changes_signature() {
        let mut empty = request("/", None);
        let mut full = request("/", None);
        full.body = Bytes::from_static(b"{\"a\":1}");
        let full_hash = payload_hash(&full.body);
        let a = sign_request(&mut empty, creds(), scope(), &payload_hash(b""), test_time()).unwrap();
        let b = sign_request(&mut full, creds(), scope(), &full_hash, test_time()).unwrap();
        assert_ne!(a, b);
        assert!(full.headers.get_str("authorization").contains("content-length;host;x-amz-date"));
    }

    #[test]
    fn empty_region_is_a_compute_error() {
        let mut req = request("/", None);
        let scope = SigningScope { region: "", ..scope() };
        let err = sign_request(&mut req, creds(), scope, &payload_hash(b""), test_time()).unwrap_err();
        assert_eq!(err, SigV4Error::MissingField("region"));
    }

    #[test]
    fn control_characters_in_key_id_fail() {
        let mut req = request("/", None);
        let creds = Credentials { access_key_id: "AKID\n", ..creds() };
        let err = sign_request(&mut req, creds, scope(), &payload_hash(b""), test_time()).unwrap_err();
        assert_eq!(err, SigV4Error::InvalidAuthorization);
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(canonical_query("b=2&a=1&a=0"), "a=0&a=1&b=2");
        assert_eq!(canonical_query("q=a+b&x"), "q=a%20b&x=");
        assert_eq!(canonical_uri("/a%20b/c", true), "/a%2520b/c");
        assert_eq!(canonical_uri("/a%20b/c", false), "/a%20b/c");
        assert_eq!(canonical_uri("", true), "/");
        assert_eq!(strip_excess_spaces("  a   b "), "a b");
    }

    #[test]
    fn default_port_is_not_signed() {
        let mut req = request("/", None);
        req.host = "example.amazonaws.com:443".into();
        assert_eq!(sanitized_host(&req), "example.amazonaws.com");
        req.host = "example.amazonaws.com:8443".into();
        assert_eq!(sanitized_host(&req), "example.amazonaws.com:8443");
    }
}
