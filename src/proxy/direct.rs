//! Direct response handler.
//!
//! Serves a statically configured response without contacting any upstream.
//! A direct response without a body variant is a configuration error and is
//! answered with a bare 500.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;

use crate::config::{DirectBody, DirectResponse};
use crate::http::response::set_server_header;

pub struct DirectResponseHandler {
    body: Option<Bytes>,
    content_type: String,
    status_code: u32,
    product: HeaderValue,
}

impl DirectResponseHandler {
    pub fn new(configured: &DirectResponse, product: HeaderValue) -> Self {
        let body = match &configured.body {
            Some(DirectBody::Inline(text)) => Some(Bytes::from(text.clone())),
            Some(DirectBody::InlineBytes(bytes)) => Some(Bytes::from(bytes.clone())),
            None => None,
        };
        Self {
            body,
            content_type: configured.content_type.clone(),
            status_code: configured.status_code,
            product,
        }
    }

    /// Status to send: the configured one when within 200..=599, else 200.
    pub fn status(&self) -> StatusCode {
        u16::try_from(self.status_code)
            .ok()
            .filter(|code| (200..=599).contains(code))
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK)
    }

    pub fn respond(&self) -> Response<Body> {
        let Some(body) = self.body.clone() else {
            tracing::warn!("Direct response has no body variant configured");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status();

        if !self.content_type.is_empty() {
            match HeaderValue::from_str(&self.content_type) {
                Ok(value) => {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                Err(_) => {
                    tracing::warn!(content_type = %self.content_type, "Invalid direct response content type");
                }
            }
        }

        set_server_header(response.headers_mut(), &self.product);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::SERVER;
    use http_body_util::BodyExt;

    fn handler(body: Option<DirectBody>, content_type: &str, status_code: u32) -> DirectResponseHandler {
        let configured = DirectResponse {
            body,
            content_type: content_type.into(),
            status_code,
        };
        DirectResponseHandler::new(&configured, HeaderValue::from_static("octelium"))
    }

    async fn body_of(resp: Response<Body>) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn inline_text() {
        let resp = handler(Some(DirectBody::Inline("hello".into())), "text/plain", 201).respond();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(resp.headers()[SERVER], "octelium");
        assert_eq!(&body_of(resp).await[..], b"hello");
    }

    #[tokio::test]
    async fn inline_bytes() {
        let resp = handler(Some(DirectBody::InlineBytes(vec![0, 159, 146, 150])), "", 0).respond();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(&body_of(resp).await[..], &[0, 159, 146, 150]);
    }

    #[tokio::test]
    async fn out_of_range_status_defaults_to_ok() {
        for code in [999, 199, 600, 100, 1 << 20] {
            let resp = handler(Some(DirectBody::Inline("still here".into())), "", code).respond();
            assert_eq!(resp.status(), StatusCode::OK, "{code}");
            assert_eq!(&body_of(resp).await[..], b"still here");
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(handler(None, "", 200).status(), StatusCode::OK);
        assert_eq!(handler(None, "", 599).status().as_u16(), 599);
    }

    #[tokio::test]
    async fn unset_variant_is_internal_error() {
        let resp = handler(None, "text/plain", 201).respond();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().get(CONTENT_TYPE).is_none());
        assert!(body_of(resp).await.is_empty());
    }
}
