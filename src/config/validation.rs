//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (unique names, endpoints or a direct response)
//! - Validate value ranges (flush interval > 0, buffer size > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Out-of-range direct status codes only warn; the runtime falls back to 200

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::{ProxyConfig, Service};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("duplicate service name '{0}'")]
    DuplicateService(String),

    #[error("service '{0}' has neither endpoints nor a direct response")]
    NoUpstream(String),

    #[error("service '{service}' has invalid endpoint url '{url}'")]
    InvalidEndpoint { service: String, url: String },

    #[error("service '{0}' direct response must set exactly one of inline or inline_bytes")]
    DirectBodyUnset(String),

    #[error("service '{service}' sigv4 field '{field}' must not be empty")]
    EmptySigV4Field { service: String, field: &'static str },

    #[error("duplicate secret name '{0}'")]
    DuplicateSecret(String),

    #[error("secret '{0}' must set value or value_env")]
    SecretWithoutValue(String),

    #[error("proxy.{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("proxy.product '{0}' is not a valid header value")]
    InvalidProduct(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.proxy.flush_interval_ms == 0 {
        errors.push(ValidationError::ZeroValue("flush_interval_ms"));
    }
    if config.proxy.buffer_size == 0 {
        errors.push(ValidationError::ZeroValue("buffer_size"));
    }
    if http::HeaderValue::from_str(&config.proxy.product).is_err() {
        errors.push(ValidationError::InvalidProduct(config.proxy.product.clone()));
    }

    let mut names = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() {
            errors.push(ValidationError::EmptyServiceName);
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        validate_service(service, &mut errors);
    }

    let mut secrets = HashSet::new();
    for secret in &config.secrets {
        if !secrets.insert(secret.name.as_str()) {
            errors.push(ValidationError::DuplicateSecret(secret.name.clone()));
        }
        if secret.value.is_none() && secret.value_env.is_none() {
            errors.push(ValidationError::SecretWithoutValue(secret.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(service: &Service, errors: &mut Vec<ValidationError>) {
    let direct = service.config.as_ref().and_then(|c| c.direct_response());

    if service.endpoints.is_empty() && direct.is_none() {
        errors.push(ValidationError::NoUpstream(service.name.clone()));
    }

    for endpoint in &service.endpoints {
        if Url::parse(&endpoint.url).map_or(true, |u| u.host_str().is_none()) {
            errors.push(ValidationError::InvalidEndpoint {
                service: service.name.clone(),
                url: endpoint.url.clone(),
            });
        }
    }

    if let Some(direct) = direct {
        if direct.body.is_none() {
            errors.push(ValidationError::DirectBodyUnset(service.name.clone()));
        }
        if !(200..=599).contains(&direct.status_code) && direct.status_code != 0 {
            tracing::warn!(
                service = %service.name,
                status_code = direct.status_code,
                "Direct response status code out of range, 200 will be used"
            );
        }
    }

    if let Some(sigv4) = service.config.as_ref().and_then(|c| c.sigv4()) {
        let fields = [
            ("access_key_id", &sigv4.access_key_id),
            ("secret_access_key", &sigv4.secret_access_key),
            ("service", &sigv4.service),
            ("region", &sigv4.region),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                errors.push(ValidationError::EmptySigV4Field {
                    service: service.name.clone(),
                    field,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        DirectBody, DirectResponse, EndpointConfig, HttpConfig, ResponseConfig, SecretConfig,
        ServiceConfig, ServiceMode,
    };

    fn service(name: &str, url: &str) -> Service {
        Service {
            name: name.into(),
            host: None,
            path_prefix: None,
            priority: 0,
            managed: false,
            mode: ServiceMode::Http,
            endpoints: vec![EndpointConfig { url: url.into(), host_port: None }],
            config: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.proxy.flush_interval_ms = 0;
        config.services.push(service("a", "http://127.0.0.1:1"));
        config.services.push(service("a", "not a url"));
        config.secrets.push(SecretConfig { name: "s".into(), value: None, value_env: None });

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroValue("flush_interval_ms")));
        assert!(errors.contains(&ValidationError::DuplicateService("a".into())));
        assert!(errors.contains(&ValidationError::InvalidEndpoint {
            service: "a".into(),
            url: "not a url".into()
        }));
        assert!(errors.contains(&ValidationError::SecretWithoutValue("s".into())));
    }

    #[test]
    fn direct_response_service_needs_no_endpoints() {
        let mut svc = service("static", "http://unused");
        svc.endpoints.clear();
        svc.config = Some(ServiceConfig {
            http: Some(HttpConfig {
                response: Some(ResponseConfig {
                    direct: Some(DirectResponse {
                        body: Some(DirectBody::Inline("ok".into())),
                        content_type: String::new(),
                        status_code: 999,
                    }),
                }),
                auth: None,
            }),
            ..Default::default()
        });
        let mut config = ProxyConfig::default();
        config.services.push(svc);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn direct_response_without_body_is_rejected() {
        let mut svc = service("static", "http://unused");
        svc.config = Some(ServiceConfig {
            http: Some(HttpConfig {
                response: Some(ResponseConfig { direct: Some(DirectResponse::default()) }),
                auth: None,
            }),
            ..Default::default()
        });
        let mut config = ProxyConfig::default();
        config.services.push(svc);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DirectBodyUnset("static".into())]);
    }

    #[test]
    fn product_must_be_a_header_value() {
        let mut config = ProxyConfig::default();
        config.proxy.product = "bad\nproduct".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidProduct("bad\nproduct".into())]);
    }
}
