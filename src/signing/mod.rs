//! Outbound request signing.
//!
//! # Data Flow
//! ```text
//! service config has auth.sigv4
//!     → secrets.rs (look up the secret access key by name, every request)
//!     → sigv4.rs (digest body, canonicalize, sign, set Authorization)
//! ```
//!
//! # Design Decisions
//! - A missing secret is not fatal: the request is forwarded unsigned
//! - A signature that cannot be computed is fatal: nothing is forwarded
//! - Signing time is taken per request, never cached

pub mod secrets;
pub mod sigv4;

pub use secrets::{InMemorySecretStore, Secret, SecretError, SecretStore};
pub use sigv4::SigV4Error;

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::config::SigV4Config;
use crate::http::request::OutboundRequest;
use sigv4::{Credentials, SigningScope};

#[derive(Debug, Error)]
pub enum SigningError {
    /// The secret access key could not be fetched.
    #[error("could not fetch signing secret: {0}")]
    Fetch(#[from] SecretError),

    /// The signature could not be computed.
    #[error("could not compute signature: {0}")]
    Compute(#[from] SigV4Error),
}

impl SigningError {
    pub fn kind(&self) -> &'static str {
        match self {
            SigningError::Fetch(_) => "fetch",
            SigningError::Compute(_) => "compute",
        }
    }
}

/// Signs outbound requests with credentials held in a [`SecretStore`].
#[derive(Clone)]
pub struct RequestSigner {
    secrets: Arc<dyn SecretStore>,
}

impl RequestSigner {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    /// Sign `req` per `config`. The request is untouched on a fetch error.
    pub async fn sign(&self, req: &mut OutboundRequest, config: &SigV4Config) -> Result<(), SigningError> {
        let secret = self.secrets.get_by_name(&config.secret_access_key).await?;
        let payload_hash = sigv4::payload_hash(&req.body);

        sigv4::sign_request(
            req,
            Credentials {
                access_key_id: &config.access_key_id,
                secret_access_key: secret.value_str(),
            },
            SigningScope {
                service: &config.service,
                region: &config.region,
                escape_path: !config.disable_uri_path_escaping,
            },
            &payload_hash,
            Utc::now(),
        )?;
        Ok(())
    }
}
