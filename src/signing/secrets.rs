//! Secret store collaborator.
//!
//! Secret material is looked up by name on every signed request and never
//! cached by the caller, so rotating or deleting a secret takes effect on the
//! next request.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::config::SecretConfig;
use crate::http::request::BoxError;

/// A resolved secret.
#[derive(Clone)]
pub struct Secret {
    pub name: String,
    value: String,
}

impl Secret {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn value_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("secret backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Looks secrets up by name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Secret, SecretError>;
}

/// Concurrent in-memory store seeded from configuration.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: DashMap<String, String>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[SecretConfig]) -> Self {
        let store = Self::new();
        store.replace_all(configs);
        store
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.secrets.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Make the store hold exactly `configs`. Existing names are overwritten in
    /// place, so lookups never observe a gap during a reload.
    pub fn replace_all(&self, configs: &[SecretConfig]) {
        let mut keep = HashSet::new();
        for config in configs {
            match resolve_value(config) {
                Some(value) => {
                    self.secrets.insert(config.name.clone(), value);
                    keep.insert(config.name.clone());
                }
                None => {
                    tracing::warn!(secret = %config.name, "Secret has no resolvable value, skipping");
                }
            }
        }
        self.secrets.retain(|name, _| keep.contains(name));
    }
}

fn resolve_value(config: &SecretConfig) -> Option<String> {
    if let Some(value) = &config.value {
        return Some(value.clone());
    }
    let var = config.value_env.as_ref()?;
    std::env::var(var).ok()
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_by_name(&self, name: &str) -> Result<Secret, SecretError> {
        self.secrets
            .get(name)
            .map(|entry| Secret::new(name, entry.value().clone()))
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(name: &str, value: &str) -> SecretConfig {
        SecretConfig {
            name: name.into(),
            value: Some(value.into()),
            value_env: None,
        }
    }

    #[tokio::test]
    async fn looks_up_by_name() {
        let store = InMemorySecretStore::from_config(&[literal("aws", "s3cr3t")]);
        let secret = store.get_by_name("aws").await.unwrap();
        assert_eq!(secret.value_str(), "s3cr3t");
        assert!(!format!("{:?}", secret).contains("s3cr3t"));

        let err = store.get_by_name("missing").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn reads_environment_values() {
        let var = format!("ACCESS_PROXY_TEST_SECRET_{}", std::process::id());
        std::env::set_var(&var, "from-env");
        let store = InMemorySecretStore::from_config(&[SecretConfig {
            name: "env".into(),
            value: None,
            value_env: Some(var.clone()),
        }]);
        assert_eq!(store.get_by_name("env").await.unwrap().value_str(), "from-env");
        std::env::remove_var(var);
    }

    #[tokio::test]
    async fn replace_all_rotates_and_revokes() {
        let store = InMemorySecretStore::from_config(&[literal("a", "1"), literal("b", "2")]);
        store.replace_all(&[literal("a", "rotated")]);
        assert_eq!(store.get_by_name("a").await.unwrap().value_str(), "rotated");
        assert!(store.get_by_name("b").await.is_err());
        assert_eq!(store.len(), 1);
    }
}
