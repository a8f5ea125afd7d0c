//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → service catalog + secrets shared via ArcSwap
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of catalog and secret store
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener, timeouts and forwarding settings apply at startup only

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ClientCertificate, DirectBody, DirectResponse, EndpointConfig, ForwardingConfig,
    HttpAuthConfig, HttpConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    ResponseConfig, SecretConfig, Service, ServiceConfig, ServiceMode, ServiceTlsConfig,
    SigV4Config, TimeoutConfig, TlsConfig,
};
