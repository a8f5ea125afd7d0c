//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake via axum-server)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Plain TCP listeners are bound by the caller and passed to the server
//! - TLS is optional and handled transparently by the rustls acceptor

pub mod tls;

pub use tls::load_tls_config;
