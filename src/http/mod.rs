//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, service match, body capture)
//!     → request.rs (inbound head, outbound request under construction)
//!     → headers.rs (case-preserving header storage)
//!     → websocket.rs / hop_by_hop.rs (header policy)
//!     → [proxy pipeline serves the exchange]
//!     → response.rs (Server header, error bodies)
//!     → Send to client
//! ```

pub mod headers;
pub mod hop_by_hop;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use headers::HeaderBag;
pub use request::{InboundRequest, OutboundRequest};
pub use server::{HttpServer, X_REQUEST_ID};
