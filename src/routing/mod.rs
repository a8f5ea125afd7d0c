//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (service lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched Service or no match (404)
//!
//! Route Compilation (at startup and on reload):
//!     Service[]
//!     → Sort by priority
//!     → Compile matchers
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled ahead of time, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same service
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use router::Router;
