//! Proxy pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → selector.rs (direct response or proxy engine)
//!     → direct.rs                                  terminal, no upstream
//!     → engine.rs
//!         → director.rs (rewrite, hop-by-hop, sign)
//!         → transport round trip
//!         → stream.rs / upgrade tunnel (buffer_pool.rs)
//!         → classify.rs on failure
//! ```
//!
//! # Design Decisions
//! - Handlers are built per exchange and consumed by it
//! - Collaborators (resolver, transports, secrets) are trait objects
//! - No retries; a failed dispatch is answered once

pub mod buffer_pool;
pub mod classify;
pub mod direct;
pub mod director;
pub mod engine;
pub mod selector;
pub mod stream;

pub use buffer_pool::BufferPool;
pub use director::Director;
pub use engine::{EngineOptions, ProxyEngine};
pub use selector::{Handler, PipelineSelector};
