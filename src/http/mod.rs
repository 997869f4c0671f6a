//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request (axum)
//!     → handler.rs (exchange begins, source tag captured)
//!     → rewrite.rs (scheme/host from target, path/query verbatim)
//!     → tee.rs (request body duplicated into capture)
//!     → net::transport (pooled round trip, header-wait timeout)
//!     → tee.rs (response body duplicated into capture)
//!     → caller; record published when the relay settles
//! ```

pub mod error;
pub mod handler;
pub mod rewrite;
pub mod server;
pub mod tee;

pub use error::{PipelineError, ServerError, TargetError};
pub use handler::{ForwardingHandler, HandlerOptions};
pub use server::HttpServer;
