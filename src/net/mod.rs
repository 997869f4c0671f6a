//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request
//!     → transport.rs (pooled client, connect timeout, keep-alive)
//!     → upstream connection (reused while idle < timeout)
//!     → response head, or timeout after the header-wait limit
//! ```

pub mod transport;

pub use transport::{Transport, TransportSettings};
