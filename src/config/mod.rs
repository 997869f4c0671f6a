//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides (main)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → handler, sink and observability built from it once
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the upstream is fixed per handler
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ProxyConfig;
pub use schema::ListenerConfig;
pub use schema::UpstreamConfig;
pub use schema::ObservationConfig;
pub use schema::ObservabilityConfig;
