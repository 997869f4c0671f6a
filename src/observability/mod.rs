//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline events:
//!     → logging.rs (tracing subscriber, pretty or JSON)
//!     → metrics.rs (counters, histograms via the metrics facade)
//!
//! Consumers:
//!     → stdout / log aggregation
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
