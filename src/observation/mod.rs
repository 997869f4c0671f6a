//! Observation subsystem.
//!
//! # Data Flow
//! ```text
//! request arrives
//!     → exchange.rs (record under construction, timing probe)
//!     → request/response captures filled by http::tee
//!     → exchange dropped: record assembled
//!     → sink.rs (bounded handoff, drop policy)
//!     → consumer (logging drain in the binary, or embedder-owned)
//! ```
//!
//! # Design Decisions
//! - Publication is tied to `Drop`, so no path can skip or repeat it
//! - Publishing never blocks a request; stalled consumers cost records, not latency
//! - Records are plain owned data; nothing is shared back with the proxy

pub mod consumer;
pub mod exchange;
pub mod record;
pub mod sink;

pub use exchange::{CompletionHook, Exchange, TimingProbe};
pub use record::{ErrorKind, Observation, ObservationError, Timings};
pub use sink::{ObservationSink, Publish};
