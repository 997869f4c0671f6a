//! Observing HTTP forward proxy library.
//!
//! Relays every request to one fixed upstream and publishes an
//! [`observation::Observation`] per request on a bounded channel.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod observation;

pub use config::schema::ProxyConfig;
pub use http::{ForwardingHandler, HandlerOptions, HttpServer};
pub use lifecycle::Shutdown;
pub use observation::{Observation, ObservationSink};
