//! Observation record definitions.
//!
//! One [`Observation`] is produced for every request the forwarding handler
//! sees. Once published it belongs to the consumer; the proxy keeps nothing.

use std::fmt;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

/// Structured description of a single proxied exchange.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    /// Identifier assigned when the request arrived.
    pub id: Uuid,

    /// Inbound request method.
    pub method: String,

    /// Inbound request target (path and query).
    pub uri: String,

    /// Upstream status, or 503 when the round trip never produced one.
    pub status_code: u16,

    /// Bytes read from the caller's request body.
    pub request_body: Bytes,

    /// Bytes relayed back to the caller. `None` when no upstream response
    /// headers were received.
    pub response_body: Option<Bytes>,

    /// Failure recorded while handling the request, if any.
    pub error: Option<ObservationError>,

    /// Wall-clock phase timestamps.
    pub timings: Timings,

    /// Value of the designated source header, empty if absent.
    ///
    /// UTF-8 values are kept byte for byte; bytes that are not valid UTF-8
    /// are replaced with U+FFFD.
    pub source_tag: String,
}

impl Observation {
    /// True when the exchange completed without any recorded failure.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Phase timestamps for one exchange.
///
/// `start` and `end` are always known. The two wire-level stamps stay `None`
/// if the transport never reached that phase.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Timings {
    pub start: SystemTime,
    pub wrote_request: Option<SystemTime>,
    pub first_response_byte: Option<SystemTime>,
    pub end: SystemTime,
}

impl Timings {
    /// Total time spent on the exchange.
    pub fn total(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }

    /// Time from request start until upstream began responding.
    pub fn time_to_first_byte(&self) -> Option<Duration> {
        self.first_response_byte
            .and_then(|t| t.duration_since(self.start).ok())
    }

    /// Time the upstream spent between receiving the full request and
    /// starting its response.
    pub fn upstream_wait(&self) -> Option<Duration> {
        match (self.wrote_request, self.first_response_byte) {
            (Some(wrote), Some(first)) => first.duration_since(wrote).ok(),
            _ => None,
        }
    }
}

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The outbound request could not be built.
    RequestBuild,
    /// Connect, DNS, reset or other transport failure.
    Transport,
    /// Upstream did not start responding within the configured timeout.
    Timeout,
    /// Streaming the response back to the caller failed part-way.
    Relay,
    /// The caller went away before the upstream responded.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RequestBuild => "request_build",
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Relay => "relay",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Failure attached to an [`Observation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ObservationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ObservationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ObservationError {}
