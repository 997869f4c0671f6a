//! Outbound handoff for observation records.
//!
//! # Publish policy
//! Publishing never blocks a request. A record is first offered with
//! `try_send`. If the channel is full, a detached task keeps offering it for
//! at most `publish_timeout`; after that, or if the consumer has gone away,
//! the record is dropped, logged and counted.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};

use crate::observability::metrics;
use crate::observation::record::Observation;

/// Outcome of a single [`ObservationSink::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// Record was queued immediately.
    Delivered,
    /// Channel was full; a background task is retrying until the deadline.
    Deferred,
    /// Record was discarded.
    Dropped,
}

/// Write side of the observation channel, shared by every request.
#[derive(Debug, Clone)]
pub struct ObservationSink {
    tx: mpsc::Sender<Observation>,
    publish_timeout: Duration,
}

impl ObservationSink {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::Sender<Observation>, publish_timeout: Duration) -> Self {
        Self { tx, publish_timeout }
    }

    /// Create a bounded channel and return the sink with its receiver.
    pub fn channel(capacity: usize, publish_timeout: Duration) -> (Self, mpsc::Receiver<Observation>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, publish_timeout), rx)
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// Hand a record to the consumer without blocking the caller.
    pub fn publish(&self, record: Observation) -> Publish {
        let record = match self.tx.try_send(record) {
            Ok(()) => return Publish::Delivered,
            Err(TrySendError::Closed(record)) => {
                drop_record(&record, "closed");
                return Publish::Dropped;
            }
            Err(TrySendError::Full(record)) => record,
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            drop_record(&record, "full");
            return Publish::Dropped;
        };

        let tx = self.tx.clone();
        let deadline = self.publish_timeout;
        runtime.spawn(async move {
            match tx.send_timeout(record, deadline).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(record)) => drop_record(&record, "timeout"),
                Err(SendTimeoutError::Closed(record)) => drop_record(&record, "closed"),
            }
        });
        Publish::Deferred
    }
}

fn drop_record(record: &Observation, reason: &'static str) {
    tracing::warn!(
        observation_id = %record.id,
        status = record.status_code,
        reason,
        "Observation record dropped"
    );
    metrics::record_observation_dropped(reason);
}
