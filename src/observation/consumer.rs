//! Default observation consumer: drain the channel into the log.

use tokio::sync::mpsc;

use crate::observation::record::Observation;

/// Log every record until all senders are gone.
///
/// With `log_bodies` the whole record, captured bodies included, is written
/// as one JSON document; otherwise only sizes and timings are logged.
/// Returns the number of records consumed.
pub async fn log_observations(mut rx: mpsc::Receiver<Observation>, log_bodies: bool) -> u64 {
    let mut consumed = 0;
    while let Some(record) = rx.recv().await {
        consumed += 1;
        log_observation(&record, log_bodies);
    }
    tracing::debug!(consumed, "Observation channel closed");
    consumed
}

fn log_observation(record: &Observation, log_bodies: bool) {
    let ttfb_ms = record
        .timings
        .time_to_first_byte()
        .map(|d| d.as_millis() as u64);
    let error = record.error.as_ref().map(ToString::to_string);

    if log_bodies {
        match serde_json::to_string(record) {
            Ok(json) => tracing::info!(target: "tap_proxy::observation", record = %json, "Observation"),
            Err(e) => tracing::error!(observation_id = %record.id, error = %e, "Failed to encode observation"),
        }
        return;
    }

    tracing::info!(
        target: "tap_proxy::observation",
        observation_id = %record.id,
        method = %record.method,
        uri = %record.uri,
        status = record.status_code,
        source = %record.source_tag,
        request_bytes = record.request_body.len(),
        response_bytes = record.response_body.as_ref().map(|b| b.len()),
        ttfb_ms,
        total_ms = record.timings.total().as_millis() as u64,
        error = error.as_deref(),
        "Observation"
    );
}
