//! In-flight bookkeeping for one proxied request.
//!
//! An [`Exchange`] is created when a request arrives and gathers status,
//! captures, timings and errors as the pipeline advances. Dropping it
//! assembles the [`Observation`] and publishes it, so every request yields
//! exactly one record no matter where the pipeline stopped: an early
//! return, a transport failure, or the caller abandoning the request.

use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime};

use axum::http::{Method, StatusCode, Uri};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::http::tee::Capture;
use crate::observability::metrics;
use crate::observation::record::{ErrorKind, Observation, ObservationError, Timings};
use crate::observation::sink::ObservationSink;

/// Callback run once per request with the final status and error.
pub type CompletionHook = Arc<dyn Fn(StatusCode, Option<&ObservationError>) + Send + Sync>;

/// Set-once wire-level timestamps, written from inside the transport.
///
/// hyper never polls a request body that is already empty; it releases it
/// when the request head goes out, or when the connection attempt fails.
/// That release time only becomes the write stamp once the upstream answers.
/// Either event wakes [`TimingProbe::request_sent`].
#[derive(Debug, Default)]
pub struct TimingProbe {
    wrote_request: OnceLock<SystemTime>,
    body_released: OnceLock<SystemTime>,
    first_response_byte: OnceLock<SystemTime>,
    sent: Notify,
}

impl TimingProbe {
    pub fn mark_wrote_request(&self) {
        let _ = self.wrote_request.set(SystemTime::now());
        self.sent.notify_one();
    }

    pub fn mark_body_released(&self) {
        let _ = self.body_released.set(SystemTime::now());
        self.sent.notify_one();
    }

    /// Resolves once the request body was fully written or released.
    pub async fn request_sent(&self) {
        self.sent.notified().await;
    }

    pub fn mark_first_response_byte(&self) {
        let now = SystemTime::now();
        if let Some(released) = self.body_released.get() {
            let _ = self.wrote_request.set(*released);
        }
        let _ = self.first_response_byte.set(now);
    }

    pub fn wrote_request(&self) -> Option<SystemTime> {
        self.wrote_request.get().copied()
    }

    pub fn first_response_byte(&self) -> Option<SystemTime> {
        self.first_response_byte.get().copied()
    }
}

/// Record under construction for one request.
pub struct Exchange {
    id: Uuid,
    method: Method,
    uri: Uri,
    started: SystemTime,
    clock: Instant,
    source_tag: String,
    status: Option<StatusCode>,
    error: Option<ObservationError>,
    request_capture: Capture,
    response_capture: Option<Capture>,
    probe: Arc<TimingProbe>,
    sink: ObservationSink,
    on_complete: Option<CompletionHook>,
}

impl Exchange {
    /// Start tracking a request. The start timestamp is taken here.
    pub fn begin(method: &Method, uri: &Uri, sink: ObservationSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.clone(),
            uri: uri.clone(),
            started: SystemTime::now(),
            clock: Instant::now(),
            source_tag: String::new(),
            status: None,
            error: None,
            request_capture: Capture::new(),
            response_capture: None,
            probe: Arc::new(TimingProbe::default()),
            sink,
            on_complete: None,
        }
    }

    pub fn with_completion_hook(mut self, hook: Option<CompletionHook>) -> Self {
        self.on_complete = hook;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_source_tag(&mut self, tag: String) {
        self.source_tag = tag;
    }

    pub fn request_capture(&self) -> &Capture {
        &self.request_capture
    }

    pub fn probe(&self) -> &Arc<TimingProbe> {
        &self.probe
    }

    /// Upstream answered; its body will be captured into `capture`.
    pub fn record_response(&mut self, status: StatusCode, capture: Capture) {
        self.status = Some(status);
        self.response_capture = Some(capture);
    }

    /// Remember a failure. The first one recorded is kept.
    pub fn record_error(&mut self, error: ObservationError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Finalize and publish now.
    pub fn finish(self) {
        drop(self);
    }

    fn assemble(&mut self) -> Observation {
        if self.status.is_none() && self.error.is_none() {
            self.record_error(ObservationError::new(
                ErrorKind::Cancelled,
                "request abandoned before the upstream responded",
            ));
        }

        Observation {
            id: self.id,
            method: self.method.to_string(),
            uri: self.uri.to_string(),
            status_code: self
                .status
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
                .as_u16(),
            request_body: self.request_capture.snapshot(),
            response_body: self.response_capture.as_ref().map(Capture::snapshot),
            error: self.error.take(),
            timings: Timings {
                start: self.started,
                wrote_request: self.probe.wrote_request(),
                first_response_byte: self.probe.first_response_byte(),
                end: SystemTime::now(),
            },
            source_tag: std::mem::take(&mut self.source_tag),
        }
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        let record = self.assemble();
        let elapsed = self.clock.elapsed();

        match &record.error {
            None => tracing::info!(
                observation_id = %record.id,
                method = %record.method,
                uri = %record.uri,
                status = record.status_code,
                elapsed_ms = elapsed.as_millis() as u64,
                "Request relayed"
            ),
            Some(err) => tracing::warn!(
                observation_id = %record.id,
                method = %record.method,
                uri = %record.uri,
                status = record.status_code,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "Request failed"
            ),
        }

        metrics::record_request(&record.method, record.status_code, elapsed);
        metrics::record_captured_bytes("request", record.request_body.len());
        if let Some(body) = &record.response_body {
            metrics::record_captured_bytes("response", body.len());
        }

        if let Some(hook) = &self.on_complete {
            let status = StatusCode::from_u16(record.status_code)
                .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            hook(status, record.error.as_ref());
        }

        self.sink.publish(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn start(sink: ObservationSink) -> Exchange {
        let uri: Uri = "/orders?id=7".parse().unwrap();
        Exchange::begin(&Method::POST, &uri, sink)
    }

    #[tokio::test]
    async fn drop_publishes_once() {
        let (sink, mut rx) = ObservationSink::channel(4, Duration::from_secs(1));
        let mut exchange = start(sink);
        exchange.set_source_tag("billing".into());
        exchange.request_capture().append(b"<xml/>");
        let response = Capture::new();
        exchange.record_response(StatusCode::CREATED, response.clone());
        response.append(b"ok");
        exchange.finish();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.status_code, 201);
        assert_eq!(record.method, "POST");
        assert_eq!(record.uri, "/orders?id=7");
        assert_eq!(record.request_body, "<xml/>");
        assert_eq!(record.response_body.unwrap(), "ok");
        assert_eq!(record.source_tag, "billing");
        assert!(record.error.is_none());
        assert!(record.timings.end >= record.timings.start);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn abandoned_exchange_is_cancelled() {
        let (sink, mut rx) = ObservationSink::channel(4, Duration::from_secs(1));
        drop(start(sink));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.status_code, 503);
        assert_eq!(record.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(record.response_body.is_none());
    }

    #[tokio::test]
    async fn first_error_wins_and_status_stands() {
        let (sink, mut rx) = ObservationSink::channel(4, Duration::from_secs(1));
        let mut exchange = start(sink);
        exchange.record_response(StatusCode::OK, Capture::new());
        exchange.record_error(ObservationError::new(ErrorKind::Relay, "reset"));
        exchange.record_error(ObservationError::new(ErrorKind::Relay, "later"));
        exchange.finish();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.status_code, 200);
        assert_eq!(record.error.unwrap().message, "reset");
    }

    #[tokio::test]
    async fn probe_stamps_are_set_once() {
        let (sink, mut rx) = ObservationSink::channel(4, Duration::from_secs(1));
        let exchange = start(sink);
        let probe = exchange.probe().clone();
        probe.mark_wrote_request();
        let first = probe.wrote_request();
        tokio::time::sleep(Duration::from_millis(5)).await;
        probe.mark_wrote_request();
        assert_eq!(probe.wrote_request(), first);
        exchange.finish();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.timings.wrote_request, first);
        assert!(record.timings.first_response_byte.is_none());
    }

    #[test]
    fn released_body_counts_only_once_upstream_answers() {
        let probe = TimingProbe::default();
        probe.mark_body_released();
        assert!(probe.wrote_request().is_none());

        probe.mark_first_response_byte();
        let wrote = probe.wrote_request().unwrap();
        assert!(wrote <= probe.first_response_byte().unwrap());
    }

    #[tokio::test]
    async fn request_sent_wakes_on_write_or_release() {
        let written = TimingProbe::default();
        written.mark_wrote_request();
        tokio::time::timeout(Duration::from_secs(1), written.request_sent())
            .await
            .unwrap();

        let released = Arc::new(TimingProbe::default());
        let waiter = tokio::spawn({
            let released = released.clone();
            async move { released.request_sent().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        released.mark_body_released();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn completion_hook_sees_final_outcome() {
        let (sink, _rx) = ObservationSink::channel(4, Duration::from_secs(1));
        let seen: Arc<Mutex<Vec<(StatusCode, Option<ErrorKind>)>>> = Arc::default();
        let hook_seen = seen.clone();
        let hook: CompletionHook = Arc::new(move |status, err| {
            hook_seen.lock().unwrap().push((status, err.map(|e| e.kind)));
        });

        let mut exchange = start(sink).with_completion_hook(Some(hook));
        exchange.record_error(ObservationError::new(ErrorKind::Transport, "refused"));
        exchange.finish();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(StatusCode::SERVICE_UNAVAILABLE, Some(ErrorKind::Transport))]
        );
    }
}
