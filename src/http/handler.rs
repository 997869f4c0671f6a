//! Forwarding handler.
//!
//! # Responsibilities
//! - Rewrite the inbound URL onto the upstream target
//! - Stream the request body upstream while capturing it
//! - Run the round trip through the shared transport
//! - Stream the response back while capturing it
//! - Produce exactly one observation record per request
//!
//! # Design Decisions
//! - Upstream 4xx/5xx are relayed as-is; only transport failures become 503
//! - Header copies replace per key, so repeated names collapse to the last value
//! - The record is published when the response body finishes or is dropped,
//!   not when the handler returns

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, HeaderMap, HeaderName, Request, Response, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use hyper::body::Incoming;
use tower_http::trace::TraceLayer;

use crate::http::error::{PipelineError, TargetError};
use crate::http::rewrite::{rewrite, Target};
use crate::http::tee::{Capture, TeeBody, TeeEvents};
use crate::net::transport::{Transport, TransportSettings};
use crate::observation::{CompletionHook, ErrorKind, Exchange, ObservationError, ObservationSink, TimingProbe};

/// Inbound header copied into each record's `source_tag`.
pub const DEFAULT_SOURCE_HEADER: HeaderName = HeaderName::from_static("source");

/// Body type sent upstream: the caller's body, teed into the request capture.
pub type OutboundBody = TeeBody<Body, RequestProbe>;

/// Tunables for a [`ForwardingHandler`].
#[derive(Clone)]
pub struct HandlerOptions {
    /// Applies to connect, keep-alive, idle and header wait alike.
    pub timeout: Duration,
    pub source_header: HeaderName,
    pub on_complete: Option<CompletionHook>,
}

impl HandlerOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            source_header: DEFAULT_SOURCE_HEADER,
            on_complete: None,
        }
    }

    pub fn source_header(mut self, name: HeaderName) -> Self {
        self.source_header = name;
        self
    }

    pub fn on_complete(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }
}

/// Stamps the write time once the transport has drained the request body.
pub struct RequestProbe(Arc<TimingProbe>);

impl TeeEvents for RequestProbe {
    fn on_end(&mut self) {
        self.0.mark_wrote_request();
    }

    fn on_drop(&mut self, complete: bool) {
        if complete {
            self.0.mark_body_released();
        }
    }
}

/// Owns the exchange while the response streams to the caller.
struct ResponseRelay {
    exchange: Option<Exchange>,
}

impl ResponseRelay {
    fn settle(&mut self, error: Option<ObservationError>) {
        if let Some(mut exchange) = self.exchange.take() {
            if let Some(error) = error {
                exchange.record_error(error);
            }
            exchange.finish();
        }
    }
}

impl TeeEvents for ResponseRelay {
    fn on_end(&mut self) {
        self.settle(None);
    }

    fn on_error(&mut self, error: &dyn std::fmt::Display) {
        self.settle(Some(ObservationError::new(ErrorKind::Relay, error.to_string())));
    }

    fn on_abort(&mut self) {
        self.settle(Some(ObservationError::new(
            ErrorKind::Relay,
            "caller went away before the response was fully relayed",
        )));
    }
}

struct Inner {
    target: Target,
    transport: Transport<OutboundBody>,
    sink: ObservationSink,
    source_header: HeaderName,
    on_complete: Option<CompletionHook>,
}

/// Request handler relaying every request to one upstream.
///
/// Cheap to clone; clones share the target, transport and sink.
#[derive(Clone)]
pub struct ForwardingHandler {
    inner: Arc<Inner>,
}

impl ForwardingHandler {
    /// Build a handler for `target_url` with default options.
    pub fn new(target_url: &str, timeout: Duration, sink: ObservationSink) -> Result<Self, TargetError> {
        Self::with_options(target_url, HandlerOptions::new(timeout), sink)
    }

    /// Build a handler. Fails only when `target_url` is unusable.
    pub fn with_options(
        target_url: &str,
        options: HandlerOptions,
        sink: ObservationSink,
    ) -> Result<Self, TargetError> {
        let target = Target::parse(target_url)?;
        let transport = Transport::new(TransportSettings::uniform(options.timeout));

        tracing::info!(
            target_url = %target,
            timeout = ?options.timeout,
            source_header = %options.source_header,
            "Forwarding handler ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                target,
                transport,
                sink,
                source_header: options.source_header,
                on_complete: options.on_complete,
            }),
        })
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn transport_settings(&self) -> &TransportSettings {
        self.inner.transport.settings()
    }

    /// Axum router sending every method and path through this handler.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/{*path}", any(forward))
            .route("/", any(forward))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Relay one request and return the response for the caller.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let (parts, body) = request.into_parts();

        let mut exchange = Exchange::begin(&parts.method, &parts.uri, self.inner.sink.clone())
            .with_completion_hook(self.inner.on_complete.clone());
        exchange.set_source_tag(source_tag(&parts.headers, &self.inner.source_header));

        tracing::debug!(
            observation_id = %exchange.id(),
            method = %parts.method,
            uri = %parts.uri,
            "Proxying request"
        );

        let outbound = match self.prepare(&parts, body, &exchange) {
            Ok(request) => request,
            Err(err) => return fail(exchange, err),
        };

        let probe = exchange.probe().clone();
        match self.inner.transport.round_trip(outbound, probe.request_sent()).await {
            Ok(response) => relay(response, exchange),
            Err(err) => fail(exchange, err),
        }
    }

    fn prepare(
        &self,
        parts: &Parts,
        body: Body,
        exchange: &Exchange,
    ) -> Result<Request<OutboundBody>, PipelineError> {
        let url = rewrite(&parts.uri, &self.inner.target);

        // Build the head first so a failure never touches the body.
        let mut outbound = Request::builder()
            .method(parts.method.clone())
            .uri(url)
            .body(())?;

        copy_headers(outbound.headers_mut(), &parts.headers);
        outbound.headers_mut().remove(header::HOST);

        let capture = exchange.request_capture().clone();
        let probe = RequestProbe(exchange.probe().clone());
        Ok(outbound.map(|()| TeeBody::new(body, capture, probe)))
    }
}

async fn forward(State(handler): State<ForwardingHandler>, request: Request<Body>) -> Response<Body> {
    handler.handle(request).await
}

fn relay(response: Response<Incoming>, mut exchange: Exchange) -> Response<Body> {
    exchange.probe().mark_first_response_byte();

    let (parts, body) = response.into_parts();
    let capture = Capture::new();
    exchange.record_response(parts.status, capture.clone());

    let body = TeeBody::new(
        body,
        capture,
        ResponseRelay {
            exchange: Some(exchange),
        },
    );

    let mut relayed = Response::new(Body::new(body));
    *relayed.status_mut() = parts.status;
    copy_headers(relayed.headers_mut(), &parts.headers);
    relayed
}

fn fail(mut exchange: Exchange, err: PipelineError) -> Response<Body> {
    let recorded = ObservationError::from(&err);
    let message = recorded.message.clone();
    exchange.record_error(recorded);
    exchange.finish();

    (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
}

/// Copy every header from `src` into `dst`, replacing per key.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src.iter() {
        dst.insert(name.clone(), value.clone());
    }
}

/// Header value as text; invalid UTF-8 sequences become U+FFFD.
fn source_tag(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}
