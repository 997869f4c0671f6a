//! Pooled upstream transport.
//!
//! # Responsibilities
//! - Build one connection-pooling client per handler
//! - Apply a single timeout to connect, keep-alive, idle and header wait
//! - Bound the number of idle connections kept warm
//! - Reach `http` and `https` upstreams alike
//!
//! The transport is created once and shared by every in-flight request; the
//! pool inside the client does its own synchronization.

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use axum::http::{Request, Response};
use hyper::body::{Body, Incoming};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};

use crate::http::error::PipelineError;

/// Idle connections kept open to the upstream.
pub const MAX_IDLE_CONNECTIONS: usize = 100;

/// Allowance for `Expect: 100-continue` negotiation.
pub const EXPECT_CONTINUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeouts and pool limits for a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub idle_timeout: Duration,
    pub response_header_timeout: Duration,
    pub max_idle_connections: usize,
    pub expect_continue_timeout: Duration,
}

impl TransportSettings {
    /// Settings where one timeout governs every phase.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            keepalive_interval: timeout,
            idle_timeout: timeout,
            response_header_timeout: timeout,
            max_idle_connections: MAX_IDLE_CONNECTIONS,
            expect_continue_timeout: EXPECT_CONTINUE_TIMEOUT,
        }
    }
}

fn tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Shared client transport to the upstream.
///
/// hyper's HTTP/1 client writes request bodies without waiting for a
/// `100 Continue`, so the expect-continue allowance is never exceeded.
pub struct Transport<B> {
    client: Client<HttpsConnector<HttpConnector>, B>,
    settings: TransportSettings,
}

impl<B> Transport<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn new(settings: TransportSettings) -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(settings.connect_timeout));
        connector.set_keepalive(Some(settings.keepalive_interval));
        connector.set_nodelay(true);

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config())
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);

        // Single upstream, so the per-host ceiling is the pool ceiling.
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(settings.idle_timeout)
            .pool_max_idle_per_host(settings.max_idle_connections)
            .build(connector);

        tracing::debug!(
            connect_timeout = ?settings.connect_timeout,
            response_header_timeout = ?settings.response_header_timeout,
            max_idle_connections = settings.max_idle_connections,
            "Upstream transport initialized"
        );

        Self { client, settings }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Send `request` and wait for the upstream's response head.
    ///
    /// `sent` resolves once the request body has been handed to the
    /// connection. Only then does the header-wait timeout start; connecting
    /// is bounded by the connector and uploading is paced by the peer.
    /// Fails with [`PipelineError::Timeout`] if no response head arrives
    /// within the limit after that; the pending connection is dropped.
    pub async fn round_trip<S>(&self, request: Request<B>, sent: S) -> Result<Response<Incoming>, PipelineError>
    where
        S: Future<Output = ()>,
    {
        let limit = self.settings.response_header_timeout;
        let response = self.client.request(request);
        tokio::pin!(response);

        tokio::select! {
            result = &mut response => return Ok(result?),
            () = sent => {}
        }

        match tokio::time::timeout(limit, response).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PipelineError::Timeout(limit)),
        }
    }
}
