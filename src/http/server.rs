//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the forwarding handler from configuration
//! - Serve it on a bound listener
//! - Stop accepting on shutdown and let in-flight relays finish

use std::time::Duration;

use axum::http::HeaderName;
use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::http::error::ServerError;
use crate::http::handler::{ForwardingHandler, HandlerOptions};
use crate::lifecycle::ShutdownSignal;
use crate::observation::ObservationSink;

/// HTTP front end for the forwarding handler.
pub struct HttpServer {
    handler: ForwardingHandler,
}

impl HttpServer {
    /// Create a server relaying to the configured upstream.
    ///
    /// Fails when the target URL or the source header name is unusable.
    pub fn new(config: &ProxyConfig, sink: ObservationSink) -> Result<Self, ServerError> {
        let name = &config.observation.source_header;
        let source_header = HeaderName::try_from(name.as_str()).map_err(|source| ServerError::SourceHeader {
            name: name.clone(),
            source,
        })?;
        let options = HandlerOptions::new(Duration::from_millis(config.upstream.timeout_ms))
            .source_header(source_header);

        let handler = ForwardingHandler::with_options(&config.upstream.target_url, options, sink)?;
        Ok(Self::from_handler(handler))
    }

    /// Serve an already constructed handler.
    pub fn from_handler(handler: ForwardingHandler) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &ForwardingHandler {
        &self.handler
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            target = %self.handler.target(),
            "HTTP server starting"
        );

        let app = self.handler.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.recv().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
