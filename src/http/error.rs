//! Error types for the forwarding pipeline.

use std::error::Error;
use std::time::Duration;

use crate::observation::record::{ErrorKind, ObservationError};

/// Handler construction failure: the upstream target is unusable.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("invalid target URL {url:?}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("target URL {0:?} has no host")]
    MissingHost(String),

    #[error("target URL {url:?} uses unsupported scheme {scheme:?}")]
    Scheme { url: String, scheme: String },

    #[error("target URL {url:?} has an unusable authority: {source}")]
    Authority {
        url: String,
        #[source]
        source: axum::http::uri::InvalidUri,
    },
}

/// Failure building the HTTP front end from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("invalid source header name {name:?}: {source}")]
    SourceHeader {
        name: String,
        #[source]
        source: axum::http::header::InvalidHeaderName,
    },
}

/// Per-request failure inside the forwarding pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to build upstream request: {0}")]
    RequestBuild(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::RequestBuild(_) => ErrorKind::RequestBuild,
            PipelineError::Transport(_) => ErrorKind::Transport,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Message including the underlying cause chain.
    pub fn detailed_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source().and_then(|cause| cause.source());
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

impl From<&PipelineError> for ObservationError {
    fn from(err: &PipelineError) -> Self {
        ObservationError::new(err.kind(), err.detailed_message())
    }
}
