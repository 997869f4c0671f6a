//! Configuration validation.
//!
//! Serde handles syntax; this checks semantics. All problems are reported at
//! once rather than stopping at the first.

use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::ProxyConfig;
use crate::http::rewrite::Target;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("upstream.target_url is not set")]
    MissingTarget,

    #[error("upstream.target_url: {0}")]
    Target(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("observation.source_header {0:?} is not a valid header name")]
    SourceHeader(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.upstream.target_url.is_empty() {
        errors.push(ValidationError::MissingTarget);
    } else if let Err(e) = Target::parse(&config.upstream.target_url) {
        errors.push(ValidationError::Target(e.to_string()));
    }

    if config.upstream.timeout_ms == 0 {
        errors.push(ValidationError::Zero("upstream.timeout_ms"));
    }
    if config.observation.channel_capacity == 0 {
        errors.push(ValidationError::Zero("observation.channel_capacity"));
    }
    if config.observation.publish_timeout_ms == 0 {
        errors.push(ValidationError::Zero("observation.publish_timeout_ms"));
    }

    if HeaderName::try_from(config.observation.source_header.as_str()).is_err() {
        errors.push(ValidationError::SourceHeader(config.observation.source_header.clone()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
