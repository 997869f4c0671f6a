//! Upstream target and URL rewriting.

use std::str::FromStr;

use axum::http::uri::{Authority, Scheme};
use axum::http::Uri;
use url::Url;

use crate::http::error::TargetError;

/// Immutable identity of the upstream: scheme plus authority.
///
/// Derived once from the configured URL; any path, query or credentials in
/// that URL are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: Scheme,
    authority: Authority,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let url = Url::parse(raw).map_err(|source| TargetError::Parse {
            url: raw.to_string(),
            source,
        })?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TargetError::MissingHost(raw.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TargetError::Scheme {
                url: raw.to_string(),
                scheme: url.scheme().to_string(),
            });
        }
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let authority = Authority::from_str(&authority).map_err(|source| TargetError::Authority {
            url: raw.to_string(),
            source,
        })?;
        let scheme = Scheme::from_str(url.scheme()).map_err(|source| TargetError::Authority {
            url: raw.to_string(),
            source,
        })?;

        Ok(Self { scheme, authority })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// Point an inbound request target at the upstream.
///
/// Scheme and host come from `target`; path and raw query are taken
/// verbatim from `inbound`. Nothing is re-escaped or normalized.
pub fn rewrite(inbound: &Uri, target: &Target) -> String {
    let mut url = format!("{}{}", target, inbound.path());
    if let Some(query) = inbound.query().filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}
