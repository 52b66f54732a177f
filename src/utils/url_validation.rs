//! Validation of configured service base URLs.
//!
//! Base URLs for the token service, the SDP exchange and the tool backends
//! must:
//! - Parse as absolute URLs
//! - Use `http` or `https`
//! - Name a host

use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be http or https, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not carry a query or fragment")]
    UnexpectedSuffix,
}

/// Whether `host` is a loopback name or address.
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Validate a service base URL.
///
/// Plain `http` is accepted (local development servers are the common case)
/// but logged when the host is not loopback.
pub fn validate_base_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if host.is_empty() {
        return Err(UrlValidationError::MissingHost);
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedSuffix);
    }

    if url.scheme() == "http" && !is_loopback_host(host) {
        warn!(url = %url, "Base URL uses plain http for a non-local host");
    }

    Ok(url)
}
