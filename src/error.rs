use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failures inside a single resolution. None of these leave `resolve`; they
/// only decide which tier answers and what gets logged.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("primary CDN unavailable: {0}")]
    PrimaryUnavailable(String),

    #[error("secondary store failed for `{key}`: {reason}")]
    SecondaryFailure { key: String, reason: String },

    #[error("format probe failed: {0}")]
    FormatProbeFailure(String),

    #[error("malformed cache entry for {0}")]
    CacheIntegrity(String),
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream uri `{0}`")]
    InvalidUri(String),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream answered {0}")]
    Status(StatusCode),
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("object store credentials are not configured")]
    MissingCredentials,

    #[error("invalid object store endpoint `{0}`")]
    InvalidEndpoint(String),

    #[error("invalid storage key `{0}`")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Crypto(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to initialise TLS: {0}")]
    Tls(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
