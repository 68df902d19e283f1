mod sigv4;

pub use sigv4::Presigner;

use crate::config::SecondaryConfig;
use crate::error::{ResolveError, SigningError, UpstreamError};
use crate::primary::strip_transform_segment;
use crate::upstream::{self, HttpClient};
use chrono::Utc;
use futures::future::BoxFuture;
use http::{Method, StatusCode, Uri};
use std::time::Duration;
use tracing::debug;

/// Fallback object store handing out time-limited URLs.
pub trait SecondaryStore: Send + Sync {
    fn signed_url<'a>(
        &'a self,
        key: &'a str,
        expires_in: Duration,
    ) -> BoxFuture<'a, Result<String, ResolveError>>;
}

/// Lifetime of the presigned `HEAD` used to confirm the object exists.
const PROBE_EXPIRY: Duration = Duration::from_secs(60);

pub struct S3Store {
    client: HttpClient,
    presigner: Presigner,
    timeout: Duration,
}

impl S3Store {
    pub fn new(
        client: HttpClient,
        config: &SecondaryConfig,
        timeout: Duration,
    ) -> Result<Self, SigningError> {
        Ok(Self {
            client,
            presigner: Presigner::new(config)?,
            timeout,
        })
    }

    async fn sign(&self, key: &str, expires_in: Duration) -> Result<String, ResolveError> {
        let failure = |reason: String| ResolveError::SecondaryFailure {
            key: key.to_string(),
            reason,
        };

        let now = Utc::now();
        let probe_url = self
            .presigner
            .presign(&Method::HEAD, key, PROBE_EXPIRY, now)
            .map_err(|e| failure(e.to_string()))?;

        match upstream::head(&self.client, &probe_url, None, self.timeout).await {
            Ok(status) if status.is_success() => {}
            Ok(StatusCode::NOT_FOUND) => return Err(failure("object not found".to_string())),
            Ok(status) => return Err(failure(UpstreamError::Status(status).to_string())),
            Err(e) => return Err(failure(e.to_string())),
        }

        let url = self
            .presigner
            .presign(&Method::GET, key, expires_in, now)
            .map_err(|e| failure(e.to_string()))?;
        debug!("Signed secondary url for {} ({:?})", key, expires_in);
        Ok(url)
    }
}

impl SecondaryStore for S3Store {
    fn signed_url<'a>(
        &'a self,
        key: &'a str,
        expires_in: Duration,
    ) -> BoxFuture<'a, Result<String, ResolveError>> {
        Box::pin(self.sign(key, expires_in))
    }
}

/// Object key for `reference`: the CDN host, any transformation segment,
/// query, fragment and leading slashes are dropped.
pub fn storage_key(reference: &str, primary_base_url: &str) -> String {
    let reference = reference.trim();
    let base = primary_base_url.trim_end_matches('/');

    let path = match reference.strip_prefix(base) {
        Some(rest) if !base.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
            rest.to_string()
        }
        _ if reference.contains("://") => match reference.parse::<Uri>() {
            Ok(uri) => uri.path().to_string(),
            Err(_) => reference.to_string(),
        },
        _ => reference.to_string(),
    };

    let path = path.split(['?', '#']).next().unwrap_or_default();
    strip_transform_segment(path)
        .trim_start_matches('/')
        .to_string()
}
