use crate::error::{ConfigError, UpstreamError};
use http::header::AUTHORIZATION;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time;
use tracing::debug;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

pub fn build_client() -> Result<HttpClient, ConfigError> {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .https_or_http()
        .enable_http1()
        .build();

    Ok(Client::builder(TokioExecutor::new()).build(https))
}

/// Sends a bodiless `HEAD` and returns the status. The whole exchange is
/// bounded by `timeout`.
pub async fn head(
    client: &HttpClient,
    uri: &str,
    bearer: Option<&str>,
    timeout: Duration,
) -> Result<StatusCode, UpstreamError> {
    let uri: Uri = uri
        .parse()
        .map_err(|_| UpstreamError::InvalidUri(uri.to_string()))?;

    let mut builder = Request::builder().method(Method::HEAD).uri(uri.clone());
    if let Some(token) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = builder
        .body(Empty::new())
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    match time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            debug!("HEAD {} -> {}", uri, response.status());
            Ok(response.status())
        }
        Ok(Err(e)) => {
            debug!("HEAD {} failed: {}", uri, e);
            Err(UpstreamError::Transport(e.to_string()))
        }
        Err(_) => {
            debug!("HEAD {} timed out", uri);
            Err(UpstreamError::Timeout(timeout))
        }
    }
}

/// Like [`head`], but anything outside 2xx is an error.
pub async fn head_ok(
    client: &HttpClient,
    uri: &str,
    bearer: Option<&str>,
    timeout: Duration,
) -> Result<(), UpstreamError> {
    let status = head(client, uri, bearer, timeout).await?;
    if status.is_success() {
        Ok(())
    } else {
        Err(UpstreamError::Status(status))
    }
}
