#![allow(dead_code)]

use futures::future::BoxFuture;
use http_body_util::Empty;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use imgfailover::config::Config;
use imgfailover::error::ResolveError;
use imgfailover::format::{Capabilities, FormatNegotiator, StaticProbe};
use imgfailover::health::HealthProbe;
use imgfailover::secondary::SecondaryStore;
use imgfailover::ImageResolver;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const PRIMARY: &str = "https://images.example.com";

pub fn config() -> Config {
    Config::from_toml(&format!(
        r#"
        [primary]
        base_url = "{PRIMARY}"

        [secondary]
        endpoint = "https://s3.example.com"
        bucket = "media"
        access_key_id = "AKID"
        secret_access_key = "secret"
        "#
    ))
    .unwrap()
}

#[derive(Clone, Default)]
pub struct MockProbe {
    pub unhealthy: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl MockProbe {
    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthProbe for MockProbe {
    fn probe(&self) -> BoxFuture<'_, bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let healthy = !self.unhealthy.load(Ordering::SeqCst);
        Box::pin(async move { healthy })
    }
}

#[derive(Clone, Default)]
pub struct MockStore {
    pub failing: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SecondaryStore for MockStore {
    fn signed_url<'a>(
        &'a self,
        key: &'a str,
        expires_in: Duration,
    ) -> BoxFuture<'a, Result<String, ResolveError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing.load(Ordering::SeqCst);
        Box::pin(async move {
            if failing {
                Err(ResolveError::SecondaryFailure {
                    key: key.to_string(),
                    reason: "signing service exploded".to_string(),
                })
            } else {
                Ok(format!(
                    "https://s3.example.com/media/{key}?X-Amz-Expires={}&X-Amz-Signature=mock",
                    expires_in.as_secs()
                ))
            }
        })
    }
}

/// Resolver with mocked upstreams and no format negotiation.
pub fn resolver_with(config: &Config, probe: &MockProbe, store: &MockStore) -> ImageResolver {
    ImageResolver::with_parts(
        config,
        Box::new(probe.clone()),
        Box::new(store.clone()),
        FormatNegotiator::new(Box::new(StaticProbe::new(Capabilities::default()))),
    )
}

pub fn resolver(probe: &MockProbe, store: &MockStore) -> ImageResolver {
    resolver_with(&config(), probe, store)
}

/// Local HTTP server answering every request with `handler`'s status.
/// Returns its address and a request counter.
pub async fn serve<F>(handler: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(&Request<Incoming>) -> StatusCode + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let status = handler(&req);
                    async move {
                        Response::builder()
                            .status(status)
                            .body(Empty::<Bytes>::new())
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, hits)
}

/// Accepts connections and never answers.
pub async fn serve_silent() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}
