use crate::cache::{CacheEntry, ResolutionCache, Source};
use crate::config::Config;
use crate::error::{ConfigError, ResolveError};
use crate::format::{ClientContext, FormatNegotiator};
use crate::health::{Availability, Backoff, HealthMonitor, HealthProbe, HealthState, HttpHealthProbe};
use crate::metrics::{MetricsSnapshot, ResolutionMetrics};
use crate::primary::PrimaryCdn;
use crate::secondary::{S3Store, SecondaryStore, storage_key};
use crate::transform::{CacheKey, TransformParams};
use crate::upstream;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub url: String,
    pub source: Source,
}

pub struct ImageResolver {
    primary: PrimaryCdn,
    health: HealthMonitor,
    secondary: Box<dyn SecondaryStore>,
    formats: FormatNegotiator,
    cache: ResolutionCache,
    metrics: ResolutionMetrics,
    cache_ttl: Duration,
    url_expiry: Duration,
    sweep_interval: Duration,
    default_client: ClientContext,
}

impl ImageResolver {
    /// Validates `config` and wires the HTTP health probe and S3 store.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = upstream::build_client()?;
        let probe = HttpHealthProbe::new(
            client.clone(),
            &config.primary.base_url,
            &config.primary.health_path,
            config.primary.auth_token.clone(),
            config.timeout(),
        );
        let store = S3Store::new(client, &config.secondary, config.timeout())
            .map_err(|e| ConfigError::invalid("secondary.endpoint", e.to_string()))?;

        info!(
            "Image resolver ready: primary {}, secondary bucket {}",
            config.primary.base_url, config.secondary.bucket
        );
        Ok(Self::with_parts(
            config,
            Box::new(probe),
            Box::new(store),
            FormatNegotiator::from_config(&config.format),
        ))
    }

    /// Assembles a resolver from explicit collaborators. `config` is not
    /// validated here; a zero sweep interval is raised to one second when
    /// maintenance runs.
    pub fn with_parts(
        config: &Config,
        health_probe: Box<dyn HealthProbe>,
        secondary: Box<dyn SecondaryStore>,
        formats: FormatNegotiator,
    ) -> Self {
        let backoff = Backoff {
            base: Duration::from_secs(config.health_check.base_interval_seconds),
            max: Duration::from_secs(config.health_check.max_backoff_seconds),
            jitter_ratio: config.health_check.jitter_ratio,
        };

        Self {
            primary: PrimaryCdn::new(&config.primary.base_url),
            health: HealthMonitor::new(health_probe, backoff),
            secondary,
            formats,
            cache: ResolutionCache::new(config.cache.max_entries, config.cache.evict_to_ratio),
            metrics: ResolutionMetrics::new(),
            cache_ttl: config.cache_ttl(),
            url_expiry: config.url_expiry(),
            sweep_interval: config.sweep_interval(),
            default_client: ClientContext::default(),
        }
    }

    /// Client context used by [`resolve`](Self::resolve).
    pub fn with_default_client(mut self, client: ClientContext) -> Self {
        self.default_client = client;
        self
    }

    pub async fn resolve(&self, reference: &str, params: &TransformParams) -> ResolvedImage {
        self.resolve_for(reference, params, &self.default_client).await
    }

    /// Resolves `reference` to the best URL currently available. Never
    /// fails: when every tier is down the reference comes back unchanged.
    pub async fn resolve_for(
        &self,
        reference: &str,
        params: &TransformParams,
        client: &ClientContext,
    ) -> ResolvedImage {
        let started = Instant::now();
        let params = self.formats.effective_params(params, client);
        let key = CacheKey::new(reference, &params);

        if let Some(entry) = self.cache.get(&key) {
            debug!("Cache hit for {} ({})", key, entry.source.as_str());
            self.metrics.record_cache_hit(entry.source, started.elapsed());
            return ResolvedImage {
                url: entry.resolved_url,
                source: entry.source,
            };
        }

        let (url, source) = self.resolve_upstream(reference, &params).await;
        // an empty url would fail the integrity check on every later read
        if !url.is_empty() {
            self.cache.insert(
                key,
                CacheEntry::new(url.clone(), source, self.cache_ttl),
            );
        }
        self.metrics.record_resolution(source, started.elapsed());

        ResolvedImage { url, source }
    }

    async fn resolve_upstream(&self, reference: &str, params: &TransformParams) -> (String, Source) {
        match self.try_primary(reference, params).await {
            Ok(url) => {
                debug!("Resolved {} via primary CDN", reference);
                return (url, Source::Primary);
            }
            Err(e) => debug!("Skipping primary for {}: {}", reference, e),
        }

        let key = storage_key(reference, self.primary.base_url());
        match self.secondary.signed_url(&key, self.url_expiry).await {
            Ok(url) => {
                debug!("Resolved {} via secondary store", reference);
                (url, Source::Secondary)
            }
            Err(e) => {
                warn!("Serving original for {}: {}", reference, e);
                (reference.to_string(), Source::Original)
            }
        }
    }

    async fn try_primary(
        &self,
        reference: &str,
        params: &TransformParams,
    ) -> Result<String, ResolveError> {
        let availability = self.health.availability().await;
        self.on_availability(availability);
        if !availability.available {
            return Err(ResolveError::PrimaryUnavailable(
                "health check failing".to_string(),
            ));
        }
        self.primary.build_url(reference, params)
    }

    fn on_availability(&self, availability: Availability) {
        if availability.went_down {
            let purged = self.cache.purge_source(Source::Primary);
            if purged > 0 {
                info!("Dropped {} cached primary urls after primary went down", purged);
            }
        }
    }

    /// Resolves every reference concurrently, keeping input order.
    pub async fn resolve_all(
        &self,
        references: &[&str],
        params: &TransformParams,
        client: &ClientContext,
    ) -> Vec<ResolvedImage> {
        join_all(
            references
                .iter()
                .map(|reference| self.resolve_for(reference, params, client)),
        )
        .await
    }

    /// Renders a `srcset` attribute value with one candidate per width.
    /// A fixed height is scaled to keep the requested aspect ratio.
    pub async fn srcset(
        &self,
        reference: &str,
        params: &TransformParams,
        widths: &[u32],
        client: &ClientContext,
    ) -> String {
        let candidates = widths.iter().map(|&width| {
            let mut variant = params.clone().width(width);
            if let (Some(w), Some(h)) = (params.width, params.height) {
                if w > 0 {
                    let scaled = u64::from(h) * u64::from(width) / u64::from(w);
                    variant.height = Some(u32::try_from(scaled.max(1)).unwrap_or(u32::MAX));
                }
            }
            async move {
                let image = self.resolve_for(reference, &variant, client).await;
                format!("{} {}w", image.url, width)
            }
        });
        join_all(candidates).await.join(", ")
    }

    /// Probes the primary now, regardless of backoff.
    pub async fn check_primary_health(&self) -> bool {
        let availability = self.health.check_now().await;
        self.on_availability(availability);
        availability.available
    }

    pub async fn mark_primary_unavailable(&self) {
        let availability = self.health.mark_unavailable().await;
        self.on_availability(availability);
    }

    pub async fn health_state(&self) -> HealthState {
        self.health.state().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn sweep_expired(&self) -> usize {
        self.cache.sweep_expired()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// One maintenance pass: a due health check, then an expiry sweep.
    pub async fn maintenance_tick(&self) -> usize {
        let availability = self.health.availability().await;
        self.on_availability(availability);

        let swept = self.cache.sweep_expired();
        if swept > 0 {
            debug!("Swept {} expired cache entries", swept);
        }
        swept
    }

    pub async fn run_maintenance(&self) {
        let mut interval = time::interval(self.sweep_interval.max(MIN_SWEEP_INTERVAL));
        loop {
            interval.tick().await;
            self.maintenance_tick().await;
        }
    }

    pub fn spawn_maintenance(resolver: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            resolver.run_maintenance().await;
        })
    }
}
