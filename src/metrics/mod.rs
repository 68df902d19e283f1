use crate::cache::Source;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const NO_SOURCE: u8 = 0;

fn source_tag(source: Source) -> u8 {
    match source {
        Source::Primary => 1,
        Source::Secondary => 2,
        Source::Original => 3,
    }
}

/// Process-lifetime resolution counters.
#[derive(Default)]
pub struct ResolutionMetrics {
    primary_hits: AtomicU64,
    secondary_hits: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total: AtomicU64,
    response_time_us: AtomicU64,
    failovers: AtomicU64,
    last_failover_ms: AtomicU64,
    last_fresh_source: AtomicU8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub primary_hits: u64,
    pub secondary_hits: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_resolutions: u64,
    pub cumulative_response_time: Duration,
    pub failover_count: u64,
    pub last_failover_at: Option<SystemTime>,
    pub success_rate: f64,
    pub average_response_time: Duration,
}

impl ResolutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self, source: Source, elapsed: Duration) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.record_common(source, elapsed);
    }

    /// Records a resolution that went upstream. Returns true when it was a
    /// primary -> secondary failover.
    pub fn record_resolution(&self, source: Source, elapsed: Duration) -> bool {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.record_common(source, elapsed);

        let previous = self
            .last_fresh_source
            .swap(source_tag(source), Ordering::AcqRel);
        let failover = previous == source_tag(Source::Primary) && source == Source::Secondary;
        if failover {
            self.failovers.fetch_add(1, Ordering::Relaxed);
            self.last_failover_ms.store(now_ms(), Ordering::Relaxed);
            warn!("Image delivery failed over from primary CDN to secondary store");
        }
        failover
    }

    fn record_common(&self, source: Source, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.response_time_us.fetch_add(micros, Ordering::Relaxed);
        let counter = match source {
            Source::Primary => &self.primary_hits,
            Source::Secondary => &self.secondary_hits,
            Source::Original => &self.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let cumulative = Duration::from_micros(self.response_time_us.load(Ordering::Relaxed));
        let last_failover_ms = self.last_failover_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            primary_hits: self.primary_hits.load(Ordering::Relaxed),
            secondary_hits: self.secondary_hits.load(Ordering::Relaxed),
            failures,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            total_resolutions: total,
            cumulative_response_time: cumulative,
            failover_count: self.failovers.load(Ordering::Relaxed),
            last_failover_at: (last_failover_ms > 0)
                .then(|| UNIX_EPOCH + Duration::from_millis(last_failover_ms)),
            success_rate: if total == 0 {
                1.0
            } else {
                total.saturating_sub(failures) as f64 / total as f64
            },
            average_response_time: if total == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos((cumulative.as_nanos() / u128::from(total)) as u64)
            },
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.primary_hits,
            &self.secondary_hits,
            &self.failures,
            &self.cache_hits,
            &self.cache_misses,
            &self.total,
            &self.response_time_us,
            &self.failovers,
            &self.last_failover_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_fresh_source.store(NO_SOURCE, Ordering::Relaxed);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metrics_are_neutral() {
        let snapshot = ResolutionMetrics::new().snapshot();
        assert_eq!(snapshot.total_resolutions, 0);
        assert_eq!(snapshot.success_rate, 1.0);
        assert_eq!(snapshot.average_response_time, Duration::ZERO);
        assert!(snapshot.last_failover_at.is_none());
    }

    #[test]
    fn derives_rate_and_average() {
        let metrics = ResolutionMetrics::new();
        metrics.record_resolution(Source::Primary, Duration::from_millis(10));
        metrics.record_resolution(Source::Original, Duration::from_millis(30));
        metrics.record_cache_hit(Source::Primary, Duration::from_millis(2));
        metrics.record_cache_hit(Source::Secondary, Duration::from_millis(2));

        let s = metrics.snapshot();
        assert_eq!(s.total_resolutions, 4);
        assert_eq!(s.primary_hits, 2);
        assert_eq!(s.secondary_hits, 1);
        assert_eq!(s.failures, 1);
        assert_eq!(s.cache_hits, 2);
        assert_eq!(s.cache_misses, 2);
        assert_eq!(s.success_rate, 0.75);
        assert_eq!(s.average_response_time, Duration::from_millis(11));
    }

    #[test]
    fn counts_only_primary_to_secondary_transitions() {
        let metrics = ResolutionMetrics::new();
        assert!(!metrics.record_resolution(Source::Secondary, Duration::ZERO));
        assert!(!metrics.record_resolution(Source::Primary, Duration::ZERO));
        assert!(metrics.record_resolution(Source::Secondary, Duration::ZERO));
        assert!(!metrics.record_resolution(Source::Secondary, Duration::ZERO));
        assert!(!metrics.record_resolution(Source::Original, Duration::ZERO));

        let s = metrics.snapshot();
        assert_eq!(s.failover_count, 1);
        assert!(s.last_failover_at.is_some());
    }

    #[test]
    fn reset_zeroes_everything() {
        let metrics = ResolutionMetrics::new();
        metrics.record_resolution(Source::Primary, Duration::from_millis(1));
        metrics.record_resolution(Source::Secondary, Duration::from_millis(1));
        metrics.reset();
        assert_eq!(metrics.snapshot(), ResolutionMetrics::new().snapshot());
        // the transition memory is gone as well
        assert!(!metrics.record_resolution(Source::Secondary, Duration::ZERO));
    }
}
