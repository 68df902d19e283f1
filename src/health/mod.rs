use crate::upstream::{self, HttpClient};
use futures::future::BoxFuture;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reachability check against the primary CDN.
pub trait HealthProbe: Send + Sync {
    fn probe(&self) -> BoxFuture<'_, bool>;
}

pub struct HttpHealthProbe {
    client: HttpClient,
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(
        client: HttpClient,
        base_url: &str,
        health_path: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), health_path),
            auth_token,
            timeout,
        }
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            debug!("Health checking {}", self.url);
            match upstream::head_ok(
                &self.client,
                &self.url,
                self.auth_token.as_deref(),
                self.timeout,
            )
            .await
            {
                Ok(()) => {
                    debug!("Health check SUCCESS for {}", self.url);
                    true
                }
                Err(e) => {
                    debug!("Health check FAILED for {}: {}", self.url, e);
                    false
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter_ratio: f64,
}

impl Backoff {
    /// `base * 2^failures`, capped at `max`.
    pub fn interval(&self, consecutive_failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_failures);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn jittered(&self, consecutive_failures: u32) -> Duration {
        let ratio = self.jitter_ratio;
        let offset = if ratio > 0.0 {
            rand::rng().random_range(-ratio..=ratio)
        } else {
            0.0
        };
        self.interval(consecutive_failures)
            .mul_f64(1.0 + offset)
            .min(self.max)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthState {
    pub available: bool,
    pub last_checked_at: Instant,
    pub consecutive_failures: u32,
    pub next_check_after: Duration,
}

impl HealthState {
    fn new(base: Duration) -> Self {
        Self {
            available: true,
            last_checked_at: Instant::now(),
            consecutive_failures: 0,
            next_check_after: base,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_checked_at) >= self.next_check_after
    }
}

/// Outcome of consulting the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    /// The primary went from available to unavailable during this call.
    pub went_down: bool,
}

pub struct HealthMonitor {
    probe: Box<dyn HealthProbe>,
    state: Mutex<HealthState>,
    backoff: Backoff,
}

impl HealthMonitor {
    pub fn new(probe: Box<dyn HealthProbe>, backoff: Backoff) -> Self {
        Self {
            probe,
            state: Mutex::new(HealthState::new(backoff.base)),
            backoff,
        }
    }

    pub async fn state(&self) -> HealthState {
        *self.state.lock().await
    }

    /// Returns the trusted flag, probing first when a check is due. The lock
    /// is held across the probe so concurrent callers share one check.
    pub async fn availability(&self) -> Availability {
        let mut state = self.state.lock().await;
        if !state.is_due(Instant::now()) {
            return Availability {
                available: state.available,
                went_down: false,
            };
        }
        let healthy = self.probe.probe().await;
        self.apply(&mut state, healthy)
    }

    /// Probes unconditionally. The probe runs without the lock, so callers
    /// whose check is not due keep reading the current flag meanwhile.
    pub async fn check_now(&self) -> Availability {
        let healthy = self.probe.probe().await;
        let mut state = self.state.lock().await;
        self.apply(&mut state, healthy)
    }

    /// Records a failure without probing.
    pub async fn mark_unavailable(&self) -> Availability {
        let mut state = self.state.lock().await;
        self.apply(&mut state, false)
    }

    fn apply(&self, state: &mut HealthState, healthy: bool) -> Availability {
        let was_available = state.available;

        if healthy {
            if !was_available {
                info!(
                    "Primary CDN is now HEALTHY after {} failed checks",
                    state.consecutive_failures
                );
            }
            state.available = true;
            state.consecutive_failures = 0;
        } else {
            state.available = false;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            if was_available {
                warn!("Primary CDN is now UNHEALTHY");
            }
        }

        state.last_checked_at = Instant::now();
        state.next_check_after = self.backoff.jittered(state.consecutive_failures);
        debug!(
            "Next primary health check in {:?} ({} consecutive failures)",
            state.next_check_after, state.consecutive_failures
        );

        Availability {
            available: state.available,
            went_down: was_available && !state.available,
        }
    }
}
